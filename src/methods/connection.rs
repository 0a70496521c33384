//! Connection-class method bodies.
//!
//! Server-to-client bodies are encoded through [`super::registry::MethodRegistry`],
//! which owns the version-sensitive opcodes; this module holds the typed
//! arguments and the client-to-server decoders.

use bytes::{Buf, Bytes};

use crate::error::AmqpFrameError;
use crate::wire::codec::ensure;
use crate::wire::{get_long_string, get_short_string, FieldTable, ShortStr};

/// Decoded connection-class method received from the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionMethod {
    StartOk(ConnectionStartOk),
    SecureOk(ConnectionSecureOk),
    TuneOk(ConnectionTuneOk),
    Open(ConnectionOpen),
    Close(ConnectionClose),
    CloseOk,
}

/// `Connection.Start-Ok`: mechanism selection and first SASL response.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionStartOk {
    pub client_properties: FieldTable,
    pub mechanism: ShortStr,
    pub response: Bytes,
    pub locale: ShortStr,
}

impl ConnectionStartOk {
    pub(crate) fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        Ok(Self {
            client_properties: FieldTable::decode(src)?,
            mechanism: get_short_string(src)?,
            response: get_long_string(src)?,
            locale: get_short_string(src)?,
        })
    }
}

/// `Connection.Secure-Ok`: a SASL challenge response.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionSecureOk {
    pub response: Bytes,
}

impl ConnectionSecureOk {
    pub(crate) fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        Ok(Self {
            response: get_long_string(src)?,
        })
    }
}

/// `Connection.Tune-Ok`: the client's accepted tuning values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionTuneOk {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl ConnectionTuneOk {
    pub(crate) fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        ensure(src, 8, "tune-ok arguments")?;
        Ok(Self {
            channel_max: src.get_u16(),
            frame_max: src.get_u32(),
            heartbeat: src.get_u16(),
        })
    }
}

/// `Connection.Open`: virtual-host attach request.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionOpen {
    pub virtual_host: ShortStr,
    pub capabilities: ShortStr,
    pub insist: bool,
}

impl ConnectionOpen {
    pub(crate) fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        let virtual_host = get_short_string(src)?;
        let capabilities = get_short_string(src)?;
        ensure(src, 1, "open flags")?;
        let flags = src.get_u8();
        Ok(Self {
            virtual_host,
            capabilities,
            insist: flags & 0x01 != 0,
        })
    }
}

/// `Connection.Close`: either peer abandoning the connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionClose {
    pub reply_code: u16,
    pub reply_text: ShortStr,
    pub class_id: u16,
    pub method_id: u16,
}

impl ConnectionClose {
    pub(crate) fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        ensure(src, 2, "close reply code")?;
        let reply_code = src.get_u16();
        let reply_text = get_short_string(src)?;
        ensure(src, 4, "close method reference")?;
        Ok(Self {
            reply_code,
            reply_text,
            class_id: src.get_u16(),
            method_id: src.get_u16(),
        })
    }
}
