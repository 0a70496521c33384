//! Channel-class method bodies and the raw pass-through form.

use bytes::{Buf, Bytes};

use crate::error::AmqpFrameError;
use crate::wire::codec::ensure;
use crate::wire::{get_short_string, ShortStr};

/// A channel-scoped method decoded from the wire.
///
/// Lifecycle methods the engine interprets itself are typed; everything
/// else in the catalogue travels as [`RawMethod`] to the channel contract,
/// whose semantics live beyond the connection engine.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelMethod {
    /// `Channel.Open` (the reserved out-of-band argument is discarded).
    Open,
    /// `Channel.Flow`.
    Flow { active: bool },
    /// `Channel.Flow-Ok`.
    FlowOk { active: bool },
    /// `Channel.Close`.
    Close(ChannelClose),
    /// `Channel.Close-Ok`.
    CloseOk,
    /// Any other method in the known catalogue.
    Raw(RawMethod),
}

/// `Channel.Close` arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelClose {
    pub reply_code: u16,
    pub reply_text: ShortStr,
    pub class_id: u16,
    pub method_id: u16,
}

impl ChannelClose {
    pub(crate) fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        ensure(src, 2, "channel close reply code")?;
        let reply_code = src.get_u16();
        let reply_text = get_short_string(src)?;
        ensure(src, 4, "channel close method reference")?;
        Ok(Self {
            reply_code,
            reply_text,
            class_id: src.get_u16(),
            method_id: src.get_u16(),
        })
    }
}

/// An undissected method body: opcode plus its raw argument octets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMethod {
    pub class_id: u16,
    pub method_id: u16,
    pub arguments: Bytes,
}

pub(crate) fn decode_open(src: &mut Bytes) -> Result<ChannelMethod, AmqpFrameError> {
    let _out_of_band = get_short_string(src)?;
    Ok(ChannelMethod::Open)
}

pub(crate) fn decode_flow(src: &mut Bytes) -> Result<ChannelMethod, AmqpFrameError> {
    ensure(src, 1, "flow flags")?;
    Ok(ChannelMethod::Flow {
        active: src.get_u8() & 0x01 != 0,
    })
}

pub(crate) fn decode_flow_ok(src: &mut Bytes) -> Result<ChannelMethod, AmqpFrameError> {
    ensure(src, 1, "flow-ok flags")?;
    Ok(ChannelMethod::FlowOk {
        active: src.get_u8() & 0x01 != 0,
    })
}
