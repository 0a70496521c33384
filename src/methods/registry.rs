//! Version-parameterised method decode and reply construction.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmqpFrameError;
use crate::frame::{Frame, ProtocolVersion};
use crate::wire::codec::ensure;
use crate::wire::{put_long_string, put_short_string, FieldTable, ShortStr};

use super::channel::{decode_flow, decode_flow_ok, decode_open, ChannelClose, ChannelMethod, RawMethod};
use super::connection::{
    ConnectionClose,
    ConnectionMethod,
    ConnectionOpen,
    ConnectionSecureOk,
    ConnectionStartOk,
    ConnectionTuneOk,
};
use super::{CHANNEL_CLASS_ID, CONNECTION_CLASS_ID};

const fn key(class_id: u16, method_id: u16) -> u32 {
    ((class_id as u32) << 16) | method_id as u32
}

/// A method body decoded from a method frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMethod {
    pub class_id: u16,
    pub method_id: u16,
    pub kind: MethodKind,
}

/// Whether a method addresses the connection or a channel.
#[derive(Clone, Debug, PartialEq)]
pub enum MethodKind {
    Connection(ConnectionMethod),
    Channel(ChannelMethod),
}

/// Decode table and reply factory for one negotiated protocol version.
#[derive(Clone, Copy, Debug)]
pub struct MethodRegistry {
    version: ProtocolVersion,
}

impl MethodRegistry {
    /// Create a registry for `version`.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    /// The protocol version this registry serves.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Decode a method frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpFrameError::UnknownMethod`] for opcodes outside the
    /// catalogue of the negotiated version, and decode errors for
    /// malformed arguments.
    pub fn decode(&self, payload: Bytes) -> Result<DecodedMethod, AmqpFrameError> {
        let mut src = payload;
        ensure(&src, 4, "method opcode")?;
        let packed = src.get_u32();
        let class_id = (packed >> 16) as u16;
        let method_id = (packed & 0xFFFF) as u16;
        let unknown = || AmqpFrameError::UnknownMethod {
            class_id,
            method_id,
        };

        let is_0_8 = self.version.is_0_8();
        let kind = match packed {
            // Connection class.
            k if k == key(10, 11) => {
                MethodKind::Connection(ConnectionMethod::StartOk(ConnectionStartOk::decode(&mut src)?))
            }
            k if k == key(10, 21) => {
                MethodKind::Connection(ConnectionMethod::SecureOk(ConnectionSecureOk::decode(&mut src)?))
            }
            k if k == key(10, 31) => {
                MethodKind::Connection(ConnectionMethod::TuneOk(ConnectionTuneOk::decode(&mut src)?))
            }
            k if k == key(10, 40) => {
                MethodKind::Connection(ConnectionMethod::Open(ConnectionOpen::decode(&mut src)?))
            }
            // Close and Close-Ok moved between 0-8 and 0-9.
            k if k == key(10, 50) => {
                if is_0_8 {
                    return Err(unknown());
                }
                MethodKind::Connection(ConnectionMethod::Close(ConnectionClose::decode(&mut src)?))
            }
            k if k == key(10, 51) => {
                if is_0_8 {
                    return Err(unknown());
                }
                MethodKind::Connection(ConnectionMethod::CloseOk)
            }
            k if k == key(10, 60) => {
                if !is_0_8 {
                    return Err(unknown());
                }
                MethodKind::Connection(ConnectionMethod::Close(ConnectionClose::decode(&mut src)?))
            }
            k if k == key(10, 61) => {
                if !is_0_8 {
                    return Err(unknown());
                }
                MethodKind::Connection(ConnectionMethod::CloseOk)
            }

            // Channel class.
            k if k == key(20, 10) => MethodKind::Channel(decode_open(&mut src)?),
            k if k == key(20, 20) => MethodKind::Channel(decode_flow(&mut src)?),
            k if k == key(20, 21) => MethodKind::Channel(decode_flow_ok(&mut src)?),
            k if k == key(20, 40) => {
                MethodKind::Channel(ChannelMethod::Close(ChannelClose::decode(&mut src)?))
            }
            k if k == key(20, 41) => MethodKind::Channel(ChannelMethod::CloseOk),

            // The remainder of the catalogue travels undissected.
            k if KNOWN_RAW_METHODS.contains(&k) => MethodKind::Channel(ChannelMethod::Raw(RawMethod {
                class_id,
                method_id,
                arguments: src.clone(),
            })),

            _ => return Err(unknown()),
        };

        Ok(DecodedMethod {
            class_id,
            method_id,
            kind,
        })
    }

    fn method_frame(
        &self,
        channel: u16,
        class_id: u16,
        method_id: u16,
        encode_args: impl FnOnce(&mut BytesMut),
    ) -> Frame {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16(class_id);
        buf.put_u16(method_id);
        encode_args(&mut buf);
        Frame::method(channel, buf.freeze())
    }

    /// Build `Connection.Start` advertising `server_properties`,
    /// space-separated `mechanisms` and `locales`.
    #[must_use]
    pub fn connection_start_frame(
        &self,
        server_properties: &FieldTable,
        mechanisms: &[u8],
        locales: &[u8],
    ) -> Frame {
        let version = self.version;
        self.method_frame(0, CONNECTION_CLASS_ID, 10, |buf| {
            buf.put_u8(version.major);
            buf.put_u8(version.minor);
            server_properties.encode(buf);
            put_long_string(buf, mechanisms);
            put_long_string(buf, locales);
        })
    }

    /// Build `Connection.Secure` carrying a SASL challenge.
    #[must_use]
    pub fn connection_secure_frame(&self, challenge: &[u8]) -> Frame {
        self.method_frame(0, CONNECTION_CLASS_ID, 20, |buf| {
            put_long_string(buf, challenge);
        })
    }

    /// Build `Connection.Tune`.
    #[must_use]
    pub fn connection_tune_frame(&self, channel_max: u16, frame_max: u32, heartbeat: u16) -> Frame {
        self.method_frame(0, CONNECTION_CLASS_ID, 30, |buf| {
            buf.put_u16(channel_max);
            buf.put_u32(frame_max);
            buf.put_u16(heartbeat);
        })
    }

    /// Build `Connection.Open-Ok`.
    #[must_use]
    pub fn connection_open_ok_frame(&self, known_hosts: &ShortStr) -> Frame {
        self.method_frame(0, CONNECTION_CLASS_ID, 41, |buf| {
            put_short_string(buf, known_hosts);
        })
    }

    /// Build `Connection.Redirect` towards `host`.
    #[must_use]
    pub fn connection_redirect_frame(&self, host: &ShortStr) -> Frame {
        let method_id = if self.version.is_0_8() { 50 } else { 42 };
        self.method_frame(0, CONNECTION_CLASS_ID, method_id, |buf| {
            put_short_string(buf, host);
            put_short_string(buf, &ShortStr::default());
        })
    }

    /// Build `Connection.Close` with the failing method reference.
    #[must_use]
    pub fn connection_close_frame(
        &self,
        reply_code: u16,
        reply_text: &ShortStr,
        class_id: u16,
        method_id: u16,
    ) -> Frame {
        let close_id = if self.version.is_0_8() { 60 } else { 50 };
        self.method_frame(0, CONNECTION_CLASS_ID, close_id, |buf| {
            buf.put_u16(reply_code);
            put_short_string(buf, reply_text);
            buf.put_u16(class_id);
            buf.put_u16(method_id);
        })
    }

    /// Build `Connection.Close-Ok`.
    #[must_use]
    pub fn connection_close_ok_frame(&self) -> Frame {
        let close_ok_id = if self.version.is_0_8() { 61 } else { 51 };
        self.method_frame(0, CONNECTION_CLASS_ID, close_ok_id, |_| {})
    }

    /// Build `Channel.Open-Ok` for `channel`.
    #[must_use]
    pub fn channel_open_ok_frame(&self, channel: u16) -> Frame {
        let is_0_8 = self.version.is_0_8();
        self.method_frame(channel, CHANNEL_CLASS_ID, 11, |buf| {
            if !is_0_8 {
                put_long_string(buf, &[]);
            }
        })
    }

    /// Build `Channel.Close` for `channel`.
    #[must_use]
    pub fn channel_close_frame(
        &self,
        channel: u16,
        reply_code: u16,
        reply_text: &ShortStr,
        class_id: u16,
        method_id: u16,
    ) -> Frame {
        self.method_frame(channel, CHANNEL_CLASS_ID, 40, |buf| {
            buf.put_u16(reply_code);
            put_short_string(buf, reply_text);
            buf.put_u16(class_id);
            buf.put_u16(method_id);
        })
    }

    /// Build `Channel.Close-Ok` for `channel`.
    #[must_use]
    pub fn channel_close_ok_frame(&self, channel: u16) -> Frame {
        self.method_frame(channel, CHANNEL_CLASS_ID, 41, |_| {})
    }

    /// Build `Channel.Flow` for `channel`.
    #[must_use]
    pub fn channel_flow_frame(&self, channel: u16, active: bool) -> Frame {
        self.method_frame(channel, CHANNEL_CLASS_ID, 20, |buf| {
            buf.put_u8(u8::from(active));
        })
    }
}

/// Methods the engine forwards without dissecting the arguments.
///
/// The catalogue matches what the broker accepts from clients: access,
/// exchange, queue, the client-to-server half of basic, confirm and tx.
const KNOWN_RAW_METHODS: &[u32] = &[
    // access
    key(30, 10),
    // exchange: declare, delete, bound
    key(40, 10),
    key(40, 20),
    key(40, 22),
    // queue: declare, bind, purge, delete, unbind
    key(50, 10),
    key(50, 20),
    key(50, 30),
    key(50, 40),
    key(50, 50),
    // basic: qos, consume, cancel, publish, get, ack, reject,
    // recover-async, recover-sync (0-8 and 0-9 numbering), nack
    key(60, 10),
    key(60, 20),
    key(60, 30),
    key(60, 40),
    key(60, 70),
    key(60, 80),
    key(60, 90),
    key(60, 100),
    key(60, 102),
    key(60, 110),
    key(60, 120),
    // confirm
    key(85, 10),
    // tx: select, commit, rollback
    key(90, 10),
    key(90, 20),
    key(90, 30),
];
