//! Method bodies and the version-parameterised method registry.
//!
//! Methods are dispatched on the packed 32-bit key
//! `(class_id << 16) | method_id`. The opcode catalogue is
//! protocol-version-sensitive: AMQP 0-8 numbers `Connection.Close` and
//! `Connection.Close-Ok` differently from 0-9/0-9-1, so one
//! [`MethodRegistry`] is created per negotiated version.

pub mod basic;
pub mod channel;
pub mod connection;
pub mod registry;

pub use basic::{BasicCancelOk, BasicDeliver, BasicGetOk, BasicReturn};
pub use channel::{ChannelClose, ChannelMethod, RawMethod};
pub use connection::{
    ConnectionClose,
    ConnectionMethod,
    ConnectionOpen,
    ConnectionSecureOk,
    ConnectionStartOk,
    ConnectionTuneOk,
};
pub use registry::{DecodedMethod, MethodKind, MethodRegistry};

/// Class identifier of the connection class.
pub const CONNECTION_CLASS_ID: u16 = 10;
/// Class identifier of the channel class.
pub const CHANNEL_CLASS_ID: u16 = 20;
/// Class identifier of the basic class.
pub const BASIC_CLASS_ID: u16 = 60;
