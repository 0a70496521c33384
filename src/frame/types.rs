//! Frame and protocol-version value types.

use std::fmt;

use bytes::Bytes;

use crate::error::AmqpFrameError;

/// End-of-frame marker octet.
pub const FRAME_END: u8 = 0xCE;

/// Octets of frame header preceding the payload: type, channel, size.
pub const FRAME_HEADER_SIZE: usize = 7;

/// Header plus trailer octets surrounding every payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// Smallest max-frame-size a peer may negotiate.
pub const MIN_FRAME_SIZE: u32 = 4096;

/// Length of the protocol-initiation header.
pub const PROTOCOL_HEADER_SIZE: usize = 8;

const PROTOCOL_LITERAL: &[u8; 4] = b"AMQP";

/// Frame type octet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Method,
    ContentHeader,
    ContentBody,
    Heartbeat,
}

impl FrameType {
    /// Wire value of this frame type.
    #[must_use]
    pub fn type_id(self) -> u8 {
        match self {
            Self::Method => 1,
            Self::ContentHeader => 2,
            Self::ContentBody => 3,
            Self::Heartbeat => 8,
        }
    }

    /// Parse the wire octet.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpFrameError::UnknownFrameType`] for any other octet.
    pub fn from_type_id(type_id: u8) -> Result<Self, AmqpFrameError> {
        match type_id {
            1 => Ok(Self::Method),
            2 => Ok(Self::ContentHeader),
            3 => Ok(Self::ContentBody),
            8 => Ok(Self::Heartbeat),
            _ => Err(AmqpFrameError::UnknownFrameType { type_id }),
        }
    }
}

/// A decoded frame: type, channel and owned payload octets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Build a method frame.
    #[must_use]
    pub fn method(channel: u16, payload: Bytes) -> Self {
        Self {
            frame_type: FrameType::Method,
            channel,
            payload,
        }
    }

    /// Build a content-header frame.
    #[must_use]
    pub fn content_header(channel: u16, payload: Bytes) -> Self {
        Self {
            frame_type: FrameType::ContentHeader,
            channel,
            payload,
        }
    }

    /// Build a content-body frame.
    #[must_use]
    pub fn content_body(channel: u16, payload: Bytes) -> Self {
        Self {
            frame_type: FrameType::ContentBody,
            channel,
            payload,
        }
    }

    /// Build a heartbeat frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self {
            frame_type: FrameType::Heartbeat,
            channel: 0,
            payload: Bytes::new(),
        }
    }
}

/// A protocol version triple as carried in the initiation header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl ProtocolVersion {
    /// AMQP 0-8.
    pub const V0_8: Self = Self::new(0, 8, 0);
    /// AMQP 0-9.
    pub const V0_9: Self = Self::new(0, 9, 0);
    /// AMQP 0-9-1.
    pub const V0_9_1: Self = Self::new(0, 9, 1);

    /// Construct a version triple.
    #[must_use]
    pub const fn new(major: u8, minor: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// The newest version this broker speaks.
    #[must_use]
    pub const fn latest_supported() -> Self {
        Self::V0_9_1
    }

    /// Whether this broker speaks the given version.
    #[must_use]
    pub fn is_supported(self) -> bool {
        matches!(self, Self::V0_8 | Self::V0_9 | Self::V0_9_1)
    }

    /// Whether the 0-8 method numbering applies.
    #[must_use]
    pub fn is_0_8(self) -> bool {
        self == Self::V0_8
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision == 0 {
            write!(f, "{}-{}", self.major, self.minor)
        } else {
            write!(f, "{}-{}-{}", self.major, self.minor, self.revision)
        }
    }
}

/// The eight-octet handshake header exchanged before framed mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolInitiation {
    pub version: ProtocolVersion,
}

impl ProtocolInitiation {
    /// Build an initiation header for `version`.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    /// Serialise to the wire literal `AMQP || 0 || major || minor || revision`.
    #[must_use]
    pub fn to_bytes(self) -> [u8; PROTOCOL_HEADER_SIZE] {
        [
            PROTOCOL_LITERAL[0],
            PROTOCOL_LITERAL[1],
            PROTOCOL_LITERAL[2],
            PROTOCOL_LITERAL[3],
            0,
            self.version.major,
            self.version.minor,
            self.version.revision,
        ]
    }

    /// Parse the wire literal.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpFrameError::BadProtocolHeader`] if the first four
    /// octets are not `AMQP` or the protocol-class octet is non-zero.
    pub fn from_bytes(raw: &[u8; PROTOCOL_HEADER_SIZE]) -> Result<Self, AmqpFrameError> {
        if &raw[..4] != PROTOCOL_LITERAL || raw[4] != 0 {
            return Err(AmqpFrameError::BadProtocolHeader);
        }
        Ok(Self {
            version: ProtocolVersion::new(raw[5], raw[6], raw[7]),
        })
    }
}
