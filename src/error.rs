//! Error taxonomy for the connection engine.
//!
//! Three scopes are distinguished, mirroring how failures are surfaced on
//! the wire:
//!
//! - [`AmqpFrameError`]: octet-level decode failures. Always fatal to the
//!   connection; the engine replies with `Connection.Close` where the
//!   handshake has progressed far enough, and drops the transport
//!   otherwise.
//! - [`EngineError::ConnectionScoped`]: failures confined to one
//!   connection (decode errors, store failures while the virtual host is
//!   not active). The connection is torn down; the broker survives.
//! - [`EngineError::ServerScoped`]: failures that indicate broker-wide
//!   trouble (store failures while the virtual host is active, transport
//!   write failures). Propagated to the hosting process.

use std::io;

use thiserror::Error;

/// AMQP reply codes carried by `Connection.Close` and `Channel.Close`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    ConnectionForced,
    AccessRefused,
    NotFound,
    SyntaxError,
    CommandInvalid,
    ChannelError,
    ResourceError,
    NotAllowed,
    InternalError,
}

impl ErrorCode {
    /// Numeric reply code defined by the protocol.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::ConnectionForced => 320,
            Self::AccessRefused => 403,
            Self::NotFound => 404,
            Self::SyntaxError => 502,
            Self::CommandInvalid => 503,
            Self::ChannelError => 504,
            Self::ResourceError => 506,
            Self::NotAllowed => 530,
            Self::InternalError => 541,
        }
    }
}

/// Wire-level framing and method decode failures.
///
/// Any of these invalidates the inbound byte stream; recovery is not
/// possible and the connection must be closed.
#[derive(Debug, Error)]
pub enum AmqpFrameError {
    /// The payload did not end with the `0xCE` end-of-frame marker.
    #[error("end of frame marker not found: got {got:#04x}")]
    MissingEndMarker {
        /// Octet found where the marker was expected.
        got: u8,
    },

    /// The declared payload size exceeds the negotiated maximum.
    #[error("incoming frame size of {size} is larger than the max frame size of {max}")]
    OversizedFrame {
        /// Declared payload size.
        size: u32,
        /// Current maximum frame size.
        max: u32,
    },

    /// The frame type octet is not METHOD, CONTENT_HEADER, CONTENT_BODY or
    /// HEARTBEAT.
    #[error("unknown frame type {type_id}")]
    UnknownFrameType {
        /// Type octet received.
        type_id: u8,
    },

    /// The eight-octet protocol header did not start with `AMQP`.
    #[error("bad protocol header")]
    BadProtocolHeader,

    /// A method opcode outside the catalogue for the negotiated version.
    #[error("method {method_id} unknown in class {class_id} for the protocol version in use")]
    UnknownMethod {
        /// Class identifier.
        class_id: u16,
        /// Method identifier.
        method_id: u16,
    },

    /// An argument field could not be decoded.
    #[error("malformed {0} field")]
    MalformedField(&'static str),

    /// The payload ended before a complete field was read.
    #[error("insufficient data while decoding {0}")]
    Truncated(&'static str),

    /// A short string or field name contained invalid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Runtime failures raised while a connection is being driven.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failure confined to this connection.
    #[error("connection-scoped failure: {0}")]
    ConnectionScoped(String),

    /// Failure that must be escalated beyond the connection.
    #[error("server-scoped failure: {0}")]
    ServerScoped(String),

    /// Message-store failure; scoped by the virtual host's state at the
    /// point it surfaces.
    #[error("store failure: {0}")]
    Store(String),

    /// Wire decode failure.
    #[error(transparent)]
    Frame(#[from] AmqpFrameError),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Whether this error should tear down only the owning connection.
    #[must_use]
    pub fn is_connection_scoped(&self) -> bool {
        !matches!(self, Self::ServerScoped(_))
    }
}

impl From<AmqpFrameError> for io::Error {
    fn from(err: AmqpFrameError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorCode::ConnectionForced, 320)]
    #[case(ErrorCode::AccessRefused, 403)]
    #[case(ErrorCode::NotFound, 404)]
    #[case(ErrorCode::SyntaxError, 502)]
    #[case(ErrorCode::CommandInvalid, 503)]
    #[case(ErrorCode::ChannelError, 504)]
    #[case(ErrorCode::ResourceError, 506)]
    #[case(ErrorCode::NotAllowed, 530)]
    #[case(ErrorCode::InternalError, 541)]
    fn reply_codes_match_the_protocol(#[case] code: ErrorCode, #[case] expected: u16) {
        assert_eq!(code.code(), expected);
    }

    #[test]
    fn server_scoped_errors_are_not_connection_scoped() {
        assert!(EngineError::ConnectionScoped("x".into()).is_connection_scoped());
        assert!(!EngineError::ServerScoped("x".into()).is_connection_scoped());
    }
}
