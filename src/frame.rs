//! Octet-level codec for the AMQP frame envelope.
//!
//! Every unit of traffic after the protocol header is a frame:
//! `(type, channel, payload-size, payload, 0xCE)`. The decoder is stateful
//! across reads, retaining a partial frame at the tail of one buffer until
//! the next arrives, and begins life in protocol-initiation mode where it
//! accepts only the eight-octet `AMQP` header.

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::{FrameDecoder, InboundEvent};
pub use encoder::{encode_frame, encoded_frame_size};
pub use types::{
    Frame,
    FrameType,
    ProtocolInitiation,
    ProtocolVersion,
    FRAME_END,
    FRAME_HEADER_SIZE,
    FRAME_OVERHEAD,
    MIN_FRAME_SIZE,
    PROTOCOL_HEADER_SIZE,
};
