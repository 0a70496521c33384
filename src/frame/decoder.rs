//! Stateful inbound frame decoder.

use bytes::{Buf, BytesMut};

use crate::error::AmqpFrameError;

use super::types::{
    Frame,
    FrameType,
    ProtocolInitiation,
    FRAME_END,
    FRAME_HEADER_SIZE,
    PROTOCOL_HEADER_SIZE,
};

/// An event produced by the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    /// The protocol-initiation header, emitted exactly once at start-up.
    ProtocolHeader(ProtocolInitiation),
    /// A complete frame.
    Frame(Frame),
}

/// Incremental decoder for the inbound octet stream.
///
/// A partial frame at the tail of one `decode` call is retained and
/// completed by the next. The decoder starts in protocol-initiation mode,
/// in which exactly [`PROTOCOL_HEADER_SIZE`] octets are consumed and
/// emitted as [`InboundEvent::ProtocolHeader`]; all subsequent input is
/// framed.
pub struct FrameDecoder {
    buf: BytesMut,
    expect_protocol_initiation: bool,
    max_frame_size: u32,
}

impl FrameDecoder {
    /// Create a decoder in protocol-initiation mode.
    #[must_use]
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            expect_protocol_initiation: true,
            max_frame_size,
        }
    }

    /// Update the enforced maximum payload size.
    ///
    /// Called by the engine after `Tune-Ok` installs the negotiated value.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Leave (or re-enter) protocol-initiation mode.
    pub fn set_expect_protocol_initiation(&mut self, expect: bool) {
        self.expect_protocol_initiation = expect;
    }

    /// Octets currently buffered awaiting completion.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Consume `incoming` and return every event it completes.
    ///
    /// # Errors
    ///
    /// Returns an [`AmqpFrameError`] on a bad protocol header, an
    /// oversized or malformed frame, or an unknown frame type. Decoder
    /// state is not meaningful after an error.
    pub fn decode(&mut self, incoming: &[u8]) -> Result<Vec<InboundEvent>, AmqpFrameError> {
        self.buf.extend_from_slice(incoming);
        let mut events = Vec::new();

        if self.expect_protocol_initiation {
            if self.buf.len() < PROTOCOL_HEADER_SIZE {
                return Ok(events);
            }
            let mut raw = [0_u8; PROTOCOL_HEADER_SIZE];
            raw.copy_from_slice(&self.buf.split_to(PROTOCOL_HEADER_SIZE));
            let initiation = ProtocolInitiation::from_bytes(&raw)?;
            self.expect_protocol_initiation = false;
            events.push(InboundEvent::ProtocolHeader(initiation));
        }

        while let Some(frame) = self.decode_frame()? {
            events.push(InboundEvent::Frame(frame));
        }
        Ok(events)
    }

    fn decode_frame(&mut self) -> Result<Option<Frame>, AmqpFrameError> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let type_id = self.buf[0];
        let frame_type = FrameType::from_type_id(type_id)?;
        let channel = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        let size = u32::from_be_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]]);

        if size > self.max_frame_size {
            return Err(AmqpFrameError::OversizedFrame {
                size,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + size as usize + 1;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_SIZE);
        let payload = self.buf.split_to(size as usize).freeze();
        let marker = self.buf.get_u8();
        if marker != FRAME_END {
            return Err(AmqpFrameError::MissingEndMarker { got: marker });
        }

        Ok(Some(Frame {
            frame_type,
            channel,
            payload,
        }))
    }
}
