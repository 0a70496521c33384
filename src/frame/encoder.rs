//! Outbound frame serialisation.

use bytes::{BufMut, BytesMut};

use super::types::{Frame, FRAME_END, FRAME_OVERHEAD};

/// Total encoded size of `frame` including overhead.
#[must_use]
pub fn encoded_frame_size(frame: &Frame) -> usize {
    FRAME_OVERHEAD + frame.payload.len()
}

/// Serialise `frame` into `dst`: type, channel, size, payload, end marker.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(encoded_frame_size(frame));
    dst.put_u8(frame.frame_type.type_id());
    dst.put_u16(frame.channel);
    dst.put_u32(frame.payload.len() as u32);
    dst.put_slice(&frame.payload);
    dst.put_u8(FRAME_END);
}
