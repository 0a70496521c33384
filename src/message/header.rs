//! The content header: per-message properties plus declared body size.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmqpFrameError;
use crate::wire::codec::ensure;

use super::properties::BasicProperties;

/// Payload of a content-header frame.
///
/// `class_id` is always the basic class for message traffic; `weight` is
/// reserved and zero on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentHeaderBody {
    pub class_id: u16,
    pub weight: u16,
    pub body_size: u64,
    pub properties: BasicProperties,
}

impl ContentHeaderBody {
    /// Build a basic-class content header.
    #[must_use]
    pub fn new(properties: BasicProperties, body_size: u64) -> Self {
        Self {
            class_id: crate::methods::BASIC_CLASS_ID,
            weight: 0,
            body_size,
            properties,
        }
    }

    /// Encoded size of the full header payload.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        12 + self.properties.encoded_size()
    }

    /// Serialise class, weight, body size and properties.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.class_id);
        dst.put_u16(self.weight);
        dst.put_u64(self.body_size);
        self.properties.encode(dst);
    }

    /// Serialise into a fresh payload buffer.
    #[must_use]
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a content-header payload.
    ///
    /// # Errors
    ///
    /// Returns an [`AmqpFrameError`] on truncation or malformed
    /// properties.
    pub fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        ensure(src, 12, "content header")?;
        Ok(Self {
            class_id: src.get_u16(),
            weight: src.get_u16(),
            body_size: src.get_u64(),
            properties: BasicProperties::decode(src)?,
        })
    }
}
