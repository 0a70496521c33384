//! Durable message-metadata encoding.
//!
//! A publish body and a content header are treated as a single unit by
//! the message store. The layout is stable and persisted:
//!
//! ```text
//! content_header_size : u32
//! content_header_body : bytes[content_header_size]
//! exchange            : short_string
//! routing_key         : short_string
//! flags               : u8    (bit0 mandatory, bit1 immediate)
//! arrival_time        : i64   (ms since epoch)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmqpFrameError;
use crate::wire::codec::ensure;
use crate::wire::{get_short_string, put_short_string, ShortStr};

use super::header::ContentHeaderBody;

const MANDATORY_FLAG: u8 = 1;
const IMMEDIATE_FLAG: u8 = 2;

/// The routing facts recorded when a message was published.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessagePublishInfo {
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
    pub mandatory: bool,
    pub immediate: bool,
}

/// Publish info, content header and arrival time as one storable unit.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageMetadata {
    pub publish_info: MessagePublishInfo,
    pub content_header: ContentHeaderBody,
    pub arrival_time: i64,
}

impl MessageMetadata {
    /// Construct metadata for a freshly published message.
    #[must_use]
    pub fn new(
        publish_info: MessagePublishInfo,
        content_header: ContentHeaderBody,
        arrival_time: i64,
    ) -> Self {
        Self {
            publish_info,
            content_header,
            arrival_time,
        }
    }

    /// Declared size of the message body.
    #[must_use]
    pub fn content_size(&self) -> u64 {
        self.content_header.body_size
    }

    /// Whether the message must survive a broker restart.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.content_header.properties.is_persistent()
    }

    /// Exact octet count of the storable encoding.
    #[must_use]
    pub fn storable_size(&self) -> usize {
        self.content_header.encoded_size()
            + 4
            + self.publish_info.exchange.encoded_size()
            + self.publish_info.routing_key.encoded_size()
            + 1
            + 8
    }

    /// Serialise to the storage layout.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.storable_size());
        dst.put_u32(self.content_header.encoded_size() as u32);
        self.content_header.encode(dst);
        put_short_string(dst, &self.publish_info.exchange);
        put_short_string(dst, &self.publish_info.routing_key);
        let mut flags = 0;
        if self.publish_info.mandatory {
            flags |= MANDATORY_FLAG;
        }
        if self.publish_info.immediate {
            flags |= IMMEDIATE_FLAG;
        }
        dst.put_u8(flags);
        dst.put_i64(self.arrival_time);
    }

    /// Decode the storage layout.
    ///
    /// # Errors
    ///
    /// Returns an [`AmqpFrameError`]; callers surface it as a
    /// connection-scoped failure that tears the connection down.
    pub fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        ensure(src, 4, "metadata header size")?;
        let header_size = src.get_u32() as usize;
        ensure(src, header_size, "metadata content header")?;
        let mut header_bytes = src.copy_to_bytes(header_size);
        let content_header = ContentHeaderBody::decode(&mut header_bytes)?;

        let exchange = get_short_string(src)?;
        let routing_key = get_short_string(src)?;
        ensure(src, 9, "metadata trailer")?;
        let flags = src.get_u8();
        let arrival_time = src.get_i64();

        Ok(Self {
            publish_info: MessagePublishInfo {
                exchange,
                routing_key,
                mandatory: flags & MANDATORY_FLAG != 0,
                immediate: flags & IMMEDIATE_FLAG != 0,
            },
            content_header,
            arrival_time,
        })
    }
}
