//! Basic-class content-header properties and their property-flag codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmqpFrameError;
use crate::wire::codec::ensure;
use crate::wire::{get_short_string, put_short_string, FieldTable, ShortStr};

/// Delivery-mode value marking a message persistent.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

const CONTENT_TYPE_FLAG: u16 = 1 << 15;
const CONTENT_ENCODING_FLAG: u16 = 1 << 14;
const HEADERS_FLAG: u16 = 1 << 13;
const DELIVERY_MODE_FLAG: u16 = 1 << 12;
const PRIORITY_FLAG: u16 = 1 << 11;
const CORRELATION_ID_FLAG: u16 = 1 << 10;
const REPLY_TO_FLAG: u16 = 1 << 9;
const EXPIRATION_FLAG: u16 = 1 << 8;
const MESSAGE_ID_FLAG: u16 = 1 << 7;
const TIMESTAMP_FLAG: u16 = 1 << 6;
const TYPE_FLAG: u16 = 1 << 5;
const USER_ID_FLAG: u16 = 1 << 4;
const APP_ID_FLAG: u16 = 1 << 3;
const CLUSTER_ID_FLAG: u16 = 1 << 2;
const CONTINUATION_FLAG: u16 = 1;

fn put_opt_short(dst: &mut BytesMut, value: &Option<ShortStr>) {
    if let Some(v) = value {
        put_short_string(dst, v);
    }
}

/// The fourteen standard per-message properties.
///
/// Each field is optional; presence is recorded in a leading 16-bit flag
/// word, most significant bit first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicProperties {
    pub content_type: Option<ShortStr>,
    pub content_encoding: Option<ShortStr>,
    pub headers: Option<FieldTable>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<ShortStr>,
    pub reply_to: Option<ShortStr>,
    pub expiration: Option<ShortStr>,
    pub message_id: Option<ShortStr>,
    pub timestamp: Option<u64>,
    pub message_type: Option<ShortStr>,
    pub user_id: Option<ShortStr>,
    pub app_id: Option<ShortStr>,
    pub cluster_id: Option<ShortStr>,
}

impl BasicProperties {
    /// Whether the message is marked persistent.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == Some(DELIVERY_MODE_PERSISTENT)
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        let mut set = |present: bool, flag: u16| {
            if present {
                flags |= flag;
            }
        };
        set(self.content_type.is_some(), CONTENT_TYPE_FLAG);
        set(self.content_encoding.is_some(), CONTENT_ENCODING_FLAG);
        set(self.headers.is_some(), HEADERS_FLAG);
        set(self.delivery_mode.is_some(), DELIVERY_MODE_FLAG);
        set(self.priority.is_some(), PRIORITY_FLAG);
        set(self.correlation_id.is_some(), CORRELATION_ID_FLAG);
        set(self.reply_to.is_some(), REPLY_TO_FLAG);
        set(self.expiration.is_some(), EXPIRATION_FLAG);
        set(self.message_id.is_some(), MESSAGE_ID_FLAG);
        set(self.timestamp.is_some(), TIMESTAMP_FLAG);
        set(self.message_type.is_some(), TYPE_FLAG);
        set(self.user_id.is_some(), USER_ID_FLAG);
        set(self.app_id.is_some(), APP_ID_FLAG);
        set(self.cluster_id.is_some(), CLUSTER_ID_FLAG);
        flags
    }

    fn short_size(value: &Option<ShortStr>) -> usize {
        value.as_ref().map_or(0, ShortStr::encoded_size)
    }

    /// Encoded size including the flag word.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        2 + Self::short_size(&self.content_type)
            + Self::short_size(&self.content_encoding)
            + self.headers.as_ref().map_or(0, FieldTable::encoded_size)
            + self.delivery_mode.map_or(0, |_| 1)
            + self.priority.map_or(0, |_| 1)
            + Self::short_size(&self.correlation_id)
            + Self::short_size(&self.reply_to)
            + Self::short_size(&self.expiration)
            + Self::short_size(&self.message_id)
            + self.timestamp.map_or(0, |_| 8)
            + Self::short_size(&self.message_type)
            + Self::short_size(&self.user_id)
            + Self::short_size(&self.app_id)
            + Self::short_size(&self.cluster_id)
    }

    /// Serialise flags then present fields in flag order.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.flags());
        put_opt_short(dst, &self.content_type);
        put_opt_short(dst, &self.content_encoding);
        if let Some(headers) = &self.headers {
            headers.encode(dst);
        }
        if let Some(mode) = self.delivery_mode {
            dst.put_u8(mode);
        }
        if let Some(priority) = self.priority {
            dst.put_u8(priority);
        }
        put_opt_short(dst, &self.correlation_id);
        put_opt_short(dst, &self.reply_to);
        put_opt_short(dst, &self.expiration);
        put_opt_short(dst, &self.message_id);
        if let Some(timestamp) = self.timestamp {
            dst.put_u64(timestamp);
        }
        put_opt_short(dst, &self.message_type);
        put_opt_short(dst, &self.user_id);
        put_opt_short(dst, &self.app_id);
        put_opt_short(dst, &self.cluster_id);
    }

    /// Decode flags and fields.
    ///
    /// # Errors
    ///
    /// Returns an [`AmqpFrameError`] on truncation or if the continuation
    /// bit is set (a second flag word is never valid for the basic class).
    pub fn decode(src: &mut Bytes) -> Result<Self, AmqpFrameError> {
        ensure(src, 2, "property flags")?;
        let flags = src.get_u16();
        if flags & CONTINUATION_FLAG != 0 {
            return Err(AmqpFrameError::MalformedField("property flag continuation"));
        }

        let get_short = |src: &mut Bytes, flag: u16| -> Result<Option<ShortStr>, AmqpFrameError> {
            if flags & flag != 0 {
                Ok(Some(get_short_string(src)?))
            } else {
                Ok(None)
            }
        };

        let content_type = get_short(src, CONTENT_TYPE_FLAG)?;
        let content_encoding = get_short(src, CONTENT_ENCODING_FLAG)?;
        let headers = if flags & HEADERS_FLAG != 0 {
            Some(FieldTable::decode(src)?)
        } else {
            None
        };
        let delivery_mode = if flags & DELIVERY_MODE_FLAG != 0 {
            ensure(src, 1, "delivery mode")?;
            Some(src.get_u8())
        } else {
            None
        };
        let priority = if flags & PRIORITY_FLAG != 0 {
            ensure(src, 1, "priority")?;
            Some(src.get_u8())
        } else {
            None
        };
        let correlation_id = get_short(src, CORRELATION_ID_FLAG)?;
        let reply_to = get_short(src, REPLY_TO_FLAG)?;
        let expiration = get_short(src, EXPIRATION_FLAG)?;
        let message_id = get_short(src, MESSAGE_ID_FLAG)?;
        let timestamp = if flags & TIMESTAMP_FLAG != 0 {
            ensure(src, 8, "timestamp")?;
            Some(src.get_u64())
        } else {
            None
        };
        let message_type = get_short(src, TYPE_FLAG)?;
        let user_id = get_short(src, USER_ID_FLAG)?;
        let app_id = get_short(src, APP_ID_FLAG)?;
        let cluster_id = get_short(src, CLUSTER_ID_FLAG)?;

        Ok(Self {
            content_type,
            content_encoding,
            headers,
            delivery_mode,
            priority,
            correlation_id,
            reply_to,
            expiration,
            message_id,
            timestamp,
            message_type,
            user_id,
            app_id,
            cluster_id,
        })
    }
}
