//! Basic-class bodies the broker writes towards consumers.
//!
//! These four carry deliveries and their confirmations. Their opcodes are
//! identical across 0-8, 0-9 and 0-9-1, so each body encodes its own
//! payload rather than going through the registry.

use bytes::{BufMut, Bytes, BytesMut};

use crate::wire::{put_short_string, ShortStr};

use super::BASIC_CLASS_ID;

fn payload_with_opcode(method_id: u16, estimate: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + estimate);
    buf.put_u16(BASIC_CLASS_ID);
    buf.put_u16(method_id);
    buf
}

/// `Basic.Deliver`: push one message to a consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicDeliver {
    pub consumer_tag: ShortStr,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
}

impl BasicDeliver {
    /// Serialise the method payload (class, method, arguments).
    #[must_use]
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = payload_with_opcode(
            60,
            self.consumer_tag.encoded_size()
                + 9
                + self.exchange.encoded_size()
                + self.routing_key.encoded_size(),
        );
        put_short_string(&mut buf, &self.consumer_tag);
        buf.put_u64(self.delivery_tag);
        buf.put_u8(u8::from(self.redelivered));
        put_short_string(&mut buf, &self.exchange);
        put_short_string(&mut buf, &self.routing_key);
        buf.freeze()
    }
}

/// `Basic.Get-Ok`: a synchronous fetch carrying residual queue depth.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicGetOk {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
    pub message_count: u32,
}

impl BasicGetOk {
    /// Serialise the method payload.
    #[must_use]
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = payload_with_opcode(
            71,
            13 + self.exchange.encoded_size() + self.routing_key.encoded_size(),
        );
        buf.put_u64(self.delivery_tag);
        buf.put_u8(u8::from(self.redelivered));
        put_short_string(&mut buf, &self.exchange);
        put_short_string(&mut buf, &self.routing_key);
        buf.put_u32(self.message_count);
        buf.freeze()
    }
}

/// `Basic.Return`: an unroutable mandatory/immediate message bounced back.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicReturn {
    pub reply_code: u16,
    pub reply_text: ShortStr,
    pub exchange: ShortStr,
    pub routing_key: ShortStr,
}

impl BasicReturn {
    /// Serialise the method payload.
    #[must_use]
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = payload_with_opcode(
            50,
            2 + self.reply_text.encoded_size()
                + self.exchange.encoded_size()
                + self.routing_key.encoded_size(),
        );
        buf.put_u16(self.reply_code);
        put_short_string(&mut buf, &self.reply_text);
        put_short_string(&mut buf, &self.exchange);
        put_short_string(&mut buf, &self.routing_key);
        buf.freeze()
    }
}

/// `Basic.Cancel-Ok`: confirmation written when a consumer is auto-closed.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicCancelOk {
    pub consumer_tag: ShortStr,
}

impl BasicCancelOk {
    /// Serialise the method payload.
    #[must_use]
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = payload_with_opcode(31, self.consumer_tag.encoded_size());
        put_short_string(&mut buf, &self.consumer_tag);
        buf.freeze()
    }
}
