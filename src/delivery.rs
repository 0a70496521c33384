//! The outbound message delivery pipeline.
//!
//! A delivery is a composite of a method frame (`Basic.Deliver`,
//! `Basic.Get-Ok` or `Basic.Return`), a content header and zero or more
//! body frames chunked to the negotiated max frame size. Content may be
//! gzip-bridged on the way out: inflated for clients that did not
//! advertise compression support, deflated above a threshold for clients
//! that did.

pub mod compression;

use bytes::Bytes;

use crate::connection::EngineHandle;
use crate::frame::{Frame, FRAME_OVERHEAD};
use crate::message::{ContentHeaderBody, MessageMetadata};
use crate::methods::{BasicCancelOk, BasicDeliver, BasicGetOk, BasicReturn};
use crate::wire::ShortStr;

use compression::{deflate_if_possible, inflate_if_possible, GZIP_CONTENT_ENCODING};

/// A stored message resolved to its native 0-8 representation.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub metadata: MessageMetadata,
    pub content: Bytes,
}

/// Per-delivery instance properties.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeliveryProperties {
    pub redelivered: bool,
}

/// Encoder writing deliveries through an [`EngineHandle`].
pub struct DeliveryEncoder {
    handle: EngineHandle,
}

impl DeliveryEncoder {
    /// Create an encoder bound to `handle`.
    #[must_use]
    pub fn new(handle: EngineHandle) -> Self {
        Self { handle }
    }

    /// Write a `Basic.Deliver` for `message`; returns the body octets
    /// written.
    pub fn write_deliver(
        &self,
        message: &OutboundMessage,
        props: DeliveryProperties,
        channel: u16,
        delivery_tag: u64,
        consumer_tag: &ShortStr,
    ) -> u64 {
        let publish = &message.metadata.publish_info;
        let deliver = BasicDeliver {
            consumer_tag: consumer_tag.clone(),
            delivery_tag,
            redelivered: props.redelivered,
            exchange: publish.exchange.clone(),
            routing_key: publish.routing_key.clone(),
        };
        self.write_message_delivery(message, channel, deliver.encode_payload())
    }

    /// Write a `Basic.Get-Ok` carrying the residual queue depth.
    pub fn write_get_ok(
        &self,
        message: &OutboundMessage,
        props: DeliveryProperties,
        channel: u16,
        delivery_tag: u64,
        message_count: u32,
    ) -> u64 {
        let publish = &message.metadata.publish_info;
        let get_ok = BasicGetOk {
            delivery_tag,
            redelivered: props.redelivered,
            exchange: publish.exchange.clone(),
            routing_key: publish.routing_key.clone(),
            message_count,
        };
        self.write_message_delivery(message, channel, get_ok.encode_payload())
    }

    /// Bounce an unroutable message back with `Basic.Return`.
    pub fn write_return(
        &self,
        message: &OutboundMessage,
        channel: u16,
        reply_code: u16,
        reply_text: &ShortStr,
    ) -> u64 {
        let publish = &message.metadata.publish_info;
        let basic_return = BasicReturn {
            reply_code,
            reply_text: reply_text.clone(),
            exchange: publish.exchange.clone(),
            routing_key: publish.routing_key.clone(),
        };
        self.write_message_delivery(message, channel, basic_return.encode_payload())
    }

    /// Confirm a consumer auto-close with `Basic.Cancel-Ok`.
    pub fn confirm_consumer_auto_close(&self, channel: u16, consumer_tag: &ShortStr) {
        let cancel_ok = BasicCancelOk {
            consumer_tag: consumer_tag.clone(),
        };
        self.handle
            .write_frame(&Frame::method(channel, cancel_ok.encode_payload()));
    }

    fn write_message_delivery(
        &self,
        message: &OutboundMessage,
        channel: u16,
        method_payload: Bytes,
    ) -> u64 {
        let header = &message.metadata.content_header;
        let body_size = message.content.len();
        let msg_compressed = is_gzip_encoded(header);
        let compression_supported = self.handle.is_compression_supported();

        if msg_compressed && !compression_supported {
            if let Some(inflated) = inflate_if_possible(&message.content) {
                let mut properties = header.properties.clone();
                properties.content_encoding = None;
                return self.write_modified(channel, method_payload, properties, inflated);
            }
        } else if !msg_compressed
            && compression_supported
            && header.properties.content_encoding.is_none()
            && body_size > self.handle.message_compression_threshold()
        {
            if let Some(deflated) = deflate_if_possible(&message.content) {
                let mut properties = header.properties.clone();
                properties.content_encoding =
                    Some(ShortStr::new(GZIP_CONTENT_ENCODING).expect("gzip fits a short string"));
                return self.write_modified(channel, method_payload, properties, deflated);
            }
        }

        self.write_unchanged(channel, method_payload, header.clone(), message.content.clone());
        body_size as u64
    }

    fn write_modified(
        &self,
        channel: u16,
        method_payload: Bytes,
        properties: crate::message::BasicProperties,
        content: Bytes,
    ) -> u64 {
        let body_size = content.len();
        let header = ContentHeaderBody::new(properties, body_size as u64);
        self.write_unchanged(channel, method_payload, header, content);
        body_size as u64
    }

    fn write_unchanged(
        &self,
        channel: u16,
        method_payload: Bytes,
        header: ContentHeaderBody,
        content: Bytes,
    ) {
        let method_frame = Frame::method(channel, method_payload);
        let header_frame = Frame::content_header(channel, header.encode_payload());

        if content.is_empty() {
            self.handle.write_frames(&[method_frame, header_frame]);
            return;
        }

        let max_body = (self.handle.max_frame_size() as usize)
            .saturating_sub(FRAME_OVERHEAD)
            .max(1);

        let first = content.slice(0..content.len().min(max_body));
        let mut written = first.len();
        self.handle.write_frames(&[
            method_frame,
            header_frame,
            Frame::content_body(channel, first),
        ]);

        while written < content.len() {
            let end = content.len().min(written + max_body);
            let chunk = content.slice(written..end);
            written = end;
            self.handle.write_frame(&Frame::content_body(channel, chunk));
        }
    }
}

fn is_gzip_encoded(header: &ContentHeaderBody) -> bool {
    header
        .properties
        .content_encoding
        .as_ref()
        .is_some_and(|encoding| encoding.as_str() == GZIP_CONTENT_ENCODING)
}

#[cfg(test)]
mod tests;
