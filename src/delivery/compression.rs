//! Gzip helpers for delivery-time content bridging.
//!
//! Both directions degrade gracefully: if the content cannot be
//! transformed the message is sent as stored.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;

/// The content-encoding value marking gzip content.
pub const GZIP_CONTENT_ENCODING: &str = "gzip";

/// Gzip `content`, or `None` if compression fails.
#[must_use]
pub fn deflate_if_possible(content: &Bytes) -> Option<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2), Compression::default());
    let result = encoder
        .write_all(content)
        .and_then(|()| encoder.finish());
    match result {
        Ok(compressed) => Some(Bytes::from(compressed)),
        Err(e) => {
            warn!("unable to compress message payload for consumer with gzip, message will be sent as is: {e}");
            None
        }
    }
}

/// Gunzip `content`, or `None` if decompression fails.
#[must_use]
pub fn inflate_if_possible(content: &Bytes) -> Option<Bytes> {
    let mut decoder = GzDecoder::new(content.as_ref());
    let mut inflated = Vec::with_capacity(content.len() * 2);
    match decoder.read_to_end(&mut inflated) {
        Ok(_) => Some(Bytes::from(inflated)),
        Err(e) => {
            warn!("unable to decompress message payload for consumer with gzip, message will be sent as is: {e}");
            None
        }
    }
}
