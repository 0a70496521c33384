//! Length-prefixed string primitives.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmqpFrameError;

/// Maximum octet length of a short string.
pub const SHORT_STRING_MAX: usize = 255;

/// A string limited to 255 octets of UTF-8, encoded as `u8 length || bytes`.
///
/// Exchange names, routing keys, consumer tags and field-table keys all use
/// this representation on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShortStr(String);

impl ShortStr {
    /// Create a short string, rejecting oversize input.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpFrameError::MalformedField`] if `value` exceeds 255
    /// octets.
    pub fn new(value: impl Into<String>) -> Result<Self, AmqpFrameError> {
        let value = value.into();
        if value.len() > SHORT_STRING_MAX {
            return Err(AmqpFrameError::MalformedField("short string"));
        }
        Ok(Self(value))
    }

    /// Create a short string, truncating oversize input at a character
    /// boundary.
    ///
    /// Reply texts assembled from arbitrary diagnostic messages use this
    /// constructor so an overlong message can never poison the close frame
    /// carrying it.
    #[must_use]
    pub fn truncated(value: &str) -> Self {
        if value.len() <= SHORT_STRING_MAX {
            return Self(value.to_owned());
        }
        let mut end = SHORT_STRING_MAX;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        Self(value[..end].to_owned())
    }

    /// View as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Octet length of the string content.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded size including the length prefix.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        1 + self.0.len()
    }
}

impl fmt::Display for ShortStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ShortStr {
    type Error = AmqpFrameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Encoded size of `value` as a short string.
#[must_use]
pub fn encoded_short_string_size(value: &ShortStr) -> usize {
    value.encoded_size()
}

pub(crate) fn ensure(src: &impl Buf, needed: usize, what: &'static str) -> Result<(), AmqpFrameError> {
    if src.remaining() < needed {
        return Err(AmqpFrameError::Truncated(what));
    }
    Ok(())
}

/// Write a short string.
pub fn put_short_string(dst: &mut BytesMut, value: &ShortStr) {
    dst.put_u8(value.len() as u8);
    dst.put_slice(value.as_str().as_bytes());
}

/// Read a short string.
///
/// # Errors
///
/// Returns [`AmqpFrameError::Truncated`] if the buffer ends early and
/// [`AmqpFrameError::InvalidUtf8`] on non-UTF-8 content.
pub fn get_short_string(src: &mut impl Buf) -> Result<ShortStr, AmqpFrameError> {
    ensure(src, 1, "short string length")?;
    let len = src.get_u8() as usize;
    ensure(src, len, "short string")?;
    let raw = src.copy_to_bytes(len);
    let text = std::str::from_utf8(&raw).map_err(|_| AmqpFrameError::InvalidUtf8("short string"))?;
    Ok(ShortStr(text.to_owned()))
}

/// Write a long string (`u32 length || bytes`).
pub fn put_long_string(dst: &mut BytesMut, value: &[u8]) {
    dst.put_u32(value.len() as u32);
    dst.put_slice(value);
}

/// Read a long string.
///
/// # Errors
///
/// Returns [`AmqpFrameError::Truncated`] if the buffer ends early.
pub fn get_long_string(src: &mut impl Buf) -> Result<Bytes, AmqpFrameError> {
    ensure(src, 4, "long string length")?;
    let len = src.get_u32() as usize;
    ensure(src, len, "long string")?;
    Ok(src.copy_to_bytes(len))
}
