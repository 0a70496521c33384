//! Field tables: the ordered name/typed-value maps carried by
//! `Connection.Start`, `Connection.Start-Ok` and message headers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::AmqpFrameError;

use super::codec::{ensure, get_long_string, get_short_string, put_long_string, put_short_string, ShortStr};

/// A single typed field-table value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Timestamp(u64),
    LongString(Bytes),
    Table(FieldTable),
    Void,
}

impl FieldValue {
    fn discriminant(&self) -> u8 {
        match self {
            Self::Bool(_) => b't',
            Self::I8(_) => b'b',
            Self::I16(_) => b's',
            Self::I32(_) => b'I',
            Self::I64(_) => b'l',
            Self::F32(_) => b'f',
            Self::F64(_) => b'd',
            Self::Timestamp(_) => b'T',
            Self::LongString(_) => b'S',
            Self::Table(_) => b'F',
            Self::Void => b'V',
        }
    }

    fn encoded_size(&self) -> usize {
        1 + match self {
            Self::Bool(_) | Self::I8(_) => 1,
            Self::I16(_) => 2,
            Self::I32(_) | Self::F32(_) => 4,
            Self::I64(_) | Self::F64(_) | Self::Timestamp(_) => 8,
            Self::LongString(v) => 4 + v.len(),
            Self::Table(t) => 4 + t.entries_size(),
            Self::Void => 0,
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.discriminant());
        match self {
            Self::Bool(v) => dst.put_u8(u8::from(*v)),
            Self::I8(v) => dst.put_i8(*v),
            Self::I16(v) => dst.put_i16(*v),
            Self::I32(v) => dst.put_i32(*v),
            Self::I64(v) => dst.put_i64(*v),
            Self::F32(v) => dst.put_f32(*v),
            Self::F64(v) => dst.put_f64(*v),
            Self::Timestamp(v) => dst.put_u64(*v),
            Self::LongString(v) => put_long_string(dst, v),
            Self::Table(t) => t.encode(dst),
            Self::Void => {}
        }
    }

    fn decode(src: &mut impl Buf) -> Result<Self, AmqpFrameError> {
        ensure(src, 1, "field value type")?;
        let discriminant = src.get_u8();
        let value = match discriminant {
            b't' => {
                ensure(src, 1, "boolean field")?;
                Self::Bool(src.get_u8() != 0)
            }
            b'b' => {
                ensure(src, 1, "i8 field")?;
                Self::I8(src.get_i8())
            }
            b's' => {
                ensure(src, 2, "i16 field")?;
                Self::I16(src.get_i16())
            }
            b'I' => {
                ensure(src, 4, "i32 field")?;
                Self::I32(src.get_i32())
            }
            b'l' => {
                ensure(src, 8, "i64 field")?;
                Self::I64(src.get_i64())
            }
            b'f' => {
                ensure(src, 4, "f32 field")?;
                Self::F32(src.get_f32())
            }
            b'd' => {
                ensure(src, 8, "f64 field")?;
                Self::F64(src.get_f64())
            }
            b'T' => {
                ensure(src, 8, "timestamp field")?;
                Self::Timestamp(src.get_u64())
            }
            b'S' => Self::LongString(get_long_string(src)?),
            b'F' => Self::Table(FieldTable::decode(src)?),
            b'V' => Self::Void,
            _ => return Err(AmqpFrameError::MalformedField("field value type")),
        };
        Ok(value)
    }
}

/// An ordered collection of named typed values.
///
/// Insertion order is preserved because it is visible on the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldTable {
    entries: Vec<(ShortStr, FieldValue)>,
}

impl FieldTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a value, replacing any entry with the same name.
    ///
    /// # Panics
    ///
    /// Panics if `name` exceeds the short-string limit; table keys are
    /// broker-chosen constants.
    pub fn insert(&mut self, name: &str, value: FieldValue) {
        let name = ShortStr::new(name).expect("field table key within short string limit");
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == &name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Insert a UTF-8 value as a long string.
    pub fn insert_string(&mut self, name: &str, value: &str) {
        self.insert(name, FieldValue::LongString(Bytes::copy_from_slice(value.as_bytes())));
    }

    /// Look up a value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v)
    }

    /// Look up a long-string value and decode it as UTF-8.
    #[must_use]
    pub fn get_string(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(FieldValue::LongString(raw)) => std::str::from_utf8(raw).ok().map(str::to_owned),
            _ => None,
        }
    }

    /// Iterate entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShortStr, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    fn entries_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(n, v)| n.encoded_size() + v.encoded_size())
            .sum()
    }

    /// Encoded size including the `u32` length prefix.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        4 + self.entries_size()
    }

    /// Serialise as `u32 length || entries`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.entries_size() as u32);
        for (name, value) in &self.entries {
            put_short_string(dst, name);
            value.encode(dst);
        }
    }

    /// Decode a table from the buffer.
    ///
    /// # Errors
    ///
    /// Returns an [`AmqpFrameError`] on truncation, an unknown value type,
    /// or entries overrunning the declared table length.
    pub fn decode(src: &mut impl Buf) -> Result<Self, AmqpFrameError> {
        ensure(src, 4, "field table length")?;
        let declared = src.get_u32() as usize;
        ensure(src, declared, "field table")?;
        let mut body = src.copy_to_bytes(declared);
        let mut entries = Vec::new();
        while body.has_remaining() {
            let name = get_short_string(&mut body)?;
            let value = FieldValue::decode(&mut body)?;
            entries.push((name, value));
        }
        Ok(Self { entries })
    }
}
