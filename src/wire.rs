//! AMQP field-type encoding primitives.
//!
//! Everything above the frame envelope is built from a small grammar of
//! big-endian integers, length-prefixed strings and field tables. This
//! module owns that grammar; the frame and method layers compose it.

pub mod codec;
pub mod field_table;

pub use codec::{
    encoded_short_string_size,
    get_long_string,
    get_short_string,
    put_long_string,
    put_short_string,
    ShortStr,
};
pub use field_table::{FieldTable, FieldValue};
