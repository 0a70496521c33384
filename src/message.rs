//! The per-message envelope: content-header properties, the content
//! header itself, and the durable metadata encoding consumed by the
//! message store.

pub mod header;
pub mod metadata;
pub mod properties;

pub use header::ContentHeaderBody;
pub use metadata::{MessageMetadata, MessagePublishInfo};
pub use properties::BasicProperties;
