//! The channel contract consumed by the connection engine.
//!
//! A channel's internal state machine (consumers, unconfirmed deliveries,
//! transactions) lives beyond this crate. The engine requires only the
//! operations below: method/content delivery in wire order, a
//! `receive_complete` boundary after each inbound buffer, close/block
//! notifications and a pending-work pump.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::connection::EngineHandle;
use crate::error::{EngineError, ErrorCode};
use crate::message::ContentHeaderBody;
use crate::methods::ChannelMethod;

/// Shared handle to a channel owned by the registry.
pub type ChannelRef = Arc<Mutex<Box<dyn Channel>>>;

/// A session multiplexed over one connection.
pub trait Channel: Send {
    /// The 16-bit channel number.
    fn id(&self) -> u16;

    /// Deliver one decoded method in wire order.
    ///
    /// # Errors
    ///
    /// Channel-raised failures propagate to the engine, which maps them to
    /// the appropriate close scope.
    fn receive_method(&mut self, method: ChannelMethod) -> Result<(), EngineError>;

    /// Deliver a content-header frame.
    ///
    /// # Errors
    ///
    /// As for [`Channel::receive_method`].
    fn receive_content_header(&mut self, header: ContentHeaderBody) -> Result<(), EngineError>;

    /// Deliver a content-body frame.
    ///
    /// # Errors
    ///
    /// As for [`Channel::receive_method`].
    fn receive_content_body(&mut self, payload: Bytes) -> Result<(), EngineError>;

    /// Called exactly once after each inbound buffer that touched this
    /// channel has been fully decoded.
    ///
    /// # Errors
    ///
    /// As for [`Channel::receive_method`].
    fn receive_complete(&mut self) -> Result<(), EngineError>;

    /// Tear the channel down. `cause` is absent for an orderly close.
    fn close(&mut self, cause: Option<ErrorCode>, message: &str);

    /// Stop message delivery (connection-wide flow control).
    fn block(&mut self);

    /// Resume message delivery.
    fn unblock(&mut self);

    /// The transport's writability changed.
    fn transport_state_changed(&mut self);

    /// Perform one unit of deferred work; `false` when none remains.
    fn process_pending(&mut self) -> bool;

    /// Whether the channel is awaiting its own `Close-Ok`.
    fn is_closing(&self) -> bool;
}

/// Factory invoked on `Channel.Open`.
pub trait ChannelFactory: Send {
    /// Create the channel `channel_id` bound to `engine`.
    fn create(&self, engine: EngineHandle, channel_id: u16) -> Box<dyn Channel>;
}

/// Result of resolving a channel number during dispatch.
pub enum ChannelLookup {
    /// A live channel.
    Open(ChannelRef),
    /// The id is awaiting `Close-Ok`; drop everything except that method.
    Closing,
    /// Unknown id: dispatch must answer
    /// `Connection.Close(CHANNEL_ERROR, "Unknown channel id: N")`.
    Missing,
}
