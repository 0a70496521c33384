//! Per-connection protocol engine for an AMQP 0-8/0-9/0-9-1 message
//! broker.
//!
//! The crate owns a single client connection end to end: it decodes
//! inbound framed traffic into protocol methods, drives the
//! connection-lifecycle handshake (version negotiation, SASL, tuning,
//! virtual-host attach), multiplexes channels, frames outbound replies
//! and message deliveries, enforces resource bounds, and performs orderly
//! or forced teardown. The broker's model tree, message store, routing
//! fabric and management planes are external collaborators reached
//! through the contracts in [`channel`], [`transport`] and [`vhost`].

pub mod admission;
pub mod auth;
pub mod channel;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod events;
pub mod frame;
pub mod message;
pub mod methods;
pub mod server;
pub mod transport;
pub mod vhost;
pub mod wire;

#[doc(hidden)]
pub mod test_helpers;

pub use admission::ConnectionAdmission;
pub use auth::{AuthOutcome, Authenticator, SaslServer, SecurityContext, StaticAuthenticator};
pub use channel::{Channel, ChannelFactory, ChannelLookup};
pub use config::{BrokerConfig, PortConfig};
pub use connection::{AmqpConnection, ConnectionState, EngineHandle};
pub use delivery::{DeliveryEncoder, DeliveryProperties, OutboundMessage};
pub use error::{AmqpFrameError, EngineError, ErrorCode};
pub use events::EventLogger;
pub use frame::{Frame, FrameDecoder, FrameType, ProtocolInitiation, ProtocolVersion};
pub use message::{BasicProperties, ContentHeaderBody, MessageMetadata, MessagePublishInfo};
pub use methods::{ChannelMethod, MethodRegistry};
pub use server::AmqpServer;
pub use transport::{FrameSender, NetworkControl};
pub use vhost::{VirtualHost, VirtualHostRegistry, VirtualHostState};
