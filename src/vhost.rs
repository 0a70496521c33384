//! Virtual-host contracts consumed on `Connection.Open`.

use std::sync::Arc;

use thiserror::Error;

use crate::auth::SecurityContext;

/// Lifecycle state of a virtual host, as far as admission cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualHostState {
    /// Accepting connections.
    Active,
    /// Administratively stopped.
    Stopped,
    /// Failed; possibly redirecting elsewhere.
    Errored,
}

/// Refusal raised by a connection authorisation check.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AccessRefused(pub String);

/// A logical namespace within the broker.
pub trait VirtualHost: Send + Sync {
    /// The host's name as addressed by clients.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> VirtualHostState;

    /// Host to redirect clients to while not active, if configured.
    fn redirect_host(&self) -> Option<String> {
        None
    }

    /// Authorise a new connection for the authenticated principal.
    ///
    /// # Errors
    ///
    /// Returns [`AccessRefused`] to deny; the engine answers
    /// `Connection.Close(ACCESS_REFUSED)`.
    fn authorise_create_connection(&self, security: &SecurityContext) -> Result<(), AccessRefused>;

    /// A connection has attached.
    fn connection_registered(&self, _connection_id: u64) {}

    /// A connection has detached.
    fn connection_deregistered(&self, _connection_id: u64) {}
}

/// Resolver from requested names to virtual hosts.
pub trait VirtualHostRegistry: Send + Sync {
    /// Look up `name`; the engine has already stripped a leading `/`.
    fn virtual_host(&self, name: &str) -> Option<Arc<dyn VirtualHost>>;
}
