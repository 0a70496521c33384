//! SASL server abstraction with PLAIN and ANONYMOUS mechanisms.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

/// An authenticated identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

impl Principal {
    /// Create a principal for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The authorisation context carried through dispatch.
///
/// Populated on SASL success and extended with the virtual host on
/// `Connection.Open`; authorisation decisions consult this rather than
/// any ambient state.
#[derive(Clone, Debug, Default)]
pub struct SecurityContext {
    principal: Option<Principal>,
    virtual_host: Option<String>,
}

impl SecurityContext {
    /// The authenticated principal, if authentication has completed.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// The attached virtual host, if `Connection.Open` has completed.
    #[must_use]
    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }

    /// Record the authenticated principal.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Record the attached virtual host.
    pub fn set_virtual_host(&mut self, name: impl Into<String>) {
        self.virtual_host = Some(name.into());
    }
}

/// Terminal or continuing result of one SASL round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Authentication complete; the connection is owned by `Principal`.
    Success(Principal),
    /// Another round is required; send the payload as `Connection.Secure`.
    Challenge(Vec<u8>),
    /// Authentication failed. The reason stays server-side.
    Failure(String),
}

/// Errors creating a SASL server for a requested mechanism.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The client requested a mechanism the provider does not offer.
    #[error("unsupported SASL mechanism: {0}")]
    UnsupportedMechanism(String),
}

/// Server side of one authentication exchange.
pub trait SaslServer: Send {
    /// The mechanism this server speaks.
    fn mechanism(&self) -> &str;

    /// Evaluate one client response.
    fn step(&mut self, response: &[u8]) -> AuthOutcome;
}

/// Provider of mechanisms and per-attempt SASL servers.
pub trait Authenticator: Send + Sync {
    /// Mechanism names in advertisement order.
    fn mechanisms(&self) -> Vec<String>;

    /// Create a server for `mechanism`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedMechanism`] when the mechanism is
    /// not offered.
    fn create_sasl_server(
        &self,
        mechanism: &str,
        local_fqdn: &str,
    ) -> Result<Box<dyn SaslServer>, AuthError>;
}

/// An authenticator over a fixed user database.
///
/// Offers PLAIN always and ANONYMOUS when enabled. Suitable for the demo
/// binary and tests; production deployments plug in their own provider.
pub struct StaticAuthenticator {
    users: Arc<HashMap<String, String>>,
    allow_anonymous: bool,
}

impl StaticAuthenticator {
    /// Create an authenticator over `users` (name to password).
    #[must_use]
    pub fn new(users: HashMap<String, String>) -> Self {
        Self {
            users: Arc::new(users),
            allow_anonymous: false,
        }
    }

    /// Also offer the ANONYMOUS mechanism.
    #[must_use]
    pub fn with_anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn mechanisms(&self) -> Vec<String> {
        let mut mechanisms = vec!["PLAIN".to_owned()];
        if self.allow_anonymous {
            mechanisms.push("ANONYMOUS".to_owned());
        }
        mechanisms
    }

    fn create_sasl_server(
        &self,
        mechanism: &str,
        _local_fqdn: &str,
    ) -> Result<Box<dyn SaslServer>, AuthError> {
        match mechanism {
            "PLAIN" => Ok(Box::new(PlainSaslServer {
                users: Arc::clone(&self.users),
            })),
            "ANONYMOUS" if self.allow_anonymous => Ok(Box::new(AnonymousSaslServer)),
            other => Err(AuthError::UnsupportedMechanism(other.to_owned())),
        }
    }
}

/// PLAIN: `authzid NUL authcid NUL password` in a single response.
struct PlainSaslServer {
    users: Arc<HashMap<String, String>>,
}

impl SaslServer for PlainSaslServer {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn step(&mut self, response: &[u8]) -> AuthOutcome {
        let mut parts = response.split(|&b| b == 0);
        let (Some(_authzid), Some(authcid), Some(password), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return AuthOutcome::Failure("malformed PLAIN response".to_owned());
        };
        let Ok(name) = std::str::from_utf8(authcid) else {
            return AuthOutcome::Failure("non-UTF-8 authentication id".to_owned());
        };
        match self.users.get(name) {
            Some(expected) if expected.as_bytes() == password => {
                AuthOutcome::Success(Principal::new(name))
            }
            _ => AuthOutcome::Failure(format!("authentication failed for user '{name}'")),
        }
    }
}

/// ANONYMOUS: any (possibly empty) trace string succeeds.
struct AnonymousSaslServer;

impl SaslServer for AnonymousSaslServer {
    fn mechanism(&self) -> &str {
        "ANONYMOUS"
    }

    fn step(&mut self, _response: &[u8]) -> AuthOutcome {
        AuthOutcome::Success(Principal::new("anonymous"))
    }
}
