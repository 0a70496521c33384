//! SASL authentication seams.
//!
//! The engine consumes an [`Authenticator`] supplied by the port: it
//! advertises the mechanism list in `Connection.Start` and creates one
//! [`SaslServer`] per authentication attempt. Challenge/response rounds
//! travel as `Connection.Secure` / `Connection.Secure-Ok` until the
//! server reports a terminal outcome.

pub mod sasl;

pub use sasl::{
    AuthError,
    AuthOutcome,
    Authenticator,
    Principal,
    SaslServer,
    SecurityContext,
    StaticAuthenticator,
};
