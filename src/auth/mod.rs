//! Authentication for the dashboard platform's front door.
//!
//! Requests authenticate one of three ways:
//!
//! - **Session cookie**: resolved against the provider's session store
//! - **Basic credentials**: exchanged at the platform's login endpoint
//!   for a session cookie first
//! - **Bearer token**: validated against the identity provider's signing
//!   keys, then the user is provisioned and its org roles are
//!   reconciled with the token's entitlements
//!
//! All three paths end in a [`UserContext`] naming the platform user and
//! carrying a live session cookie.

pub mod authenticator;
pub mod claims;
mod context;
pub mod credentials;
pub mod jwks;
pub mod roles;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use authenticator::{AuthError, Authenticator};
pub use claims::{Claims, EntitlementSummary};
pub use context::UserContext;
pub use credentials::Credentials;
pub use jwks::{Jwk, JwksCache, JwksError, fallback_jwks};
pub use validator::{TokenRejection, TokenValidator};
