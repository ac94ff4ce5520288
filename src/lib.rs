// Core modules
pub mod auth;
pub mod config;
pub mod platform;
pub mod provider;
pub mod server;
pub mod types;

// Re-export key types and functions
pub use auth::{
    AuthError, Authenticator, Claims, Jwk, JwksCache, TokenRejection, TokenValidator, UserContext,
    fallback_jwks,
};
pub use config::{ConfigError, GatewayConfig};
pub use platform::{HttpPlatformClient, PlatformClient, PlatformError};
pub use provider::{AuthProvider, InMemoryProvider, ProviderError};
pub use types::{SessionCookie, Username};

use std::sync::Arc;

/// Convenience function to wire a fully configured authenticator.
///
/// Validates the config, builds the key cache (filling it from the
/// identity provider, or from the well-known fallback key when that
/// fails), and ties the token validator and platform login client to
/// the given provider backend.
pub async fn create_gateway(
    config: &GatewayConfig,
    provider: Arc<dyn AuthProvider>,
) -> Result<Arc<Authenticator>, ConfigError> {
    config.validate()?;

    let keys = Arc::new(JwksCache::new(config.jwks_url(), fallback_jwks()));
    keys.startup().await;

    let validator = TokenValidator::new(keys, config.client_id.clone());
    let platform = Arc::new(HttpPlatformClient::new(
        config.platform_base_url.clone(),
        config.session_cookie_name.clone(),
    ));

    Ok(Arc::new(Authenticator::new(
        validator,
        provider,
        platform,
        config.session_cookie_name.clone(),
    )))
}
