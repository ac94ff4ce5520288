use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Path under the identity-provider base URL serving the signing keys.
pub const JWKS_WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration/jwks";

/// Gateway configuration.
///
/// An empty `client_id` disables the audience check for employee tokens.
/// The identity provider is known to mis-populate the audience claim for
/// some registrations, so this escape hatch is deliberate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the identity provider (JWKS endpoint lives under it)
    pub idam_base_url: String,
    /// Client id this gateway is registered as at the identity provider
    #[serde(default)]
    pub client_id: String,
    /// Name of the platform session cookie
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,
    /// Base URL of the dashboard platform (login endpoint lives under it)
    pub platform_base_url: String,
}

fn default_session_cookie_name() -> String {
    "platform_session".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            idam_base_url: "https://idam.example.com".to_string(),
            client_id: String::new(),
            session_cookie_name: default_session_cookie_name(),
            platform_base_url: "http://dashboard:3000".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Create a config for the given identity provider and platform URLs.
    pub fn new(idam_base_url: impl Into<String>, platform_base_url: impl Into<String>) -> Self {
        Self {
            idam_base_url: idam_base_url.into(),
            platform_base_url: platform_base_url.into(),
            ..Default::default()
        }
    }

    /// Set the client id used for the employee audience check.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the session cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.session_cookie_name = name.into();
        self
    }

    /// Check that both base URLs parse. Called once at startup; a bad URL
    /// must stop the process before any request is served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.idam_base_url).map_err(|e| ConfigError::InvalidUrl {
            field: "idam_base_url",
            detail: e.to_string(),
        })?;
        Url::parse(&self.platform_base_url).map_err(|e| ConfigError::InvalidUrl {
            field: "platform_base_url",
            detail: e.to_string(),
        })?;
        Ok(())
    }

    /// Full URL of the identity provider's JWKS endpoint.
    pub fn jwks_url(&self) -> String {
        format!(
            "{}{}",
            self.idam_base_url.trim_end_matches('/'),
            JWKS_WELL_KNOWN_PATH
        )
    }
}

/// Errors raised while validating gateway configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// A configured base URL could not be parsed.
    InvalidUrl {
        field: &'static str,
        detail: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { field, detail } => {
                write!(f, "invalid URL in `{}`: {}", field, detail)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.session_cookie_name, "platform_session");
        assert!(config.client_id.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = GatewayConfig::new("https://idam.test", "http://dash.test")
            .with_client_id("dashgate-prod")
            .with_cookie_name("session");
        assert_eq!(config.idam_base_url, "https://idam.test");
        assert_eq!(config.platform_base_url, "http://dash.test");
        assert_eq!(config.client_id, "dashgate-prod");
        assert_eq!(config.session_cookie_name, "session");
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = GatewayConfig::new("not a url", "http://dash.test");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idam_base_url"));

        let config = GatewayConfig::new("https://idam.test", "::::");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("platform_base_url"));
    }

    #[test]
    fn test_jwks_url_joins_well_known_path() {
        let config = GatewayConfig::new("https://idam.test", "http://dash.test");
        assert_eq!(
            config.jwks_url(),
            "https://idam.test/.well-known/openid-configuration/jwks"
        );

        // Trailing slash must not produce a double slash
        let config = GatewayConfig::new("https://idam.test/", "http://dash.test");
        assert_eq!(
            config.jwks_url(),
            "https://idam.test/.well-known/openid-configuration/jwks"
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let json = r#"{
            "idam_base_url": "https://idam.test",
            "platform_base_url": "http://dash.test"
        }"#;

        let config: GatewayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session_cookie_name, "platform_session");
        assert!(config.client_id.is_empty());
    }
}
