//! Bearer token validation against the provider's signing keys.

use std::sync::Arc;

use crate::auth::claims::{Claims, USER_TYPE_CLIENT, USER_TYPE_EMPLOYEE};
use crate::auth::jwks::JwksCache;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, get_current_timestamp};
use tracing::debug;

/// Why a bearer token was rejected.
///
/// The rendered explanation is part of the gateway's observable contract;
/// operators grep for these exact phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a parseable JWT, or the header carries no usable kid
    Malformed,
    /// Expired beyond leeway
    Expired,
    /// nbf or iat lies in the future beyond leeway
    NotYetValid,
    /// Signature check against the kid's key failed
    BadSignature,
    /// An employee token issued for a different audience
    WrongAudience,
    /// Neither an employee nor a technical-user token
    WrongUserType,
    /// The kid is unknown even after refreshing the key cache
    UnknownKey(String),
    /// Anything the other variants do not cover
    Unclassified(String),
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "the token provided is malformed"),
            Self::Expired => write!(f, "the token provided has expired"),
            Self::NotYetValid => {
                write!(f, "the token provided is not valid yet or was issued in the future")
            }
            Self::BadSignature => write!(f, "the token signature is invalid"),
            Self::WrongAudience => {
                write!(f, "the token provided was not issued for this service")
            }
            Self::WrongUserType => write!(f, "the token provided has incorrect UserType"),
            Self::UnknownKey(kid) => write!(f, "no public key found for kid '{kid}'"),
            Self::Unclassified(detail) => {
                write!(f, "The token could not be validated: {detail}")
            }
        }
    }
}

impl std::error::Error for TokenRejection {}

/// Validates bearer tokens and applies the user-type and audience rules.
pub struct TokenValidator {
    keys: Arc<JwksCache>,
    client_id: String,
}

impl TokenValidator {
    /// Create a validator reading keys from the given cache.
    ///
    /// An empty `client_id` disables the audience check for employee
    /// tokens.
    pub fn new(keys: Arc<JwksCache>, client_id: String) -> Self {
        Self { keys, client_id }
    }

    /// Validate a raw bearer token and return its claims.
    ///
    /// Signature, temporal claims, user type, and audience are all
    /// checked. Technical-user tokens skip the audience rule; they are
    /// issued to the provider's clients directly.
    pub async fn validate(&self, token: &str) -> Result<Claims, TokenRejection> {
        let header = decode_header(token).map_err(map_decode_error)?;
        let kid = header.kid.ok_or(TokenRejection::Malformed)?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.set_required_spec_claims::<&str>(&[]);

        let decoded =
            decode::<Claims>(token, &key, &validation).map_err(map_decode_error)?;
        let claims = decoded.claims;

        // exp and nbf are covered above; iat has to be checked by hand.
        if let Some(iat) = claims.iat {
            if iat > (get_current_timestamp() + validation.leeway) as i64 {
                return Err(TokenRejection::NotYetValid);
            }
        }

        match claims.user_type.as_str() {
            USER_TYPE_CLIENT => Ok(claims),
            USER_TYPE_EMPLOYEE => {
                if claims.aud == self.client_id || self.audience_check_disabled() {
                    Ok(claims)
                } else {
                    Err(TokenRejection::WrongAudience)
                }
            }
            _ => Err(TokenRejection::WrongUserType),
        }
    }

    /// Resolve the verification key for a kid, refreshing the cache once
    /// on a miss to pick up freshly rotated keys. A failed refresh is
    /// not an error of its own; the retried lookup decides.
    async fn key_for(&self, kid: &str) -> Result<DecodingKey, TokenRejection> {
        if let Some(key) = self.keys.lookup(kid).await {
            return Ok(key);
        }

        if let Err(e) = self.keys.refresh().await {
            debug!(error = %e, "JWK refresh after a cache miss failed");
        }

        self.keys
            .lookup(kid)
            .await
            .ok_or_else(|| TokenRejection::UnknownKey(kid.to_string()))
    }

    fn audience_check_disabled(&self) -> bool {
        self.client_id.is_empty()
    }
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> TokenRejection {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::ImmatureSignature => TokenRejection::NotYetValid,
        ErrorKind::InvalidSignature => TokenRejection::BadSignature,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => TokenRejection::Malformed,
        _ => TokenRejection::Unclassified(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::fallback_jwks;
    use crate::auth::test_support::{
        ScriptedResponse, ScriptedServer, TEST_KID, employee_claims, jwks_document, sign_token,
    };
    use http::StatusCode;
    use serde_json::json;

    async fn loaded_validator(client_id: &str) -> (TokenValidator, ScriptedServer) {
        let server = ScriptedServer::start(vec![ScriptedResponse::json(
            StatusCode::OK,
            jwks_document(),
        )])
        .await;

        let cache = Arc::new(JwksCache::new(server.base_url.clone(), fallback_jwks()));
        cache.refresh().await.unwrap();

        (TokenValidator::new(cache, client_id.to_string()), server)
    }

    #[tokio::test]
    async fn test_valid_employee_token() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let token = sign_token(Some(TEST_KID), &employee_claims());

        let claims = validator.validate(&token).await.unwrap();
        assert_eq!(claims.username().as_str(), "test@metronom.com");
    }

    #[tokio::test]
    async fn test_audience_check_disabled_by_empty_client_id() {
        let (validator, _server) = loaded_validator("").await;
        let token = sign_token(Some(TEST_KID), &employee_claims());

        assert!(validator.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_employee_token_for_other_service_is_rejected() {
        let (validator, _server) = loaded_validator("another-service").await;
        let token = sign_token(Some(TEST_KID), &employee_claims());

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::WrongAudience);
        assert_eq!(
            rejection.to_string(),
            "the token provided was not issued for this service"
        );
    }

    #[tokio::test]
    async fn test_client_token_skips_audience_check() {
        let (validator, _server) = loaded_validator("another-service").await;
        let mut claims = employee_claims();
        claims["userType"] = json!("CLIENT");
        claims["realm"] = json!("2TR_PENG");
        let token = sign_token(Some(TEST_KID), &claims);

        let claims = validator.validate(&token).await.unwrap();
        assert_eq!(claims.realm, "2TR_PENG");
    }

    #[tokio::test]
    async fn test_unknown_user_type_is_rejected() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let mut claims = employee_claims();
        claims["userType"] = json!("SYSTEM");
        let token = sign_token(Some(TEST_KID), &claims);

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::WrongUserType);
        assert_eq!(
            rejection.to_string(),
            "the token provided has incorrect UserType"
        );
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let mut claims = employee_claims();
        claims["exp"] = json!(get_current_timestamp() - 3600);
        let token = sign_token(Some(TEST_KID), &claims);

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::Expired);
        assert_eq!(rejection.to_string(), "the token provided has expired");
    }

    #[tokio::test]
    async fn test_token_not_valid_yet() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let mut claims = employee_claims();
        claims["nbf"] = json!(get_current_timestamp() + 3600);
        let token = sign_token(Some(TEST_KID), &claims);

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::NotYetValid);
    }

    #[tokio::test]
    async fn test_token_issued_in_the_future() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let mut claims = employee_claims();
        claims["iat"] = json!(get_current_timestamp() + 3600);
        let token = sign_token(Some(TEST_KID), &claims);

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::NotYetValid);
        assert_eq!(
            rejection.to_string(),
            "the token provided is not valid yet or was issued in the future"
        );
    }

    #[tokio::test]
    async fn test_token_without_expiry_is_accepted() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let mut claims = employee_claims();
        claims.as_object_mut().unwrap().remove("exp");
        let token = sign_token(Some(TEST_KID), &claims);

        assert!(validator.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let (validator, _server) = loaded_validator("ds-prod").await;

        let rejection = validator.validate("not-a-token").await.unwrap_err();
        assert_eq!(rejection, TokenRejection::Malformed);
        assert_eq!(rejection.to_string(), "the token provided is malformed");
    }

    #[tokio::test]
    async fn test_token_without_kid_is_malformed() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let token = sign_token(None, &employee_claims());

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::Malformed);
    }

    #[tokio::test]
    async fn test_tampered_signature_is_rejected() {
        let (validator, _server) = loaded_validator("ds-prod").await;
        let token = sign_token(Some(TEST_KID), &employee_claims());

        // Rotate the signature segment; still valid base64url, wrong bytes.
        let (rest, signature) = token.rsplit_once('.').unwrap();
        let tampered = format!("{rest}.{}{}", &signature[8..], &signature[..8]);

        let rejection = validator.validate(&tampered).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::BadSignature);
        assert_eq!(rejection.to_string(), "the token signature is invalid");
    }

    #[tokio::test]
    async fn test_cache_miss_triggers_one_refresh() {
        // The cache starts cold; validation succeeds purely through the
        // miss-triggered refresh.
        let server = ScriptedServer::start(vec![ScriptedResponse::json(
            StatusCode::OK,
            jwks_document(),
        )])
        .await;
        let cache = Arc::new(JwksCache::new(server.base_url.clone(), fallback_jwks()));
        let validator = TokenValidator::new(cache, "ds-prod".to_string());

        let token = sign_token(Some(TEST_KID), &employee_claims());
        assert!(validator.validate(&token).await.is_ok());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_after_refresh() {
        let (validator, server) = loaded_validator("ds-prod").await;
        let token = sign_token(Some("rotated-away"), &employee_claims());

        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(
            rejection,
            TokenRejection::UnknownKey("rotated-away".to_string())
        );
        assert_eq!(
            rejection.to_string(),
            "no public key found for kid 'rotated-away'"
        );
        assert_eq!(server.hits(), 2, "the miss must refresh exactly once");
    }

    #[tokio::test]
    async fn test_failed_miss_refresh_reports_unknown_key() {
        let server = ScriptedServer::start(vec![ScriptedResponse::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({}),
        )])
        .await;
        let cache = Arc::new(JwksCache::new(server.base_url.clone(), fallback_jwks()));
        let validator = TokenValidator::new(cache, "ds-prod".to_string());

        let token = sign_token(Some(TEST_KID), &employee_claims());
        let rejection = validator.validate(&token).await.unwrap_err();
        assert_eq!(rejection, TokenRejection::UnknownKey(TEST_KID.to_string()));
    }
}
