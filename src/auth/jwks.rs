//! Retrieval and caching of the identity provider's signing keys.
//!
//! Keys are published as a JWK set under the provider's well-known
//! endpoint. The whole set is fetched at startup and again whenever a
//! token arrives with an unknown kid; a fetched set replaces the cached
//! one atomically or not at all, so one malformed entry can never
//! partially corrupt the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Kid of the long-lived key baked into the binary.
const FALLBACK_KEY_ID: &str = "token-signing-keypair";
const FALLBACK_KEY_N: &str = "xBagyHGKzi0LZeu0l1WZFR0oT0rErOYblsUPClBWkgAUdewiDoWFLolfsAy2TMjSyPkttob4N1BwHRcwSp9mY25lIGE_oxwyC1vE_xJbFTuahizkNQ0PnT2p9h4VzeP7lcr1Xc6Fr24eUcUNaMdA3eEtl3zJhQ_fyM0IHBwNGOCXE3dypvT4PkCilX68wLGnmuDKb_DInjr749hGV2a_rozRHvMwiQOwVmT7qzGdnxYXhRoAjlxFwFw8DAkC5LFKnyj8BWFzoMH0HTqE6buhbadlkPWdd7jQEQKyaJlM1Za7o4s29N-UBfyCel10RDhpXv4f4vj8JhpaYONZXPV_vw";
const FALLBACK_KEY_E: &str = "AQAB";

/// One JSON Web Key as served by the provider (RFC 7517, RSA subset).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    /// RSA public exponent (base64url encoded)
    #[serde(default)]
    pub e: String,
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: String,
    /// Key type, only "RSA" is accepted
    #[serde(default)]
    pub kty: String,
    /// Key ID matched against the JWT header kid
    #[serde(default)]
    pub kid: String,
}

impl Jwk {
    /// Check that every required field is present. All gaps are reported
    /// at once.
    fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();

        if self.e.is_empty() {
            missing.push("e is missing");
        }
        if self.n.is_empty() {
            missing.push("n is missing");
        }
        if self.kty.is_empty() {
            missing.push("kty is missing");
        }
        if self.kid.is_empty() {
            missing.push("kid is missing");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("jwk is invalid: {}", missing.join("; ")))
        }
    }
}

/// A JWK set document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwksDocument {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

/// Errors that can occur while refreshing the key cache.
#[derive(Debug, Clone)]
pub enum JwksError {
    /// The provider's endpoint could not be reached
    Fetch(String),
    /// The provider answered with an unexpected status
    Status(u16),
    /// The response was not a usable key set
    Parse(String),
}

impl std::fmt::Display for JwksError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(detail) => {
                write!(f, "could not make request to the IdAM jwks endpoint: {detail}")
            }
            Self::Status(code) => write!(
                f,
                "could not retrieve JWKs from IdAM: IdAM responded with status {code}"
            ),
            Self::Parse(detail) => {
                write!(f, "could not parse the JWKs received from IdAM: {detail}")
            }
        }
    }
}

impl std::error::Error for JwksError {}

/// One cached verification key plus the digest of its modulus. The
/// digest lets operators compare key material across environments
/// without the modulus itself ever being printed.
#[derive(Clone)]
struct CachedKey {
    key: DecodingKey,
    fingerprint: String,
}

impl std::fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedKey")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Thread-safe cache of the provider's verification keys, indexed by kid.
pub struct JwksCache {
    /// The JWK set endpoint URL.
    jwks_url: String,
    /// Keys installed by [`startup`](Self::startup) when the first fetch
    /// fails.
    fallback: Vec<Jwk>,
    /// Cached verification keys by kid.
    keys: Arc<RwLock<HashMap<String, CachedKey>>>,
    /// HTTP client for fetching the key set.
    client: reqwest::Client,
}

impl JwksCache {
    /// Create an empty cache reading from the given JWK set URL.
    ///
    /// Production callers pass [`fallback_jwks`] as the fallback set.
    pub fn new(jwks_url: String, fallback: Vec<Jwk>) -> Self {
        Self {
            jwks_url,
            fallback,
            keys: Arc::new(RwLock::new(HashMap::new())),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Fetch the key set and replace the cache with it.
    ///
    /// Meant to run once at startup and again when a token names a kid
    /// the cache does not hold. Any failure leaves the cache exactly as
    /// it was.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        debug!("fetching JWKs from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(JwksError::Status(response.status().as_u16()));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;

        let new_keys = build_key_map(document)?;
        debug!(keys = new_keys.len(), "replacing cached JWKs");

        *self.keys.write().await = new_keys;

        Ok(())
    }

    /// Look up the verification key for a kid.
    pub async fn lookup(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).map(|cached| cached.key.clone())
    }

    /// Number of keys currently cached.
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Kids currently cached, sorted.
    pub async fn key_ids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.keys.read().await.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// Cached kids with the sha256 digest of each key's modulus, sorted
    /// by kid.
    pub async fn key_fingerprints(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .keys
            .read()
            .await
            .iter()
            .map(|(kid, cached)| (kid.clone(), cached.fingerprint.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Fill the cache at startup.
    ///
    /// When the provider cannot be reached the injected fallback keys
    /// are installed instead so token validation stays possible; the
    /// next unknown kid triggers a fresh fetch anyway.
    pub async fn startup(&self) {
        match self.refresh().await {
            Ok(()) => {
                info!(
                    event = "idam-retrieved-jwks",
                    keys = self.key_count().await,
                    "successfully retrieved public keys from IdAM"
                );
            }
            Err(e) => {
                error!(
                    event = "idam-retrieve-jwks-failed",
                    error = %e,
                    "could not retrieve public keys from IdAM"
                );

                *self.keys.write().await = fallback_key_set(&self.fallback);
                warn!(
                    event = "idam-jwks-fallback-used",
                    "using fallback public keys because JWKs could not be retrieved from IdAM"
                );
            }
        }
    }
}

/// Turn a fetched document into ready-to-use verification keys.
///
/// The document is accepted in full or not at all: an empty list or a
/// single invalid entry rejects the batch.
fn build_key_map(document: JwksDocument) -> Result<HashMap<String, CachedKey>, JwksError> {
    if document.keys.is_empty() {
        return Err(JwksError::Parse(
            "the provided jwk json does not contain any keys".to_string(),
        ));
    }

    let mut keys = HashMap::new();
    for (i, jwk) in document.keys.iter().enumerate() {
        if let Err(detail) = jwk.validate() {
            return Err(JwksError::Parse(format!(
                "invalid jwk at position {i}: {detail}"
            )));
        }

        if jwk.kty != "RSA" {
            return Err(JwksError::Parse(format!(
                "invalid jwk at position {i}: invalid key type: {}",
                jwk.kty
            )));
        }

        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(|e| {
            JwksError::Parse(format!("invalid jwk at position {i}: {e}"))
        })?;
        keys.insert(
            jwk.kid.clone(),
            CachedKey {
                key,
                fingerprint: fingerprint(&jwk.n),
            },
        );
    }

    Ok(keys)
}

/// The production fallback set: one long-lived signing key known to
/// every deployment.
pub fn fallback_jwks() -> Vec<Jwk> {
    vec![Jwk {
        e: FALLBACK_KEY_E.to_string(),
        n: FALLBACK_KEY_N.to_string(),
        kty: "RSA".to_string(),
        kid: FALLBACK_KEY_ID.to_string(),
    }]
}

fn fallback_key_set(fallback: &[Jwk]) -> HashMap<String, CachedKey> {
    let mut keys = HashMap::new();
    for jwk in fallback {
        match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => {
                keys.insert(
                    jwk.kid.clone(),
                    CachedKey {
                        key,
                        fingerprint: fingerprint(&jwk.n),
                    },
                );
            }
            Err(e) => error!(kid = %jwk.kid, error = %e, "fallback JWK is unusable"),
        }
    }
    keys
}

fn fingerprint(modulus: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(modulus.as_bytes());
    format!("{:x}", hasher.finalize())
}
