//! Credential verification
//!
//! Two verifiers implement [`CredentialVerifier`]:
//! - [`ProviderVerifier`] checks ID tokens against the identity provider's
//!   signing keys. The key ring is loaded once, on first use, and shared by
//!   every request for the life of the process.
//! - [`EndpointVerifier`] delegates to the internal `POST /api/auth/verify`
//!   endpoint so the edge gate never links the provider key handling.
//!
//! Both fail closed: anything other than a clean verification is an error.

use async_trait::async_trait;
use jsonwebtoken::{
    decode, decode_header, errors::ErrorKind, jwk::JwkSet, Algorithm, DecodingKey, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::AuthConfig;
use crate::models::{CredentialClaims, DecodedIdentity};

/// Error types for credential verification
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented
    #[error("Missing credential")]
    MissingCredential,

    /// The credential was presented and rejected
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Verifier cannot run: provider secrets are absent or unusable
    #[error("Auth configuration error: {0}")]
    Configuration(String),

    /// The verification round trip itself failed
    #[error("Identity provider unavailable: {0}")]
    Provider(String),
}

impl AuthError {
    /// Whether a session cookie was presented and must now be purged
    pub fn clears_session(&self) -> bool {
        !matches!(self, AuthError::MissingCredential)
    }
}

/// Anything that can turn a bearer credential into a verified identity
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a credential
    async fn verify(&self, credential: &str) -> Result<DecodedIdentity, AuthError>;
}

/// Body returned by the verification endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResponse {
    pub fn success(identity: &DecodedIdentity) -> Self {
        Self {
            valid: true,
            uid: Some(identity.uid.clone()),
            decoded: Some(identity.claims.clone()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            uid: None,
            decoded: None,
            error: Some(error.into()),
        }
    }
}

/// Where the provider's signing keys come from
#[derive(Debug, Clone)]
enum KeySource {
    /// RS256 keys published as a JWKS document
    Jwks(String),
    /// HS256 shared secret
    SharedSecret(String),
}

/// Loaded signing keys
enum KeyRing {
    Jwks(HashMap<String, DecodingKey>),
    Shared(DecodingKey),
}

/// Verifies ID tokens against the identity provider's keys
pub struct ProviderVerifier {
    issuer: String,
    audience: String,
    key_source: KeySource,
    http: reqwest::Client,
    keys: OnceCell<KeyRing>,
}

fn required(value: Option<&str>, name: &str) -> Result<String, AuthError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AuthError::Configuration(format!("{} is not set", name))),
    }
}

impl ProviderVerifier {
    /// Build a verifier from configuration
    ///
    /// Fails if the issuer, audience, or key material is missing. The keys
    /// themselves are loaded lazily by the first call to `verify`.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let issuer = required(config.issuer.as_deref(), "auth.issuer")?;
        let audience = required(config.audience.as_deref(), "auth.audience")?;

        let key_source = match (
            required(config.jwks_url.as_deref(), "auth.jwks_url"),
            required(config.signing_secret.as_deref(), "auth.signing_secret"),
        ) {
            (Ok(url), _) => KeySource::Jwks(url),
            (Err(_), Ok(secret)) => KeySource::SharedSecret(secret),
            (Err(_), Err(_)) => {
                return Err(AuthError::Configuration(
                    "no signing key material: set auth.jwks_url or auth.signing_secret".to_string(),
                ))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.verify_timeout_secs))
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            issuer,
            audience,
            key_source,
            http,
            keys: OnceCell::new(),
        })
    }

    /// Whether the key ring has been loaded
    pub fn is_initialized(&self) -> bool {
        self.keys.initialized()
    }

    async fn key_ring(&self) -> Result<&KeyRing, AuthError> {
        self.keys.get_or_try_init(|| self.load_keys()).await
    }

    // TODO: refetch the JWKS when an unknown `kid` shows up after the
    // document's Cache-Control max-age, so key rotation needs no restart.
    async fn load_keys(&self) -> Result<KeyRing, AuthError> {
        match &self.key_source {
            KeySource::SharedSecret(secret) => {
                tracing::info!("Token verifier initialized with shared secret");
                Ok(KeyRing::Shared(DecodingKey::from_secret(secret.as_bytes())))
            }
            KeySource::Jwks(url) => {
                let set: JwkSet = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| AuthError::Provider(format!("Failed to fetch JWKS: {}", e)))?
                    .json()
                    .await
                    .map_err(|e| AuthError::Provider(format!("Failed to parse JWKS: {}", e)))?;

                let mut keys = HashMap::new();
                for jwk in &set.keys {
                    let Some(kid) = jwk.common.key_id.clone() else {
                        continue;
                    };
                    match DecodingKey::from_jwk(jwk) {
                        Ok(key) => {
                            keys.insert(kid, key);
                        }
                        Err(e) => tracing::warn!("Skipping unusable JWK '{}': {}", kid, e),
                    }
                }

                if keys.is_empty() {
                    return Err(AuthError::Provider("JWKS contains no usable keys".to_string()));
                }

                tracing::info!("Token verifier initialized with {} provider keys", keys.len());
                Ok(KeyRing::Jwks(keys))
            }
        }
    }
}

#[async_trait]
impl CredentialVerifier for ProviderVerifier {
    async fn verify(&self, credential: &str) -> Result<DecodedIdentity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let keys = self.key_ring().await?;

        let header = decode_header(credential)
            .map_err(|e| AuthError::InvalidCredential(format!("malformed token: {}", e)))?;

        let (key, algorithm) = match keys {
            KeyRing::Shared(key) => (key, Algorithm::HS256),
            KeyRing::Jwks(keys) => {
                let kid = header.kid.as_deref().ok_or_else(|| {
                    AuthError::InvalidCredential("token has no key id".to_string())
                })?;
                let key = keys.get(kid).ok_or_else(|| {
                    AuthError::InvalidCredential(format!("unknown key id '{}'", kid))
                })?;
                (key, Algorithm::RS256)
            }
        };

        if header.alg != algorithm {
            return Err(AuthError::InvalidCredential(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<CredentialClaims>(credential, key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    AuthError::InvalidCredential("credential expired".to_string())
                }
                _ => AuthError::InvalidCredential(e.to_string()),
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidCredential("empty subject".to_string()));
        }

        Ok(data.claims.into())
    }
}

/// Verifies credentials through the internal verification endpoint
pub struct EndpointVerifier {
    endpoint: String,
    http: reqwest::Client,
}

impl EndpointVerifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialVerifier for EndpointVerifier {
    async fn verify(&self, credential: &str) -> Result<DecodedIdentity, AuthError> {
        if credential.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "token": credential }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("verify endpoint unreachable: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let body: Option<VerifyResponse> = response.json().await.ok();
            let reason = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| "rejected by verify endpoint".to_string());
            return Err(AuthError::InvalidCredential(reason));
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!(
                "verify endpoint returned {}",
                status
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("unreadable verify response: {}", e)))?;

        match (body.valid, body.uid) {
            (true, Some(uid)) => {
                let claims = body.decoded.unwrap_or_default();
                let email = claims
                    .get("email")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                Ok(DecodedIdentity { uid, email, claims })
            }
            _ => Err(AuthError::InvalidCredential(
                body.error.unwrap_or_else(|| "verify endpoint reported invalid".to_string()),
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve the test JWKS on an ephemeral port, counting fetches
    async fn serve_jwks() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/jwks",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        TEST_JWKS,
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/jwks", addr), hits)
    }

    fn jwks_auth_config(url: String) -> AuthConfig {
        AuthConfig {
            issuer: Some(TEST_ISSUER.to_string()),
            audience: Some(TEST_AUDIENCE.to_string()),
            jwks_url: Some(url),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_missing_issuer_is_configuration_error() {
        let config = AuthConfig {
            issuer: None,
            ..secret_auth_config()
        };
        let err = ProviderVerifier::from_config(&config).err().unwrap();
        assert!(matches!(err, AuthError::Configuration(msg) if msg.contains("auth.issuer")));
    }

    #[test]
    fn test_missing_key_material_is_configuration_error() {
        let config = AuthConfig {
            signing_secret: Some("   ".to_string()),
            jwks_url: None,
            ..secret_auth_config()
        };
        let err = ProviderVerifier::from_config(&config).err().unwrap();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        assert!(!verifier.is_initialized());

        let identity = verifier.verify(&valid_token("writer")).await.unwrap();

        assert!(verifier.is_initialized());
        assert_eq!(identity.uid, "writer");
        assert_eq!(identity.email.as_deref(), Some("writer@example.com"));
        assert_eq!(identity.claim("aud"), Some(&json!(TEST_AUDIENCE)));
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let token = valid_token("writer");

        let first = verifier.verify(&token).await.unwrap();
        let second = verifier.verify(&token).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_credential_is_missing() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let err = verifier.verify("  ").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential));
        assert!(!err.clears_session());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let token = mint_hs256(&claims_for("writer", -3600));

        let err = verifier.verify(&token).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredential(msg) if msg.contains("expired")));
    }

    #[tokio::test]
    async fn test_just_expired_token_rejected() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let token = mint_hs256(&claims_for("writer", -5));

        let err = verifier.verify(&token).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredential(msg) if msg.contains("expired")));
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let mut claims = claims_for("writer", 3600);
        claims["aud"] = json!("someone-else");

        let err = verifier.verify(&mint_hs256(&claims)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let mut claims = claims_for("writer", 3600);
        claims["iss"] = json!("https://evil.example");

        let err = verifier.verify(&mint_hs256(&claims)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let token = mint_hs256(&claims_for("", 3600));

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let verifier = ProviderVerifier::from_config(&secret_auth_config()).unwrap();
        let err = verifier.verify("garbage").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
        assert!(err.clears_session());
    }

    #[tokio::test]
    async fn test_verify_rs256_against_jwks() {
        let (url, _) = serve_jwks().await;
        let verifier = ProviderVerifier::from_config(&jwks_auth_config(url)).unwrap();

        let token = mint_rs256(&claims_for("writer", 3600), TEST_KID);
        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.uid, "writer");

        let unknown = mint_rs256(&claims_for("writer", 3600), "rotated-away");
        let err = verifier.verify(&unknown).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(msg) if msg.contains("unknown key id")));
    }

    #[tokio::test]
    async fn test_hs256_token_rejected_by_jwks_verifier() {
        let (url, _) = serve_jwks().await;
        let verifier = ProviderVerifier::from_config(&jwks_auth_config(url)).unwrap();

        let err = verifier.verify(&valid_token("writer")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_initialize_once() {
        let (url, hits) = serve_jwks().await;
        let verifier = Arc::new(ProviderVerifier::from_config(&jwks_auth_config(url)).unwrap());
        let token = mint_rs256(&claims_for("writer", 3600), TEST_KID);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let verifier = verifier.clone();
                let token = token.clone();
                tokio::spawn(async move { verifier.verify(&token).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_jwks_is_provider_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = jwks_auth_config(format!("http://{}/jwks", addr));
        let verifier = ProviderVerifier::from_config(&config).unwrap();
        let token = mint_rs256(&claims_for("writer", 3600), TEST_KID);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));
        assert!(err.clears_session());
        assert!(!verifier.is_initialized());
    }

    #[tokio::test]
    async fn test_endpoint_verifier_skips_call_without_credential() {
        let verifier =
            EndpointVerifier::new("http://127.0.0.1:9/api/auth/verify", Duration::from_secs(1))
                .unwrap();
        assert_eq!(verifier.endpoint(), "http://127.0.0.1:9/api/auth/verify");

        let err = verifier.verify("  ").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential));
    }
}
