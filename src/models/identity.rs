//! Identity model
//!
//! Claims carried by a provider-issued credential and the decoded identity
//! handed to route handlers once a credential has been verified.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claims of a provider-issued ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// Subject (the provider's user id)
    pub sub: String,
    /// Email address, when the account has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued-at, seconds since epoch
    #[serde(default)]
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience (provider project id)
    pub aud: String,
    /// Every other claim, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Verified identity extracted from a credential
///
/// Recomputed per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedIdentity {
    /// Subject id
    pub uid: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// All claims of the credential
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl DecodedIdentity {
    /// Look up a single claim
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

impl From<CredentialClaims> for DecodedIdentity {
    fn from(claims: CredentialClaims) -> Self {
        let mut all = claims.extra.clone();
        all.insert("sub".to_string(), Value::from(claims.sub.clone()));
        all.insert("iat".to_string(), Value::from(claims.iat));
        all.insert("exp".to_string(), Value::from(claims.exp));
        all.insert("iss".to_string(), Value::from(claims.iss));
        all.insert("aud".to_string(), Value::from(claims.aud));
        if let Some(email) = &claims.email {
            all.insert("email".to_string(), Value::from(email.clone()));
        }

        Self {
            uid: claims.sub,
            email: claims.email,
            claims: all,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_claims_keep_unknown_fields() {
        let claims: CredentialClaims = serde_json::from_value(json!({
            "sub": "uid-1",
            "email": "writer@example.com",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600,
            "iss": "https://securetoken.google.com/blog",
            "aud": "blog",
            "email_verified": true,
            "firebase": { "sign_in_provider": "password" }
        }))
        .unwrap();

        assert_eq!(claims.extra.get("email_verified"), Some(&json!(true)));
        assert_eq!(claims.exp, 1_700_003_600);
    }

    #[test]
    fn test_decoded_identity_from_claims() {
        let claims: CredentialClaims = serde_json::from_value(json!({
            "sub": "uid-1",
            "exp": 1_700_003_600,
            "iss": "issuer",
            "aud": "blog",
            "role": "owner"
        }))
        .unwrap();

        let identity = DecodedIdentity::from(claims);

        assert_eq!(identity.uid, "uid-1");
        assert!(identity.email.is_none());
        assert_eq!(identity.claim("role"), Some(&json!("owner")));
        assert_eq!(identity.claim("sub"), Some(&json!("uid-1")));
        assert_eq!(identity.claim("aud"), Some(&json!("blog")));
    }
}
