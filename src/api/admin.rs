//! Admin API endpoints
//!
//! Every route here sits behind `require_session`.

use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{AppState, AuthenticatedIdentity};

/// Signed-in writer
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub uid: String,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl From<AuthenticatedIdentity> for MeResponse {
    fn from(AuthenticatedIdentity(identity): AuthenticatedIdentity) -> Self {
        let expires_at = identity
            .claim("exp")
            .and_then(|v| v.as_i64())
            .and_then(|exp| DateTime::from_timestamp(exp, 0));

        Self {
            uid: identity.uid,
            email: identity.email,
            expires_at,
            claims: identity.claims,
        }
    }
}

/// Build admin API routes
pub fn router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

/// GET /api/admin/me - Identity behind the current session
async fn me(identity: AuthenticatedIdentity) -> Json<MeResponse> {
    Json(identity.into())
}
