//! Authentication API endpoints
//!
//! Handles HTTP requests for credential verification and the session cookie:
//! - POST /api/auth/verify - Verify a credential
//! - POST /api/auth/session - Verify a credential and store it as the session cookie
//! - DELETE /api/auth/session - Clear the session cookie
//! - POST /api/auth/logout - Clear the session cookie, no body
//!
//! Every response here carries `Cache-Control: no-store`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{bearer_token, cache_control_no_store, ApiError, AppState};
use crate::services::verifier::{AuthError, VerifyResponse};

/// Request body carrying a credential
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Response for session changes
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

/// Build auth routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify))
        .route("/session", post(create_session).delete(delete_session))
        .route("/logout", post(logout))
}

/// Token from a JSON body; a missing or malformed body yields `None`
fn token_from_body(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<TokenRequest>(body)
        .ok()
        .and_then(|b| b.token)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn no_store<T: IntoResponse>(status: StatusCode, body: T) -> Response {
    (status, [(header::CACHE_CONTROL, cache_control_no_store())], body).into_response()
}

/// POST /api/auth/verify - Verify a credential
///
/// Token comes from the JSON body, falling back to the bearer header.
/// Answers 200 `{valid: true, uid, decoded}` or 401 `{valid: false, error}`.
async fn verify(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(token) = token_from_body(&body).or_else(|| bearer_token(&headers)) else {
        return no_store(
            StatusCode::UNAUTHORIZED,
            Json(VerifyResponse::failure("Missing token")),
        );
    };

    match state.verifier.verify(&token).await {
        Ok(identity) => no_store(StatusCode::OK, Json(VerifyResponse::success(&identity))),
        Err(e) => {
            let message = match &e {
                AuthError::MissingCredential => "Missing token",
                AuthError::Provider(_) | AuthError::Configuration(_) => {
                    tracing::error!("Credential verification unavailable: {}", e);
                    "Verification unavailable"
                }
                AuthError::InvalidCredential(_) => {
                    tracing::debug!("Credential rejected: {}", e);
                    "Invalid token"
                }
            };
            no_store(StatusCode::UNAUTHORIZED, Json(VerifyResponse::failure(message)))
        }
    }
}

/// POST /api/auth/session - Store a verified credential as the session cookie
///
/// The credential is verified before the cookie is written; an empty
/// credential is a 400, an invalid one a 401 with no cookie change.
async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let token = token_from_body(&body)
        .ok_or_else(|| ApiError::validation_error("Token is required"))?;

    let identity = state.verifier.verify(&token).await.map_err(|e| {
        tracing::warn!("Refusing to store session: {}", e);
        ApiError::unauthorized("Invalid token")
    })?;

    let session = state
        .sessions
        .set_session(&token)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let mut response = no_store(
        StatusCode::OK,
        Json(SessionResponse {
            success: true,
            uid: Some(identity.uid.clone()),
            max_age_secs: Some(session.max_age_secs),
        }),
    );
    state
        .sessions
        .apply(&session, response.headers_mut())
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    tracing::info!(uid = %identity.uid, "Session cookie issued");
    Ok(response)
}

/// DELETE /api/auth/session - Clear the session cookie
async fn delete_session(State(state): State<AppState>) -> Response {
    let mut response = no_store(
        StatusCode::OK,
        Json(SessionResponse {
            success: true,
            uid: None,
            max_age_secs: None,
        }),
    );
    state.sessions.apply_clear(response.headers_mut());
    response
}

/// POST /api/auth/logout - Clear the session cookie
async fn logout(State(state): State<AppState>) -> Response {
    let mut response = no_store(StatusCode::NO_CONTENT, ());
    state.sessions.apply_clear(response.headers_mut());
    tracing::debug!("Session cookie cleared on logout");
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_body() {
        assert_eq!(token_from_body(br#"{"token":"abc"}"#), Some("abc".to_string()));
        assert_eq!(token_from_body(br#"{"token":"  abc  "}"#), Some("abc".to_string()));
    }

    #[test]
    fn test_token_from_unusable_body() {
        assert_eq!(token_from_body(b""), None);
        assert_eq!(token_from_body(b"not json"), None);
        assert_eq!(token_from_body(br#"{"token":""}"#), None);
        assert_eq!(token_from_body(br#"{"other":"abc"}"#), None);
        assert_eq!(token_from_body(br#"{"token":42}"#), None);
    }
}
