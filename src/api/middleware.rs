//! API middleware
//!
//! Contains middleware for:
//! - The edge access gate in front of the admin pages
//! - Session verification for the admin API
//!
//! Both read the credential the same way: session cookie first, then an
//! `Authorization: Bearer` header. Neither ever tells the client why a
//! credential was rejected.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::models::DecodedIdentity;
use crate::services::session::SessionCookieManager;
use crate::services::verifier::CredentialVerifier;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    /// Verifies against the provider keys; backs the verify endpoint and the admin API
    pub verifier: Arc<dyn CredentialVerifier>,
    /// What the edge gate calls (the internal verify endpoint in production)
    pub gate_verifier: Arc<dyn CredentialVerifier>,
    pub sessions: Arc<SessionCookieManager>,
    pub gate: Arc<GateRules>,
}

/// Verified identity attached to a request
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity(pub DecodedIdentity);

impl<S> FromRequestParts<S> for AuthenticatedIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            [(header::CACHE_CONTROL, cache_control_no_store())],
            Json(self),
        )
            .into_response()
    }
}

/// Cache-Control for anything carrying or reacting to credentials
pub fn cache_control_no_store() -> HeaderValue {
    HeaderValue::from_static("no-store")
}

/// Which paths the edge gate protects
#[derive(Debug, Clone)]
pub struct GateRules {
    admin_prefix: String,
    login_path: String,
}

impl GateRules {
    pub fn new(admin_prefix: impl Into<String>, login_path: impl Into<String>) -> Self {
        let admin_prefix: String = admin_prefix.into();
        Self {
            admin_prefix: admin_prefix.trim_end_matches('/').to_string(),
            login_path: login_path.into(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.admin_prefix.clone(), config.login_path.clone())
    }

    /// Admin prefix without a trailing slash
    pub fn admin_prefix(&self) -> &str {
        &self.admin_prefix
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Under the admin prefix and not exactly the login path
    pub fn is_protected(&self, path: &str) -> bool {
        if path == self.login_path {
            return false;
        }
        path.strip_prefix(self.admin_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Candidate credential: session cookie first, then bearer header
pub fn extract_credential(headers: &HeaderMap, sessions: &SessionCookieManager) -> Option<String> {
    sessions.read(headers).or_else(|| bearer_token(headers))
}

/// Token from an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

fn redirect_to_login(state: &AppState, clear_session: bool) -> Response {
    let mut response = Redirect::temporary(state.gate.login_path()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, cache_control_no_store());
    if clear_session {
        state.sessions.apply_clear(headers);
    }
    response
}

/// Edge access gate for admin pages
///
/// Public paths and the login page pass straight through. Protected paths
/// without a credential are redirected to the login page; a credential that
/// fails verification for any reason is redirected *and* its cookie purged.
pub async fn admin_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.gate.is_protected(&path) {
        return next.run(request).await;
    }

    let Some(token) = extract_credential(request.headers(), &state.sessions) else {
        tracing::debug!(%path, "No credential, redirecting to login");
        return redirect_to_login(&state, false);
    };

    match state.gate_verifier.verify(&token).await {
        Ok(identity) => {
            tracing::debug!(%path, uid = %identity.uid, "Gate allowed request");
            request.extensions_mut().insert(AuthenticatedIdentity(identity));
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(%path, "Gate rejected credential: {}", e);
            redirect_to_login(&state, e.clears_session())
        }
    }
}

/// Session guard for the admin API
///
/// Verifies directly against the provider keys and answers 401 JSON instead
/// of redirecting.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_credential(request.headers(), &state.sessions)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let identity = state.verifier.verify(&token).await.map_err(|e| {
        tracing::warn!("Admin API rejected credential: {}", e);
        ApiError::unauthorized("Invalid or expired session")
    })?;

    request.extensions_mut().insert(AuthenticatedIdentity(identity));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions() -> SessionCookieManager {
        SessionCookieManager::new("auth-token", 3600, true)
    }

    fn rules() -> GateRules {
        GateRules::new("/admin", "/admin")
    }

    #[test]
    fn test_login_path_is_public() {
        assert!(!rules().is_protected("/admin"));
    }

    #[test]
    fn test_admin_subpaths_are_protected() {
        assert!(rules().is_protected("/admin/"));
        assert!(rules().is_protected("/admin/dashboard"));
        assert!(rules().is_protected("/admin/articles/42/edit"));
    }

    #[test]
    fn test_lookalike_paths_are_public() {
        assert!(!rules().is_protected("/administrator"));
        assert!(!rules().is_protected("/api/admin/me"));
        assert!(!rules().is_protected("/"));
    }

    #[test]
    fn test_separate_login_path() {
        let rules = GateRules::new("/admin/", "/admin/login");
        assert_eq!(rules.admin_prefix(), "/admin");
        assert!(rules.is_protected("/admin"));
        assert!(!rules.is_protected("/admin/login"));
        assert!(rules.is_protected("/admin/login/extra"));
    }

    #[test]
    fn test_extract_credential_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("auth-token=cookie-token"));
        assert_eq!(extract_credential(&headers, &sessions()), Some("cookie-token".to_string()));
    }

    #[test]
    fn test_extract_credential_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_credential(&headers, &sessions()), Some("header-token".to_string()));
    }

    #[test]
    fn test_extract_credential_cookie_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        headers.insert(header::COOKIE, HeaderValue::from_static("auth-token=cookie-token"));
        assert_eq!(extract_credential(&headers, &sessions()), Some("cookie-token".to_string()));
    }

    #[test]
    fn test_extract_credential_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(extract_credential(&headers, &sessions()).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_credential(&headers, &sessions()).is_none());
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError::unauthorized("nope").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        assert_eq!(
            ApiError::validation_error("bad").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_api_error_body() {
        let body = serde_json::to_value(ApiError::unauthorized("nope")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "error": { "code": "UNAUTHORIZED", "message": "nope" } })
        );
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,12}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn paths_outside_prefix_are_public(
            first in segment(),
            rest in prop::collection::vec(segment(), 0..4),
        ) {
            prop_assume!(first != "admin");
            let path = format!("/{}/{}", first, rest.join("/"));
            prop_assert!(!GateRules::new("/admin", "/admin").is_protected(&path));
        }

        #[test]
        fn paths_under_prefix_are_protected(rest in prop::collection::vec(segment(), 1..4)) {
            let path = format!("/admin/{}", rest.join("/"));
            prop_assert!(GateRules::new("/admin", "/admin").is_protected(&path));
        }

        #[test]
        fn login_path_is_never_protected(prefix in segment(), login in segment()) {
            let admin_prefix = format!("/{}", prefix);
            let login_path = format!("/{}/{}", prefix, login);
            let rules = GateRules::new(admin_prefix.clone(), login_path.clone());
            let sibling = format!("{}/other-{}", admin_prefix, login);
            prop_assert!(!rules.is_protected(&login_path));
            prop_assert!(rules.is_protected(&sibling));
        }
    }
}
