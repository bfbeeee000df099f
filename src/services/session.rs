//! Session cookie manager
//!
//! Converts a verified credential into the `Set-Cookie` header that carries
//! it, and produces the deletion cookie used on sign-out and on any failed
//! verification. The cookie is either the current credential or absent.

use axum::http::{header, HeaderMap, HeaderValue};

use crate::config::{AuthConfig, ServerConfig};
use crate::models::Session;
use crate::services::verifier::AuthError;

/// Issues and clears the session cookie
#[derive(Debug, Clone)]
pub struct SessionCookieManager {
    cookie_name: String,
    max_age_secs: u64,
    secure: bool,
}

/// RFC 6265 cookie-octet
fn is_cookie_octet(c: char) -> bool {
    matches!(
        c,
        '\u{21}'
            | '\u{23}'..='\u{2B}'
            | '\u{2D}'..='\u{3A}'
            | '\u{3C}'..='\u{5B}'
            | '\u{5D}'..='\u{7E}'
    )
}

impl SessionCookieManager {
    pub fn new(cookie_name: impl Into<String>, max_age_secs: u64, secure: bool) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            max_age_secs,
            secure,
        }
    }

    /// `Secure` everywhere except development
    pub fn from_config(auth: &AuthConfig, server: &ServerConfig) -> Self {
        Self::new(
            auth.cookie_name.clone(),
            auth.session_max_age_secs,
            !server.is_development(),
        )
    }

    /// Session cookie carrying `credential`
    pub fn set_session(&self, credential: &str) -> Result<Session, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        if !credential.chars().all(is_cookie_octet) {
            return Err(AuthError::InvalidCredential(
                "credential contains characters not allowed in a cookie".to_string(),
            ));
        }
        Ok(Session::new(
            self.cookie_name.clone(),
            credential,
            self.max_age_secs,
            self.secure,
        ))
    }

    /// Cookie that expires the session immediately
    pub fn clear_session(&self) -> Session {
        Session::cleared(self.cookie_name.clone(), self.secure)
    }

    /// `Set-Cookie` header for `session`
    pub fn header_value(&self, session: &Session) -> Result<HeaderValue, AuthError> {
        HeaderValue::from_str(&session.to_cookie_string())
            .map_err(|e| AuthError::InvalidCredential(format!("unencodable cookie: {}", e)))
    }

    /// Append `session` to response headers
    pub fn apply(&self, session: &Session, headers: &mut HeaderMap) -> Result<(), AuthError> {
        headers.append(header::SET_COOKIE, self.header_value(session)?);
        Ok(())
    }

    /// Append the deletion cookie to response headers
    pub fn apply_clear(&self, headers: &mut HeaderMap) {
        // Deletion cookie is built from the validated cookie name only.
        if let Ok(value) = self.header_value(&self.clear_session()) {
            headers.append(header::SET_COOKIE, value);
        }
    }

    /// Read the session cookie from request headers
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        let prefix = format!("{}=", self.cookie_name);
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|s| s.split(';'))
            .filter_map(|c| c.trim().strip_prefix(prefix.as_str()))
            .map(str::trim)
            .find(|token| !token.is_empty())
            .map(String::from)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn issued_cookie_roundtrips_through_request_header(token in "[A-Za-z0-9_.-]{1,200}") {
            let manager = SessionCookieManager::new("auth-token", 3600, true);
            let session = manager.set_session(&token).unwrap();

            let cookie = session.to_cookie_string();
            let pair = cookie.split(';').next().unwrap().to_string();

            let mut headers = HeaderMap::new();
            headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());

            prop_assert_eq!(manager.read(&headers), Some(token));
        }

        #[test]
        fn cookie_attributes_are_fixed(token in "[A-Za-z0-9_.-]{1,64}", secure in prop::bool::ANY) {
            let manager = SessionCookieManager::new("auth-token", 3600, secure);
            let cookie = manager.set_session(&token).unwrap().to_cookie_string();

            prop_assert!(cookie.contains("; Path=/; HttpOnly; SameSite=Strict; Max-Age=3600"));
            prop_assert_eq!(cookie.ends_with("; Secure"), secure);
        }
    }
}
