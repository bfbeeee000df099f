//! Session model
//!
//! The server-observable projection of a credential: an HTTP-only cookie.
//! There is no server-side session store.

/// Session cookie carrying the current credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Cookie name
    pub name: String,
    /// Raw credential (empty when clearing)
    pub token: String,
    /// Lifetime in seconds; zero deletes the cookie
    pub max_age_secs: u64,
    /// Whether to send `Secure`
    pub secure: bool,
}

impl Session {
    /// Session carrying `token` for `max_age_secs`
    pub fn new(
        name: impl Into<String>,
        token: impl Into<String>,
        max_age_secs: u64,
        secure: bool,
    ) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            max_age_secs,
            secure,
        }
    }

    /// Deletion cookie (empty value, `Max-Age=0`)
    pub fn cleared(name: impl Into<String>, secure: bool) -> Self {
        Self::new(name, "", 0, secure)
    }

    /// `Set-Cookie` header value
    pub fn to_cookie_string(&self) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
            self.name, self.token, self.max_age_secs, secure
        )
    }
}
