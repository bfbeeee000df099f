//! Identity provider REST client and HTTP session sink
//!
//! `RestIdentityClient` talks to the provider's password sign-in and token
//! refresh endpoints and exposes the sign-in state as a stream.
//! `HttpSessionSink` pushes credentials to the blog's cookie-set endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::cookie::{CookieStore, Jar};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::config::ClientConfig;
use crate::services::auth_state::{IdentityClient, ProviderUser, SessionSink};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
}

#[derive(Debug, Clone)]
struct TokenSet {
    id_token: String,
    refresh_token: String,
}

/// Identity provider client over its REST API
pub struct RestIdentityClient {
    http: reqwest::Client,
    api_key: String,
    sign_in_url: String,
    token_url: String,
    state: watch::Sender<Option<ProviderUser>>,
    tokens: Mutex<Option<TokenSet>>,
}

impl RestIdentityClient {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("client.api_key is not set")?;

        let (state, _) = watch::channel(None);
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            sign_in_url: config.sign_in_url.clone(),
            token_url: config.token_url.clone(),
            state,
            tokens: Mutex::new(None),
        })
    }

    /// Sign in with email and password
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<ProviderUser> {
        let response: SignInResponse = self
            .http
            .post(&self.sign_in_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .context("Sign-in request failed")?
            .error_for_status()
            .context("Sign-in rejected")?
            .json()
            .await
            .context("Unreadable sign-in response")?;

        let user = ProviderUser {
            uid: response.local_id,
            email: response.email.or_else(|| Some(email.to_string())),
        };

        *self.tokens.lock().await = Some(TokenSet {
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        });
        self.state.send_replace(Some(user.clone()));

        Ok(user)
    }

    /// Forget the signed-in user
    pub async fn sign_out(&self) {
        *self.tokens.lock().await = None;
        self.state.send_replace(None);
    }
}

#[async_trait]
impl IdentityClient for RestIdentityClient {
    fn auth_state_changes(&self) -> BoxStream<'static, Option<ProviderUser>> {
        let rx = self.state.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let user = rx.borrow_and_update().clone();
            Some((user, (rx, false)))
        })
        .boxed()
    }

    async fn id_token(&self, force_refresh: bool) -> Result<String> {
        // Held across the refresh so concurrent callers share one round trip.
        let mut tokens = self.tokens.lock().await;
        let current = tokens.as_ref().context("No user is signed in")?;

        if !force_refresh {
            return Ok(current.id_token.clone());
        }

        let response: RefreshResponse = self
            .http
            .post(&self.token_url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
            ])
            .send()
            .await
            .context("Token refresh request failed")?
            .error_for_status()
            .context("Token refresh rejected")?
            .json()
            .await
            .context("Unreadable token refresh response")?;

        let id_token = response.id_token.clone();
        *tokens = Some(TokenSet {
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        });
        Ok(id_token)
    }
}

/// Pushes credentials to the blog's session endpoint
///
/// The cookie the endpoint issues is kept in a jar, so the sink holds the
/// live server session.
pub struct HttpSessionSink {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    jar: Arc<Jar>,
}

impl HttpSessionSink {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .with_context(|| format!("Invalid session endpoint '{}'", endpoint))?;
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint,
            jar,
        })
    }

    /// `Cookie` header for the session the endpoint last issued
    pub fn session_cookie(&self) -> Option<String> {
        self.jar
            .cookies(&self.endpoint)
            .and_then(|v| v.to_str().ok().map(String::from))
    }
}

#[async_trait]
impl SessionSink for HttpSessionSink {
    async fn set_session(&self, credential: &str) -> Result<()> {
        self.http
            .post(self.endpoint.clone())
            .json(&serde_json::json!({ "token": credential }))
            .send()
            .await
            .context("Session endpoint unreachable")?
            .error_for_status()
            .context("Session endpoint rejected credential")?;
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        self.http
            .delete(self.endpoint.clone())
            .send()
            .await
            .context("Session endpoint unreachable")?
            .error_for_status()
            .context("Session endpoint refused to clear")?;
        Ok(())
    }
}
