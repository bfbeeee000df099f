//! Configuration management
//!
//! This module handles loading and parsing configuration for Inkpost.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. Identity
//! provider secrets have no defaults; their absence is reported when the
//! verifier is constructed, not here.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Session gate and token verification
    #[serde(default)]
    pub auth: AuthConfig,
    /// Identity provider client (used by the session keeper)
    #[serde(default)]
    pub client: ClientConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            environment: Environment::default(),
        }
    }
}

impl ServerConfig {
    /// Whether cookies may be sent over plain HTTP
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Base URL this server can reach itself on
    pub fn local_base_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development, cookies without `Secure`
    Development,
    /// Anything served over HTTPS (default)
    #[default]
    Production,
}

/// Session gate and credential verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Path prefix of the admin area
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
    /// Login page; exempt from the gate
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Name of the session cookie
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Session cookie lifetime in seconds
    #[serde(default = "default_session_max_age")]
    pub session_max_age_secs: u64,
    /// Expected `iss` claim
    #[serde(default)]
    pub issuer: Option<String>,
    /// Expected `aud` claim (the provider project id)
    #[serde(default)]
    pub audience: Option<String>,
    /// Provider JWKS document (RS256 keys)
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// Shared HS256 secret, for local emulator setups
    #[serde(default)]
    pub signing_secret: Option<String>,
    /// Internal verification endpoint used by the edge gate.
    /// Defaults to `/api/auth/verify` on this server.
    #[serde(default)]
    pub verify_endpoint: Option<String>,
    /// Timeout for one verification round trip
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_prefix: default_admin_prefix(),
            login_path: default_login_path(),
            cookie_name: default_cookie_name(),
            session_max_age_secs: default_session_max_age(),
            issuer: None,
            audience: None,
            jwks_url: None,
            signing_secret: None,
            verify_endpoint: None,
            verify_timeout_secs: default_verify_timeout(),
        }
    }
}

fn default_admin_prefix() -> String {
    "/admin".to_string()
}

fn default_login_path() -> String {
    "/admin".to_string()
}

fn default_cookie_name() -> String {
    "auth-token".to_string()
}

fn default_session_max_age() -> u64 {
    3600
}

fn default_verify_timeout() -> u64 {
    5
}

/// Identity provider client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Public API key of the provider project
    #[serde(default)]
    pub api_key: Option<String>,
    /// Password sign-in endpoint
    #[serde(default = "default_sign_in_url")]
    pub sign_in_url: String,
    /// Token refresh endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Cookie-set endpoint of the blog server
    #[serde(default = "default_session_endpoint")]
    pub session_endpoint: String,
    /// Proactive refresh period (default: 50 minutes)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Startup grace before `loading` is forced off
    #[serde(default = "default_loading_grace")]
    pub loading_grace_secs: u64,
    /// Where the session keeper writes the current `Cookie` header
    #[serde(default)]
    pub cookie_file: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            sign_in_url: default_sign_in_url(),
            token_url: default_token_url(),
            session_endpoint: default_session_endpoint(),
            refresh_interval_secs: default_refresh_interval(),
            loading_grace_secs: default_loading_grace(),
            cookie_file: None,
        }
    }
}

fn default_sign_in_url() -> String {
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword".to_string()
}

fn default_token_url() -> String {
    "https://securetoken.googleapis.com/v1/token".to_string()
}

fn default_session_endpoint() -> String {
    "http://localhost:8080/api/auth/session".to_string()
}

fn default_refresh_interval() -> u64 {
    50 * 60
}

fn default_loading_grace() -> u64 {
    3
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - INKPOST_SERVER_HOST
    /// - INKPOST_SERVER_PORT
    /// - INKPOST_SERVER_CORS_ORIGIN
    /// - INKPOST_SERVER_ENVIRONMENT
    /// - INKPOST_AUTH_ISSUER
    /// - INKPOST_AUTH_AUDIENCE
    /// - INKPOST_AUTH_JWKS_URL
    /// - INKPOST_AUTH_SIGNING_SECRET
    /// - INKPOST_AUTH_VERIFY_ENDPOINT
    /// - INKPOST_CLIENT_API_KEY
    /// - INKPOST_CLIENT_SESSION_ENDPOINT
    /// - INKPOST_CLIENT_COOKIE_FILE
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gate cannot work with
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.auth.admin_prefix.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "auth.admin_prefix must start with '/', got '{}'",
                self.auth.admin_prefix
            )));
        }
        if !self.auth.login_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "auth.login_path must start with '/', got '{}'",
                self.auth.login_path
            )));
        }
        if self.auth.cookie_name.is_empty()
            || self
                .auth
                .cookie_name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, ';' | '=' | ','))
        {
            return Err(ConfigError::ValidationError(format!(
                "auth.cookie_name '{}' is not a valid cookie name",
                self.auth.cookie_name
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("INKPOST_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("INKPOST_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("INKPOST_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }
        if let Ok(environment) = std::env::var("INKPOST_SERVER_ENVIRONMENT") {
            match environment.to_lowercase().as_str() {
                "development" | "dev" => self.server.environment = Environment::Development,
                "production" | "prod" => self.server.environment = Environment::Production,
                _ => {} // Ignore invalid values
            }
        }

        if let Ok(issuer) = std::env::var("INKPOST_AUTH_ISSUER") {
            self.auth.issuer = Some(issuer);
        }
        if let Ok(audience) = std::env::var("INKPOST_AUTH_AUDIENCE") {
            self.auth.audience = Some(audience);
        }
        if let Ok(jwks_url) = std::env::var("INKPOST_AUTH_JWKS_URL") {
            self.auth.jwks_url = Some(jwks_url);
        }
        if let Ok(secret) = std::env::var("INKPOST_AUTH_SIGNING_SECRET") {
            self.auth.signing_secret = Some(secret);
        }
        if let Ok(endpoint) = std::env::var("INKPOST_AUTH_VERIFY_ENDPOINT") {
            self.auth.verify_endpoint = Some(endpoint);
        }

        if let Ok(api_key) = std::env::var("INKPOST_CLIENT_API_KEY") {
            self.client.api_key = Some(api_key);
        }
        if let Ok(endpoint) = std::env::var("INKPOST_CLIENT_SESSION_ENDPOINT") {
            self.client.session_endpoint = endpoint;
        }
        if let Ok(path) = std::env::var("INKPOST_CLIENT_COOKIE_FILE") {
            self.client.cookie_file = Some(path);
        }
    }

    /// Verification endpoint the edge gate calls
    pub fn verify_endpoint(&self) -> String {
        self.auth
            .verify_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/api/auth/verify", self.server.local_base_url()))
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
