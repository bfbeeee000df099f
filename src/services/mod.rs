//! Services layer - Authentication logic
//!
//! This module contains the services behind the admin session:
//! - Credential verification against the identity provider
//! - The session cookie manager
//! - The client-side auth state tracker and its provider client

pub mod auth_state;
pub mod identity_client;
pub mod session;
pub mod verifier;

pub use auth_state::{
    AuthSnapshot, AuthStateTracker, IdentityClient, ProviderUser, SessionSink, TrackerTimings,
};
pub use identity_client::{HttpSessionSink, RestIdentityClient};
pub use session::SessionCookieManager;
pub use verifier::{
    AuthError, CredentialVerifier, EndpointVerifier, ProviderVerifier, VerifyResponse,
};
