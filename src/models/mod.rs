//! Data models
//!
//! This module contains the data structures shared by the auth gate:
//! - Credential claims and the decoded identity
//! - The session cookie projection

mod identity;
mod session;

pub use identity::{CredentialClaims, DecodedIdentity};
pub use session::Session;
