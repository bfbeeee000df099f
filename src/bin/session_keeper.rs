//! Inkpost session keeper
//!
//! Signs an operator in with the identity provider and keeps a blog session
//! cookie in step with the provider credential until interrupted. The cookie
//! lives in the keeper's jar; set `client.cookie_file` to have the current
//! `Cookie` header written out for other tools.
//!
//! Credentials come from `INKPOST_ADMIN_EMAIL` and `INKPOST_ADMIN_PASSWORD`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkpost::{
    config::Config,
    services::{
        AuthStateTracker, HttpSessionSink, RestIdentityClient, SessionSink, TrackerTimings,
    },
};

/// Mirror the session cookie into `path`, removing the file when there is none
async fn sync_cookie_file(path: Option<&str>, cookie: Option<&str>) {
    let Some(path) = path else { return };

    let result = match cookie {
        Some(cookie) => tokio::fs::write(path, cookie).await,
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };
    if let Err(e) = result {
        tracing::warn!("Failed to update cookie file {}: {}", path, e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkpost=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_with_env(Path::new("config.yml"))?;
    let email = std::env::var("INKPOST_ADMIN_EMAIL").context("INKPOST_ADMIN_EMAIL is not set")?;
    let password =
        std::env::var("INKPOST_ADMIN_PASSWORD").context("INKPOST_ADMIN_PASSWORD is not set")?;
    let cookie_file = config.client.cookie_file.as_deref();

    let client = Arc::new(RestIdentityClient::from_config(&config.client)?);
    let sink = Arc::new(HttpSessionSink::new(&config.client.session_endpoint)?);
    let tracker = AuthStateTracker::mount(
        client.clone(),
        sink.clone(),
        TrackerTimings::from(&config.client),
    );
    let mut state = tracker.subscribe();

    let user = client.sign_in_with_password(&email, &password).await?;
    tracing::info!(
        uid = %user.uid,
        "Signed in; keeping session at {}",
        config.client.session_endpoint
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                // The credential is published once its push has completed.
                let cookie = snapshot
                    .credential
                    .as_ref()
                    .and_then(|_| sink.session_cookie());
                tracing::info!(
                    signed_in = snapshot.user.is_some(),
                    has_session = cookie.is_some(),
                    loading = snapshot.loading,
                    "Auth state changed"
                );
                sync_cookie_file(cookie_file, cookie.as_deref()).await;
            }
        }
    }

    tracing::info!("Signing out");
    client.sign_out().await;
    tracker.unmount();

    // The tracker's own deletion may have been cut short by unmounting.
    sink.clear_session().await?;
    sync_cookie_file(cookie_file, None).await;
    Ok(())
}
