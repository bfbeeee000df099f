//! Inkpost - A blog with a gated admin area

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkpost::{
    api::{self, AppState, GateRules},
    config::Config,
    services::{EndpointVerifier, ProviderVerifier, SessionCookieManager},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkpost=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Inkpost...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded ({:?})", config.server.environment);

    // Credential verification; missing provider settings are fatal
    let verifier = ProviderVerifier::from_config(&config.auth)
        .context("Identity provider is not configured")?;

    let gate_verifier = EndpointVerifier::new(
        config.verify_endpoint(),
        Duration::from_secs(config.auth.verify_timeout_secs),
    )?;
    tracing::info!("Edge gate verifies through {}", gate_verifier.endpoint());

    let state = AppState {
        verifier: Arc::new(verifier),
        gate_verifier: Arc::new(gate_verifier),
        sessions: Arc::new(SessionCookieManager::from_config(&config.auth, &config.server)),
        gate: Arc::new(GateRules::from_config(&config.auth)),
    };

    // Build router
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
