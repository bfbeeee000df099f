//! API layer - HTTP handlers and routing
//!
//! This module contains the HTTP surface of the Inkpost blog:
//! - Public and admin HTML pages, the latter behind the edge access gate
//! - Auth API endpoints (verify, session cookie, logout)
//! - Admin API endpoints behind the session guard

pub mod admin;
pub mod auth;
pub mod middleware;
pub mod pages;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedIdentity, GateRules};

/// Build the API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need a verified session)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_session,
        ));

    Router::new()
        .nest("/auth", auth::router())
        .merge(admin_routes)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid CORS origin {:?}: {}", cors_origin, e))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    Ok(Router::new()
        .merge(pages::router(&state.gate))
        .nest("/api", build_api_router(state.clone()))
        .fallback(not_found)
        // Edge gate sees every request, matched or not
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::admin_gate,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
