//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use aftercare_core::config::AftercareConfig;
use aftercare_core::error::AftercareError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Turns allowed per second across all sessions.
const TURNS_PER_SEC: u64 = 50;

/// Turn bodies may carry a base64 image.
const TURN_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let port = state.controller.config().general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let turn_routes = Router::new()
        .route("/sessions/{id}/turns", post(handlers::handle_turn))
        .layer(DefaultBodyLimit::max(TURN_BODY_LIMIT))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(RateLimiter::new(TURNS_PER_SEC)));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::close_session),
        )
        .layer(DefaultBodyLimit::max(64 * 1024))
        .merge(turn_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on 127.0.0.1 and the configured port.
pub async fn start_server(config: &AftercareConfig, state: AppState) -> Result<(), AftercareError> {
    let addr = format!("127.0.0.1:{}", config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AftercareError::Server(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| AftercareError::Server(format!("Server error: {}", e)))?;

    Ok(())
}
