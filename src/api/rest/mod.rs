//! REST API module
//!
//! Organized into domain-specific submodules for maintainability.

mod admin;
mod auth;
mod download;
mod health;
mod heartbeat;
mod upload;
mod versions;

use crate::api::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use download::download_routes;
pub use health::health_routes;
pub use heartbeat::heartbeat_routes;
pub use upload::upload_routes;
pub use versions::version_routes;

/// Bind and serve the HTTP API until `cancel` is tripped.
pub async fn serve(addr: SocketAddr, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ORIGINS")
        .unwrap_or_else(|_| "*".to_string())
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers(vec![header::HeaderName::from_static("x-request-id")]);

    // One chunk plus headroom; chunk bytes arrive base64/compressed anyway.
    let body_limit = DefaultBodyLimit::max(8 * 1024 * 1024);

    let x_request_id = header::HeaderName::from_static("x-request-id");
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().include_headers(true).level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let app = Router::new()
        .merge(upload_routes())
        .merge(download_routes())
        .merge(version_routes())
        .merge(heartbeat_routes())
        .merge(auth_routes())
        .merge(admin_routes())
        .merge(health_routes())
        .layer(cors)
        .layer(body_limit)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(trace_layer)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then trip the shared cancellation token so
/// every background loop observes shutdown too.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }

    cancel.cancel();
}
