//! REST + WebSocket API using Axum
//!
//! Exposes the classification pipeline and review service over HTTP and
//! streams hub events over `/ws`. Classified files are served read-only from
//! the upload directory under the configured public prefix.

pub mod error;
pub mod handlers;
mod routes;
mod ws;

pub use error::ApiError;
pub use handlers::AppState;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build a CORS layer that is restrictive by default (same-origin only).
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() {
        return base;
    }

    let allowed: Vec<_> = origins.iter().filter_map(|o| o.trim().parse().ok()).collect();
    tracing::info!(origins = ?origins, "CORS: allowing configured origins");
    base.allow_origin(allowed)
}

/// Create the complete application router.
pub fn create_app(ctx: AppState) -> Router {
    let cors = build_cors_layer(&ctx.config.server.cors_origins);
    let files = &ctx.config.files;
    let prefix = files.public_prefix.trim_end_matches('/').to_string();

    Router::new()
        .merge(routes::api_routes())
        .nest("/admin", routes::admin_routes())
        .nest_service(&prefix, ServeDir::new(&files.upload_dir))
        .layer(DefaultBodyLimit::max(ctx.config.max_upload_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(ctx)
}
