//! API route definitions
//!
//! - `/api/detect-nsfw` - batch upload and classification
//! - `/ws` - live event stream
//! - `/admin/*` - review: listing, labels, deletion, statistics
//! - `/health` - liveness and pool status

use axum::{routing::{get, post}, Router};

use super::handlers::{self, AppState};
use super::ws;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/detect-nsfw", post(handlers::detect))
        .route("/ws", get(ws::upgrade))
        .route("/health", get(handlers::health))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/images/:cursor/:limit", get(handlers::list_images))
        .route("/label/add/:hash", post(handlers::label_image))
        .route("/label/update/:hash", post(handlers::label_image))
        .route("/delete/:hash", post(handlers::delete_image))
        .route("/stats", get(handlers::stats))
}
