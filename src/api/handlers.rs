//! HTTP handlers.

use super::error::ApiError;
use crate::config::defaults::MAX_PAGE_SIZE;
use crate::context::AppContext;
use crate::dispatcher::{DispatcherStats, PoolState};
use crate::fingerprint::FingerprintHasher;
use crate::hub::HubEvent;
use crate::pipeline::UploadItem;
use crate::prediction::Prediction;
use crate::review::{DeleteRequest, LabelRequest, Page};
use crate::storage::ReviewStats;
use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub type AppState = Arc<AppContext>;

/// `true` for multipart fields that carry uploads: `files` or `files[...]`.
fn is_upload_field(name: &str) -> bool {
    name == "files" || name.starts_with("files[")
}

/// POST /api/detect-nsfw
pub async fn detect(State(ctx): State<AppState>, mut multipart: Multipart) -> Result<Json<Vec<Prediction>>, ApiError> {
    let mut items = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("malformed multipart body").with_details(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if !is_upload_field(&name) {
            debug!(field = %name, "Ignoring non-file multipart field");
            continue;
        }

        let filename = field.file_name().unwrap_or(name.as_str()).to_string();

        // Hash while receiving so the pipeline never re-reads the buffer.
        let mut hasher = FingerprintHasher::new();
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request("failed to read upload").with_details(e.to_string()))?
        {
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        debug!(file = %filename, bytes = hasher.len(), "Upload received");
        items.push(UploadItem::prehashed(filename, bytes, hasher.finish()));
    }

    if items.is_empty() {
        return Err(ApiError::bad_request("no files uploaded"));
    }

    Ok(Json(ctx.pipeline.process_batch(items).await))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub reviewed: Option<bool>,
}

/// GET /admin/images/:cursor/:limit
pub async fn list_images(
    State(ctx): State<AppState>,
    Path((cursor, limit)): Path<(u64, usize)>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page>, ApiError> {
    if limit == 0 {
        return Err(ApiError::bad_request("limit must be > 0"));
    }
    let page = ctx
        .review
        .page(cursor, limit.min(MAX_PAGE_SIZE), query.reviewed)
        .await?;
    Ok(Json(page))
}

/// POST /admin/label/add/:hash and /admin/label/update/:hash
pub async fn label_image(
    State(ctx): State<AppState>,
    Path(hash): Path<String>,
    Json(request): Json<LabelRequest>,
) -> Result<Json<HubEvent>, ApiError> {
    Ok(Json(ctx.review.label(&hash, request).await?))
}

/// POST /admin/delete/:hash
pub async fn delete_image(
    State(ctx): State<AppState>,
    Path(hash): Path<String>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<HubEvent>, ApiError> {
    Ok(Json(ctx.review.delete(&hash, request).await?))
}

/// GET /admin/stats
pub async fn stats(State(ctx): State<AppState>) -> Result<Json<ReviewStats>, ApiError> {
    Ok(Json(ctx.review.stats().await?))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub dispatcher: DispatcherStats,
    pub hub_clients: Option<usize>,
    pub cache_entries: usize,
    pub storage: &'static str,
}

/// GET /health
pub async fn health(State(ctx): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = ctx.dispatcher.stats();
    let status = if dispatcher.state == PoolState::Running {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        dispatcher,
        hub_clients: ctx.hub.client_count().await.ok(),
        cache_entries: ctx.cache.len(),
        storage: ctx.repository.backend_name(),
    })
}
