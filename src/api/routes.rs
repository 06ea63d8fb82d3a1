use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_FILTER_NAME;
use crate::error::AppError;
use crate::parser::normalize_price;
use crate::state::FilterView;
use crate::types::{FilterSpec, OwnerId};
use crate::watcher::{OfferWatcher, PollTiming, WatcherContext};

#[derive(Clone)]
pub struct ApiState {
    pub ctx: WatcherContext,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/owners/:owner/filters", post(create_filter).get(list_filters))
        .route("/owners/:owner/filters/:index", axum::routing::delete(delete_filter))
        .route("/owners/:owner/filters/:index/pause", post(pause_filter))
        .route("/owners/:owner/filters/:index/resume", post(resume_filter))
        .route("/health", get(health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Prices arrive as free text ("12,50 €" is fine) and are normalized with
/// the same rules as scraped prices.
#[derive(Deserialize)]
pub struct CreateFilterRequest {
    pub url: String,
    pub min_price: String,
    pub max_price: String,
    pub name: Option<String>,
    pub channel: Option<String>,
}

#[derive(Serialize)]
pub struct RemovedResponse {
    pub removed: FilterView,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub active_filters: usize,
    pub notify_queue_depth: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_filter(
    State(state): State<ApiState>,
    Path(owner): Path<OwnerId>,
    Json(req): Json<CreateFilterRequest>,
) -> Result<(StatusCode, Json<FilterView>), AppError> {
    let min_price = normalize_price(&req.min_price)
        .ok_or_else(|| AppError::InvalidPrice(req.min_price.clone()))?;
    let max_price = normalize_price(&req.max_price)
        .ok_or_else(|| AppError::InvalidPrice(req.max_price.clone()))?;

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER_NAME.to_string());

    let spec = FilterSpec {
        url: req.url.trim().to_string(),
        min_price,
        max_price,
        name,
        paused: false,
        channel: req.channel,
    };

    // insert → spawn → attach → persist, synchronously, so the new filter is
    // on disk before this handler yields its response
    let store = &state.ctx.store;
    let id = store.insert(owner, spec.clone());
    let task = OfferWatcher::new(state.ctx.clone(), owner, id, PollTiming::default()).spawn();
    store.attach_task(owner, id, task);
    store.persist();

    let index = store.position_of(owner, id).ok_or(AppError::InvalidIndex)?;
    Ok((
        StatusCode::CREATED,
        Json(FilterView {
            index,
            name: spec.name,
            url: spec.url,
            min_price: spec.min_price,
            max_price: spec.max_price,
            paused: spec.paused,
        }),
    ))
}

async fn list_filters(
    State(state): State<ApiState>,
    Path(owner): Path<OwnerId>,
) -> Json<Vec<FilterView>> {
    Json(state.ctx.store.list(owner))
}

async fn delete_filter(
    State(state): State<ApiState>,
    Path((owner, index)): Path<(OwnerId, usize)>,
) -> Result<Json<RemovedResponse>, AppError> {
    let spec = state.ctx.store.remove_at(owner, index)?;
    Ok(Json(RemovedResponse {
        removed: FilterView {
            index,
            name: spec.name,
            url: spec.url,
            min_price: spec.min_price,
            max_price: spec.max_price,
            paused: spec.paused,
        },
    }))
}

async fn pause_filter(
    State(state): State<ApiState>,
    Path((owner, index)): Path<(OwnerId, usize)>,
) -> Result<StatusCode, AppError> {
    state.ctx.store.set_paused(owner, index, true)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_filter(
    State(state): State<ApiState>,
    Path((owner, index)): Path<(OwnerId, usize)>,
) -> Result<StatusCode, AppError> {
    state.ctx.store.set_paused(owner, index, false)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let tx = &state.ctx.notify_tx;
    Json(HealthResponse {
        active_filters: state.ctx.store.active_count(),
        notify_queue_depth: tx.max_capacity() - tx.capacity(),
    })
}
