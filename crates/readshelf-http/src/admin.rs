//! Operator control surface for the cache.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use readshelf_cache::CacheManager;
use readshelf_scheduler::{CleanupJob, InvalidationScheduler, SchedulerError};

#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<CacheManager>,
    pub scheduler: Arc<InvalidationScheduler>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn scheduler_error(err: SchedulerError) -> Response {
    let status = match &err {
        SchedulerError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
        SchedulerError::UnknownJob(_) => StatusCode::NOT_FOUND,
        SchedulerError::DuplicateJob(_) => StatusCode::CONFLICT,
    };
    error_response(status, err.to_string())
}

/// Routes mounted under `/admin/cache`.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/cache/clear/namespace", post(clear_namespace))
        .route("/admin/cache/clear/pattern", post(clear_pattern))
        .route("/admin/cache/clear/tags", post(clear_tags))
        .route("/admin/cache/jobs", get(list_jobs).post(register_job))
        .route("/admin/cache/jobs/{name}/run", post(run_job))
        .route("/admin/cache/jobs/{name}/enable", post(enable_job))
        .route("/admin/cache/jobs/{name}/disable", post(disable_job))
        .with_state(state)
}

async fn cache_stats(State(state): State<AdminState>) -> Response {
    match state.manager.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ClearNamespaceRequest {
    namespace: String,
}

#[derive(Debug, Serialize)]
struct ClearNamespaceResponse {
    namespace: String,
    new_version: u64,
}

async fn clear_namespace(
    State(state): State<AdminState>,
    Json(request): Json<ClearNamespaceRequest>,
) -> Response {
    match state.manager.invalidate_namespace(&request.namespace).await {
        Some(new_version) => Json(ClearNamespaceResponse {
            namespace: request.namespace,
            new_version,
        })
        .into_response(),
        None => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "namespace invalidation failed, cache backend unavailable",
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ClearPatternRequest {
    pattern: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClearTagsRequest {
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ClearedResponse {
    removed: u64,
}

async fn clear_pattern(
    State(state): State<AdminState>,
    Json(request): Json<ClearPatternRequest>,
) -> Json<ClearedResponse> {
    let removed = state
        .manager
        .clear_pattern(&request.pattern, request.namespace.as_deref())
        .await;
    Json(ClearedResponse { removed })
}

async fn clear_tags(
    State(state): State<AdminState>,
    Json(request): Json<ClearTagsRequest>,
) -> Json<ClearedResponse> {
    let removed = state.manager.invalidate_by_tags(&request.tags).await;
    Json(ClearedResponse { removed })
}

async fn list_jobs(State(state): State<AdminState>) -> Response {
    Json(state.scheduler.jobs()).into_response()
}

async fn register_job(State(state): State<AdminState>, Json(payload): Json<Value>) -> Response {
    // Deserialize by hand so a malformed schedule is a clean 400 with the
    // serde message, not a generic extractor rejection.
    let job: CleanupJob = match serde_json::from_value(payload) {
        Ok(job) => job,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let name = job.name.clone();
    match state.scheduler.register(job) {
        Ok(()) => (StatusCode::CREATED, Json(serde_json::json!({ "name": name }))).into_response(),
        Err(err) => scheduler_error(err),
    }
}

async fn run_job(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.scheduler.run_now(&name).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => scheduler_error(err),
    }
}

async fn enable_job(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.scheduler.enable(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => scheduler_error(err),
    }
}

async fn disable_job(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.scheduler.disable(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => scheduler_error(err),
    }
}
