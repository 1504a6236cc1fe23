//! HTTP surface: membership queries, probes and admin endpoints.
//!
//! | Route                          | Response                                         |
//! |--------------------------------|--------------------------------------------------|
//! | `GET /membership?group=&recurse=` | sorted members; 404 unknown group             |
//! | `GET /groups-for-user?user=`   | sorted groups, empty if none                     |
//! | `GET /admin/groups/{group}`    | same as `/membership`                            |
//! | `GET /admin/users/{user}`      | same as `/groups-for-user`                       |
//! | `GET /admin/ready`             | 200 once ready, 503 before                       |
//! | `GET /admin/alive`             | always 200                                       |
//! | `GET /admin/status`            | [`SchedulerStatus`](crate::scheduler::SchedulerStatus) |
//! | `POST /admin/sync`             | runs a cycle now; 409 while one is running       |
//!
//! Membership queries answer 503 until the first tree is published.

use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    Error,
    query::QueryService,
    scheduler::{CycleReport, SchedulerError, SyncScheduler},
};

/// Shared state for all handlers.
#[derive(Clone)]
struct AppState {
    scheduler: SyncScheduler,
    query: QueryService,
}

/// Build the service router backed by `scheduler`.
pub fn router(scheduler: SyncScheduler) -> Router {
    let state = AppState {
        query: QueryService::new(scheduler.tree_handle()),
        scheduler,
    };

    Router::new()
        .route("/membership", get(handle_membership))
        .route("/groups-for-user", get(handle_groups_for_user))
        .route("/admin/groups/{group}", get(handle_admin_group))
        .route("/admin/users/{user}", get(handle_admin_user))
        .route("/admin/ready", get(handle_ready))
        .route("/admin/alive", get(handle_alive))
        .route("/admin/status", get(handle_status))
        .route("/admin/sync", post(handle_sync))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Log every request except probe and admin traffic.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    if path.starts_with("/admin/") {
        return next.run(request).await;
    }

    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Handled HTTP request"
    );
    response
}

/// Error body: `{"error": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps library errors onto HTTP statuses.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.0.is_not_ready() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if self.0.is_cycle_in_progress() {
            StatusCode::CONFLICT
        } else {
            error!("Request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct MembershipParams {
    group: String,
    #[serde(default)]
    recurse: bool,
}

#[derive(Debug, Deserialize)]
struct UserParams {
    user: String,
}

#[derive(Debug, Deserialize)]
struct RecurseParams {
    #[serde(default)]
    recurse: bool,
}

async fn handle_membership(
    State(state): State<AppState>,
    Query(params): Query<MembershipParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(
        state
            .query
            .list_group_members(&params.group, params.recurse)?,
    ))
}

async fn handle_groups_for_user(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.query.list_user_groups(&params.user)?))
}

async fn handle_admin_group(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Query(params): Query<RecurseParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.query.list_group_members(&group, params.recurse)?))
}

async fn handle_admin_user(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.query.list_user_groups(&user)?))
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    status: &'static str,
}

async fn handle_ready(State(state): State<AppState>) -> (StatusCode, Json<ProbeResponse>) {
    if state.scheduler.is_ready() {
        (StatusCode::OK, Json(ProbeResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse { status: "starting" }),
        )
    }
}

async fn handle_alive() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "alive" })
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

/// Run a cycle to completion and return its report.
///
/// The cycle runs on its own task so it finishes even if the client goes away.
async fn handle_sync(State(state): State<AppState>) -> Result<Json<CycleReport>, ApiError> {
    if state.scheduler.is_busy() {
        return Err(Error::from(SchedulerError::CycleInProgress).into());
    }
    let scheduler = state.scheduler.clone();
    let report = tokio::spawn(async move { scheduler.run_cycle().await })
        .await
        .map_err(|e| Error::from(SchedulerError::TaskFailed(e.to_string())))??;
    Ok(Json(report))
}
