//! API route definitions.
//!
//! Triggers only validate and enqueue; they answer `202` before the run
//! starts. Outcomes arrive over `/ws` or by polling history.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::orchestrator::{RunError, RunJob};
use crate::projects::validate::{normalize_grep, validate_project_id};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects))
        .route("/projects/{id}/run", post(trigger_run))
        .route("/projects/{id}/runs", get(project_history).post(upload_run))
        .route("/projects/{id}/runs/last", get(project_last_run))
        .route("/run-all", post(trigger_run_all))
        .route("/runs/active", get(active_runs))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunRequest {
    grep: Option<String>,
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

/// An empty body means "no filter".
fn parse_run_request(body: &Bytes) -> Result<RunRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "activeRuns": state.orchestrator.active_runs().len(),
            "observers": state.orchestrator.live().observer_count(),
        },
        "meta": meta()
    }))
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let projects: Vec<_> = state.catalog.discover()?.into_values().collect();
    let total = projects.len();
    Ok(Json(json!({
        "data": projects,
        "meta": { "total": total, "timestamp": chrono::Utc::now().to_rfc3339() }
    })))
}

async fn trigger_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_project_id(&id)?;
    let request = parse_run_request(&body)?;
    let grep = normalize_grep(request.grep.as_deref())?;

    let project = state
        .catalog
        .find(&id)?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;
    if !project.can_run_from_ui {
        return Err(RunError::NotRunnable { project_id: id }.into());
    }
    if state.orchestrator.is_running(&id) {
        return Err(RunError::AlreadyRunning { project_id: id }.into());
    }

    let job_id = state.queue.enqueue(RunJob::single(id.clone(), grep.clone()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": { "jobId": job_id, "projectId": id, "grep": grep, "status": "queued" },
            "meta": meta()
        })),
    ))
}

async fn trigger_run_all(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = parse_run_request(&body)?;
    let grep = normalize_grep(request.grep.as_deref())?;

    let projects: Vec<String> = state
        .catalog
        .discover()?
        .into_values()
        .filter(|p| p.can_run_from_ui)
        .map(|p| p.id)
        .collect();

    let job_id = state.queue.enqueue(RunJob::batch(grep.clone()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": { "jobId": job_id, "projects": projects, "grep": grep, "status": "queued" },
            "meta": meta()
        })),
    ))
}

async fn project_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    validate_project_id(&id)?;
    let history = state.orchestrator.store().read_all_async(&id).await?;
    let total = history.runs.len();
    Ok(Json(json!({
        "data": history,
        "meta": { "total": total, "timestamp": chrono::Utc::now().to_rfc3339() }
    })))
}

async fn project_last_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    validate_project_id(&id)?;
    let last_run = state.orchestrator.store().read_last_async(&id).await?;
    Ok(Json(json!({ "data": { "lastRun": last_run }, "meta": meta() })))
}

async fn upload_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_project_id(&id)?;
    let run = state.orchestrator.record_uploaded(&id, &body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": run, "meta": meta() })),
    ))
}

async fn active_runs(State(state): State<AppState>) -> Json<Value> {
    let runs = state.orchestrator.active_runs();
    let project_ids: Vec<&str> = runs.iter().map(|r| r.project_id.as_str()).collect();
    Json(json!({
        "data": { "projectIds": project_ids, "runs": runs },
        "meta": { "total": runs.len() }
    }))
}
