//! Admin API handlers: run start, sync-state CRUD, pipeline status.
//!
//! Every response uses the `{status, message, data}` envelope the
//! dashboard expects. A run start answers immediately with the run id;
//! the orchestration continues in the background and is observed
//! through the status endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use catsync::db::pipeline_status_repo::{self, StatusSnapshot};
use catsync::db::sync_state_repo::{self, SyncStatePatch, SyncStateRow, SyncStatus};
use catsync::pipeline::PipelineError;
use catsync::reconcile::{ReconcileError, ReconcileOutcome};

use crate::state::AppState;

/// Response envelope shared by every admin endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    fn ok(message: &str, data: T) -> Json<Self> {
        Json(Self {
            status: true,
            message: message.to_string(),
            data: Some(data),
        })
    }

    fn ok_empty(message: &str) -> Json<Self> {
        Json(Self {
            status: true,
            message: message.to_string(),
            data: None,
        })
    }
}

/// Error carrying the HTTP status it should map to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope::<Value> {
            status: false,
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<catsync::db::DatabaseError> for ApiError {
    fn from(e: catsync::db::DatabaseError) -> Self {
        tracing::error!("database error: {}", e);
        ApiError::internal("Internal storage error")
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(message) => ApiError::bad_request(message),
            PipelineError::AlreadyRunning(client) => ApiError::conflict(format!(
                "A sync run is already in progress for client '{}'",
                client
            )),
            PipelineError::Database(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Database(e) => e.into(),
            ReconcileError::Store(e) => {
                tracing::error!("store error during reconcile: {}", e);
                ApiError::internal("Object store unavailable")
            }
        }
    }
}

// ============================================================================
// Run start
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub client_name: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: String,
}

/// `POST /api/v1/admin/run-scripts` — accepts a run and returns 202
/// immediately; progress is observed through the status endpoints.
pub async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let started = state
        .coordinator
        .start_run(&request.client_name, request.categories)?;

    Ok((
        StatusCode::ACCEPTED,
        Envelope::ok(
            "Run accepted, scripts executing in background",
            StartRunResponse {
                run_id: started.run_id,
            },
        ),
    ))
}

// ============================================================================
// Sync state
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientQuery {
    pub client_name: Option<String>,
}

/// `GET /api/v1/admin/sync-state?clientName=`
pub async fn get_sync_state(
    State(state): State<AppState>,
    Query(query): Query<ClientQuery>,
) -> Result<Json<Envelope<SyncStateRow>>, ApiError> {
    let client_name = require_client(query.client_name.as_deref())?;

    match sync_state_repo::get(&state.db, client_name)? {
        Some(row) => Ok(Envelope::ok("Sync state retrieved successfully", row)),
        None => Ok(Envelope::ok_empty("No sync state found")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSyncStateRequest {
    pub client_name: String,
    pub current_step: Option<u32>,
    pub status: Option<String>,
    pub csv_file: Option<Value>,
    pub field_mappings: Option<Value>,
    pub selected_categories: Option<Vec<String>>,
    pub pipeline_status: Option<String>,
    pub is_running_scripts: Option<bool>,
    pub scripts_started_at: Option<String>,
    pub metadata: Option<Value>,
}

/// `POST /api/v1/admin/sync-state` — partial save; absent fields are
/// left untouched.
pub async fn save_sync_state(
    State(state): State<AppState>,
    Json(request): Json<SaveSyncStateRequest>,
) -> Result<Json<Envelope<SyncStateRow>>, ApiError> {
    let client_name = require_client(Some(request.client_name.as_str()))?;

    if let Some(step) = request.current_step {
        if !(1..=3).contains(&step) {
            return Err(ApiError::bad_request("Current step must be between 1 and 3"));
        }
    }

    let status = match request.status.as_deref() {
        None => None,
        Some(raw) => Some(SyncStatus::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!("Unknown sync status '{}'", raw))
        })?),
    };

    let patch = SyncStatePatch {
        current_step: request.current_step,
        status,
        csv_file: request.csv_file,
        field_mappings: request.field_mappings,
        selected_categories: request.selected_categories,
        pipeline_status: request.pipeline_status,
        is_running_scripts: request.is_running_scripts,
        scripts_started_at: request.scripts_started_at,
        metadata: request.metadata,
    };

    let row = sync_state_repo::upsert(&state.db, client_name, &patch)?;
    Ok(Envelope::ok("Sync state saved successfully", row))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBody {
    pub client_name: String,
}

/// `POST /api/v1/admin/sync-state/reset` — back to step 1, preserving
/// the last-sync history.
pub async fn reset_sync_state(
    State(state): State<AppState>,
    Json(request): Json<ClientBody>,
) -> Result<Json<Envelope<SyncStateRow>>, ApiError> {
    let client_name = require_client(Some(request.client_name.as_str()))?;
    let row = sync_state_repo::reset(&state.db, client_name)?;
    Ok(Envelope::ok("Sync state reset successfully", row))
}

/// `POST /api/v1/admin/sync-state/complete` — manual completion stamp.
pub async fn complete_sync(
    State(state): State<AppState>,
    Json(request): Json<ClientBody>,
) -> Result<Json<Envelope<SyncStateRow>>, ApiError> {
    let client_name = require_client(Some(request.client_name.as_str()))?;

    sync_state_repo::upsert(&state.db, client_name, &SyncStatePatch::default())?;
    sync_state_repo::finish_success(&state.db, client_name)?;

    match sync_state_repo::get(&state.db, client_name)? {
        Some(row) => Ok(Envelope::ok("Sync completion recorded successfully", row)),
        None => Err(ApiError::internal("Sync state missing after completion")),
    }
}

// ============================================================================
// Pipeline status
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusQuery {
    pub client_name: Option<String>,
    pub run_id: Option<String>,
}

/// Synthetic snapshot for a run that has been accepted but produced no
/// status record yet. Pending is a first-class, pollable state — a 404
/// here would leave the caller unable to tell "not started" from
/// "unknown run".
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPlaceholder {
    pub client_name: String,
    pub run_id: String,
    pub status: String,
    pub message: String,
    pub pipeline_status: String,
    pub is_success: bool,
    pub is_failed: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PipelineStatusResponse {
    Snapshot(StatusSnapshot),
    Pending(PendingPlaceholder),
}

/// `GET /api/v1/admin/pipeline-status?clientName=&runId=`
pub async fn get_pipeline_status(
    State(state): State<AppState>,
    Query(query): Query<PipelineStatusQuery>,
) -> Result<Json<Envelope<PipelineStatusResponse>>, ApiError> {
    let client_name = require_client(query.client_name.as_deref())?;

    if let Some(run_id) = query.run_id.as_deref() {
        return match pipeline_status_repo::latest_for_run(&state.db, client_name, run_id)? {
            Some(row) => Ok(Envelope::ok(
                "Pipeline status fetched successfully",
                PipelineStatusResponse::Snapshot(StatusSnapshot::from_record(row)),
            )),
            None => Ok(Envelope::ok(
                "Pipeline status pending - processing has not started yet",
                PipelineStatusResponse::Pending(PendingPlaceholder {
                    client_name: client_name.to_string(),
                    run_id: run_id.to_string(),
                    status: "pending".to_string(),
                    message: "Run accepted but pipeline processing has not started yet"
                        .to_string(),
                    pipeline_status: "pending".to_string(),
                    is_success: false,
                    is_failed: false,
                }),
            )),
        };
    }

    match pipeline_status_repo::latest(&state.db, client_name)? {
        Some(row) => Ok(Envelope::ok(
            "Pipeline status fetched successfully",
            PipelineStatusResponse::Snapshot(StatusSnapshot::from_record(row)),
        )),
        None => Err(ApiError::not_found(format!(
            "No pipeline status found for client \"{}\"",
            client_name
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub client_name: String,
    pub run_id: Option<String>,
}

/// `POST /api/v1/admin/pipeline-status/reconcile` — checks the object
/// store for outputs and flips a pending record to success when they
/// are there.
pub async fn reconcile_pipeline_status(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<Envelope<ReconcileOutcome>>, ApiError> {
    let client_name = require_client(Some(request.client_name.as_str()))?;

    let outcome = state
        .reconciler
        .reconcile(client_name, request.run_id.as_deref())
        .await?;

    let message = if outcome.flipped {
        "Pipeline status reconciled: pending run completed"
    } else if outcome.skipped {
        "Reconcile skipped: another cycle in progress"
    } else {
        "Pipeline status unchanged"
    };
    Ok(Envelope::ok(message, outcome))
}

fn require_client(client_name: Option<&str>) -> Result<&str, ApiError> {
    match client_name.map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ApiError::bad_request("Client name is required")),
    }
}
