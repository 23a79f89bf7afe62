pub mod admin;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Builds the admin API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/admin/run-scripts", post(admin::start_run))
        .route(
            "/api/v1/admin/sync-state",
            get(admin::get_sync_state).post(admin::save_sync_state),
        )
        .route("/api/v1/admin/sync-state/reset", post(admin::reset_sync_state))
        .route(
            "/api/v1/admin/sync-state/complete",
            post(admin::complete_sync),
        )
        .route(
            "/api/v1/admin/pipeline-status",
            get(admin::get_pipeline_status),
        )
        .route(
            "/api/v1/admin/pipeline-status/reconcile",
            post(admin::reconcile_pipeline_status),
        )
        .with_state(state)
}
