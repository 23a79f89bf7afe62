//! Run acceptance: validation, the atomic busy guard, and handing the
//! pipeline off to a detached background task.

use std::sync::Arc;

use tracing::{info_span, Instrument};

use crate::broadcast::RunProgressBroadcaster;
use crate::db::{pipeline_status_repo, sync_state_repo, Database};

use super::context::RunContext;
use super::error::PipelineError;
use super::progress::BroadcastProgress;
use super::runner::SyncPipeline;

/// Acknowledgment returned to the caller the moment a run is accepted.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub run_id: String,
}

/// Accepts run requests and spawns the orchestrator for each.
///
/// The HTTP handler gets an answer immediately; the spawned task owns
/// writing its own terminal state, so a failure after acceptance is
/// observable through the stores rather than a dropped response.
pub struct RunCoordinator {
    db: Database,
    pipeline: Arc<SyncPipeline>,
    broadcaster: Arc<RunProgressBroadcaster>,
}

impl RunCoordinator {
    pub fn new(
        db: Database,
        pipeline: Arc<SyncPipeline>,
        broadcaster: Arc<RunProgressBroadcaster>,
    ) -> Self {
        Self {
            db,
            pipeline,
            broadcaster,
        }
    }

    /// Validates and accepts a run for a tenant.
    ///
    /// Rejects before touching any state when the input is malformed;
    /// rejects with [`PipelineError::AlreadyRunning`] when the tenant's
    /// busy guard is held. Must be called from within a tokio runtime.
    pub fn start_run(
        &self,
        client_name: &str,
        categories: Vec<String>,
    ) -> Result<StartedRun, PipelineError> {
        let client_name = client_name.trim();
        validate_name("client name", client_name)?;
        if categories.is_empty() {
            return Err(PipelineError::Validation(
                "at least one category is required".to_string(),
            ));
        }
        let categories: Vec<String> = categories
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        for category in &categories {
            validate_name("category", category)?;
        }

        // Atomic check-and-set of the busy guard: two overlapping start
        // calls cannot both observe "not running".
        if !sync_state_repo::try_begin_run(&self.db, client_name, &categories)? {
            return Err(PipelineError::AlreadyRunning(client_name.to_string()));
        }

        let ctx = RunContext::new(client_name, categories);

        pipeline_status_repo::record(
            &self.db,
            client_name,
            &ctx.run_id,
            "pending",
            "Run accepted, pipeline starting",
            None,
        )?;

        let tracker = self.broadcaster.tracker(&ctx.run_id, client_name);
        let pipeline = Arc::clone(&self.pipeline);
        let run_id = ctx.run_id.clone();
        let span = info_span!("pipeline_run", run_id = %ctx.run_id, client = %ctx.client_name);

        tokio::spawn(
            async move {
                let progress = BroadcastProgress::new(tracker);
                let report = pipeline.run(&ctx, &progress).await;
                if report.success {
                    tracing::info!("run finished");
                } else {
                    tracing::error!(
                        error = report.error.as_deref().unwrap_or("unknown"),
                        "run failed"
                    );
                }
            }
            .instrument(span),
        );

        Ok(StartedRun { run_id })
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    if value.contains('/') || value.contains("..") {
        return Err(PipelineError::Validation(format!(
            "{} must not contain path separators: '{}'",
            field, value
        )));
    }
    Ok(())
}
