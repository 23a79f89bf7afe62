//! The run orchestrator: extract → transform → per-category quality
//! fan-out, with terminal state persisted on every exit path.

use std::sync::Arc;

use serde_json::json;
use tracing::{info_span, Instrument};

use crate::broadcast::run_progress::RunPhase;
use crate::config::{ScriptsConfig, StoreConfig};
use crate::db::{pipeline_status_repo, sync_state_repo, Database};
use crate::script::{ScriptError, ScriptExec, ScriptOutput, ScriptSpec};
use crate::store::ObjectStore;

use super::context::{CategoryOutcome, RunContext, RunReport, RunStep};
use super::progress::{ProgressEvent, ProgressReporter};

pub struct SyncPipeline {
    db: Database,
    store: Arc<dyn ObjectStore>,
    scripts: Arc<dyn ScriptExec>,
    script_config: ScriptsConfig,
    store_config: StoreConfig,
}

impl SyncPipeline {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        scripts: Arc<dyn ScriptExec>,
        script_config: ScriptsConfig,
        store_config: StoreConfig,
    ) -> Self {
        Self {
            db,
            store,
            scripts,
            script_config,
            store_config,
        }
    }

    /// Runs the full pipeline for one accepted run.
    ///
    /// Strictly sequential: transform never starts before extract's
    /// result is known, and the fan-out processes categories one at a
    /// time in array order to bound load on the scripting host. Every
    /// exit path writes the tenant's terminal state — this method is
    /// executed in a detached task with nobody left to report to.
    pub async fn run(&self, ctx: &RunContext, progress: &dyn ProgressReporter) -> RunReport {
        tracing::info!(
            run_id = %ctx.run_id,
            client = %ctx.client_name,
            categories = ctx.categories.len(),
            "starting pipeline run"
        );

        // Step A: bulk extraction.
        progress.report(ProgressEvent::Phase {
            phase: RunPhase::Extracting,
            message: "Running bulk extraction...".to_string(),
        });
        let spec = self
            .script_config
            .extract
            .spec()
            .arg(&ctx.client_name)
            .args(ctx.categories.iter().cloned());
        let result = self
            .run_script("extract", &spec)
            .instrument(info_span!("extract", run_id = %ctx.run_id))
            .await;
        if let Err(report) = self.check_step(ctx, RunStep::Extract, result, progress).await {
            return report;
        }

        // Step B: transform/load. On failure, best-effort cleanup first.
        progress.report(ProgressEvent::Phase {
            phase: RunPhase::Transforming,
            message: "Running transform/load...".to_string(),
        });
        let spec = self.script_config.transform.spec().arg(&ctx.client_name);
        let result = self
            .run_script("transform", &spec)
            .instrument(info_span!("transform", run_id = %ctx.run_id))
            .await;
        let transform_failed = !matches!(&result, Ok(out) if out.success());
        if transform_failed {
            self.run_cleanup(ctx, progress).await;
        }
        if let Err(report) = self
            .check_step(ctx, RunStep::Transform, result, progress)
            .await
        {
            return report;
        }

        // Per-category quality fan-out. A category failing does not stop
        // the others and does not fail the run.
        let outcomes = self
            .run_quality_fanout(ctx, progress)
            .instrument(info_span!("quality_fanout", run_id = %ctx.run_id))
            .await;

        self.finish_completed(ctx, outcomes, progress).await
    }

    async fn run_script(
        &self,
        name: &str,
        spec: &ScriptSpec,
    ) -> Result<ScriptOutput, ScriptError> {
        tracing::info!(script = name, command = %spec.command_line(), "running script");
        let result = self.scripts.run(spec).await;
        match &result {
            Ok(output) => {
                tracing::info!(script = name, status = %output.status.describe(), "script finished");
                if !output.stderr.is_empty() {
                    tracing::debug!(script = name, stderr = %output.stderr, "script stderr");
                }
            }
            Err(e) => tracing::error!(script = name, "script could not run: {}", e),
        }
        result
    }

    /// Folds a sequential step's result into the run. A failure persists
    /// the terminal failure state and yields the final report as `Err`.
    async fn check_step(
        &self,
        ctx: &RunContext,
        step: RunStep,
        result: Result<ScriptOutput, ScriptError>,
        progress: &dyn ProgressReporter,
    ) -> Result<(), RunReport> {
        let (error, output) = match result {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => (
                format!("{} script {}", step, output.failure_detail()),
                Some(output),
            ),
            Err(e) => (format!("{} script failed: {}", step, e), None),
        };
        Err(self.finish_failed(ctx, step, error, output, progress).await)
    }

    /// Compensating cleanup after a transform failure. Its own failure
    /// is logged and dropped — the transform error is what gets
    /// reported.
    async fn run_cleanup(&self, ctx: &RunContext, progress: &dyn ProgressReporter) {
        progress.report(ProgressEvent::Phase {
            phase: RunPhase::CleaningUp,
            message: "Transform failed, running cleanup...".to_string(),
        });
        let spec = self.script_config.cleanup.spec();
        match self.run_script("cleanup", &spec).await {
            Ok(output) if output.success() => {
                tracing::info!(run_id = %ctx.run_id, "cleanup completed");
            }
            Ok(output) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    "cleanup script {}",
                    output.failure_detail()
                );
            }
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id, "cleanup script failed: {}", e);
            }
        }
    }

    async fn run_quality_fanout(
        &self,
        ctx: &RunContext,
        progress: &dyn ProgressReporter,
    ) -> Vec<CategoryOutcome> {
        let total = ctx.categories.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, category) in ctx.categories.iter().enumerate() {
            progress.report(ProgressEvent::Phase {
                phase: RunPhase::QualityCheck,
                message: format!("Quality check for '{}' ({}/{})", category, index + 1, total),
            });
            outcomes.push(self.run_quality_category(ctx, category).await);
        }

        outcomes
    }

    async fn run_quality_category(&self, ctx: &RunContext, category: &str) -> CategoryOutcome {
        let input_key = self
            .store_config
            .quality_input_key(&ctx.client_name, category);
        let output_key = self
            .store_config
            .quality_output_key(&ctx.client_name, category);

        // Pre-flight: the quality script reads this object; a missing
        // input fails the category up front with a clear message. An
        // indeterminate store answer does not block the attempt.
        match self.store.head(&input_key).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(category, key = %input_key, "quality input object missing");
                return CategoryOutcome::failure(
                    category,
                    format!("input object does not exist: {}", input_key),
                );
            }
            Err(e) => {
                tracing::warn!(
                    category,
                    key = %input_key,
                    "could not verify quality input, attempting anyway: {}",
                    e
                );
            }
        }

        let spec = self
            .script_config
            .quality
            .spec()
            .arg(&input_key)
            .arg(&output_key)
            .arg(category);

        match self.run_script("quality", &spec).await {
            Ok(output) if output.success() => CategoryOutcome::success(category),
            Ok(output) => CategoryOutcome::failure(category, output.failure_detail()),
            Err(e) => CategoryOutcome::failure(category, e.to_string()),
        }
    }

    async fn finish_completed(
        &self,
        ctx: &RunContext,
        outcomes: Vec<CategoryOutcome>,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        let success_count = outcomes.iter().filter(|o| o.success).count();
        let failure_count = outcomes.len() - success_count;
        if failure_count > 0 {
            let failed: Vec<&str> = outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| o.category.as_str())
                .collect();
            tracing::warn!(
                run_id = %ctx.run_id,
                "quality check failed for categories: {}",
                failed.join(", ")
            );
        }

        if let Err(e) = sync_state_repo::finish_success(&self.db, &ctx.client_name) {
            tracing::error!(
                run_id = %ctx.run_id,
                "failed to persist completed sync state: {}",
                e
            );
        }

        let details = json!({
            "totalCategories": outcomes.len(),
            "successCount": success_count,
            "failureCount": failure_count,
            "results": outcomes,
        });
        if let Err(e) = pipeline_status_repo::record(
            &self.db,
            &ctx.client_name,
            &ctx.run_id,
            "success",
            "Pipeline completed",
            Some(&details),
        ) {
            tracing::error!(
                run_id = %ctx.run_id,
                "failed to record pipeline completion: {}",
                e
            );
        }

        progress.report(ProgressEvent::Completed {
            message: format!(
                "Run completed: {} of {} categories succeeded",
                success_count,
                outcomes.len()
            ),
        });
        tracing::info!(
            run_id = %ctx.run_id,
            success_count,
            failure_count,
            "pipeline run completed"
        );

        RunReport::completed(ctx, outcomes)
    }

    async fn finish_failed(
        &self,
        ctx: &RunContext,
        step: RunStep,
        error: String,
        output: Option<ScriptOutput>,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        tracing::error!(run_id = %ctx.run_id, step = %step, "pipeline run failed: {}", error);

        if let Err(e) = sync_state_repo::finish_failure(&self.db, &ctx.client_name, &error) {
            tracing::error!(
                run_id = %ctx.run_id,
                "failed to persist failed sync state: {}",
                e
            );
        }

        let details = match &output {
            Some(out) => json!({
                "step": step,
                "stdout": out.stdout,
                "stderr": out.stderr,
            }),
            None => json!({ "step": step }),
        };
        if let Err(e) = pipeline_status_repo::record(
            &self.db,
            &ctx.client_name,
            &ctx.run_id,
            "failed",
            &error,
            Some(&details),
        ) {
            tracing::error!(
                run_id = %ctx.run_id,
                "failed to record pipeline failure: {}",
                e
            );
        }

        progress.report(ProgressEvent::Failed {
            error: error.clone(),
        });
        RunReport::failed(ctx, step, error)
    }
}
