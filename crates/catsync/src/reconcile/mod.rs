//! Pending-status reconciliation: poll the store → flip → report.
//!
//! Some pipeline stages signal completion only by dropping files into
//! the tenant's output prefix. When a status poll finds a "pending"
//! record, the reconciler checks whether any object appeared under that
//! prefix since the record was created, and flips the record to success
//! if so. Terminal records are never touched — transitions stay
//! monotonic per run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{ReconcileConfig, StoreConfig};
use crate::db::pipeline_status_repo::{self, PipelineStatusRow, StatusSnapshot};
use crate::db::{Database, DatabaseError};
use crate::error::StoreError;
use crate::store::{has_objects_newer_than, ObjectStore};

/// Errors from a reconciliation cycle.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a reconciliation cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// Snapshot of the record after reconciliation; `None` when the
    /// tenant has no status record at all.
    pub snapshot: Option<StatusSnapshot>,
    /// Whether this cycle flipped a pending record to success.
    pub flipped: bool,
    /// Whether the cycle was skipped because another was in progress.
    pub skipped: bool,
}

/// Reconciles pending pipeline-status records against the object store.
///
/// Uses a mutex to prevent overlapping cycles; transient store errors
/// are retried with exponential backoff.
pub struct Reconciler {
    db: Database,
    store: Arc<dyn ObjectStore>,
    store_config: StoreConfig,
    settings: ReconcileConfig,
    /// Prevents concurrent reconcile calls from double-polling.
    reconcile_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        store_config: StoreConfig,
        settings: ReconcileConfig,
    ) -> Self {
        Self {
            db,
            store,
            store_config,
            settings,
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Reconciles a tenant's latest record, or the record of a specific
    /// run when `run_id` is given.
    ///
    /// Skips (without polling) when another reconcile is already in
    /// progress — the caller gets the current snapshot unchanged.
    pub async fn reconcile(
        &self,
        client_name: &str,
        run_id: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let _guard = match self.reconcile_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("Reconcile skipped: another reconcile is already in progress");
                let snapshot = self
                    .load(client_name, run_id)?
                    .map(StatusSnapshot::from_record);
                return Ok(ReconcileOutcome {
                    snapshot,
                    flipped: false,
                    skipped: true,
                });
            }
        };

        let row = match self.load(client_name, run_id)? {
            Some(row) => row,
            None => {
                return Ok(ReconcileOutcome {
                    snapshot: None,
                    flipped: false,
                    skipped: false,
                })
            }
        };

        let snapshot = StatusSnapshot::from_record(row.clone());
        if !snapshot.is_pending() {
            return Ok(ReconcileOutcome {
                snapshot: Some(snapshot),
                flipped: false,
                skipped: false,
            });
        }

        let since = parse_created_at(&row)?;
        let prefix = self.store_config.client_output_prefix(client_name);
        let found = self.poll_with_retries(&prefix, since).await?;

        let mut flipped = false;
        if found {
            flipped = pipeline_status_repo::mark_pending_success(
                &self.db,
                row.id,
                "Output objects observed in store",
            )?;
            if flipped {
                log::info!(
                    "Reconciled run '{}' for client '{}': pending -> success",
                    row.run_id,
                    client_name
                );
            }
        }

        // Reload so the caller sees what actually landed.
        let snapshot = self
            .load(client_name, run_id)?
            .map(StatusSnapshot::from_record);
        Ok(ReconcileOutcome {
            snapshot,
            flipped,
            skipped: false,
        })
    }

    fn load(
        &self,
        client_name: &str,
        run_id: Option<&str>,
    ) -> Result<Option<PipelineStatusRow>, DatabaseError> {
        match run_id {
            Some(run_id) => pipeline_status_repo::latest_for_run(&self.db, client_name, run_id),
            None => pipeline_status_repo::latest(&self.db, client_name),
        }
    }

    /// Polls the store, retrying transient errors with exponential
    /// backoff (base delay doubling per attempt).
    async fn poll_with_retries(
        &self,
        prefix: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay_ms = self.settings.retry_base_delay_ms * (1 << (attempt - 1));
                log::info!(
                    "Retrying store poll (attempt {}/{}) after {}ms...",
                    attempt + 1,
                    self.settings.max_retries + 1,
                    delay_ms
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }

            match has_objects_newer_than(self.store.as_ref(), prefix, since).await {
                Ok(found) => return Ok(found),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    log::warn!("Store poll failed with retryable error: {}", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::Unavailable("store poll failed after all retries".to_string())))
    }
}

fn parse_created_at(row: &PipelineStatusRow) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(&row.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidColumn {
            column: "created_at".to_string(),
            reason: e.to_string(),
        })
}
