//! Pipeline status repository — append/query log in the `pipeline_status`
//! table, one record per (tenant, run).
//!
//! Status strings are free-form: external pipeline steps report whatever
//! they report. Comparison is case-insensitive and "error" is a synonym
//! for "failed". Reads order by `updated_at` (last write wins), not
//! insertion order.

use rusqlite::{params, Row};
use serde::Serialize;
use serde_json::Value;

use super::{now_utc, Database, DatabaseError};

/// A raw pipeline status record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusRow {
    #[serde(skip_serializing)]
    pub id: i64,
    pub client_name: String,
    pub run_id: String,
    pub status: String,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl PipelineStatusRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let details: Option<String> = row.get("details")?;
        let details = match details {
            None => None,
            Some(s) => Some(serde_json::from_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?),
        };

        Ok(Self {
            id: row.get("id")?,
            client_name: row.get("client_name")?,
            run_id: row.get("run_id")?,
            status: row.get("status")?,
            message: row.get("message")?,
            details,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Normalized view of a status record, with the terminal-state booleans
/// the polling dashboard keys off.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub record: PipelineStatusRow,
    pub pipeline_status: String,
    pub is_success: bool,
    pub is_failed: bool,
}

impl StatusSnapshot {
    pub fn from_record(record: PipelineStatusRow) -> Self {
        let normalized = normalize_status(&record.status);
        let is_success = normalized == "success";
        let is_failed = is_failed_status(&normalized);
        Self {
            record,
            pipeline_status: normalized,
            is_success,
            is_failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pipeline_status == "pending"
    }
}

/// Lowercases a free-form status string for comparison.
pub fn normalize_status(status: &str) -> String {
    status.trim().to_lowercase()
}

/// "failed" and "error" both mean the failed terminal state.
pub fn is_failed_status(normalized: &str) -> bool {
    normalized == "failed" || normalized == "error"
}

/// Records (or updates) the status for a run. Keyed on (client, run):
/// re-recording the same run bumps `updated_at` and overwrites status,
/// message, and details.
pub fn record(
    db: &Database,
    client_name: &str,
    run_id: &str,
    status: &str,
    message: &str,
    details: Option<&Value>,
) -> Result<(), DatabaseError> {
    let now = now_utc();
    let details = details.map(|d| d.to_string());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO pipeline_status
                 (client_name, run_id, status, message, details, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(client_name, run_id) DO UPDATE SET
                 status = excluded.status,
                 message = excluded.message,
                 details = excluded.details,
                 updated_at = excluded.updated_at",
            params![client_name, run_id, status, message, details, now],
        )?;
        Ok(())
    })
}

/// Most recently updated record for a tenant, regardless of run.
pub fn latest(db: &Database, client_name: &str) -> Result<Option<PipelineStatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_status WHERE client_name = ?1
             ORDER BY updated_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![client_name], PipelineStatusRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Record for a specific run of a tenant.
pub fn latest_for_run(
    db: &Database,
    client_name: &str,
    run_id: &str,
) -> Result<Option<PipelineStatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_status WHERE client_name = ?1 AND run_id = ?2
             ORDER BY updated_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![client_name, run_id], PipelineStatusRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Flips a pending record to success. The condition is part of the
/// statement, so a record that already reached a terminal state is never
/// moved back — status transitions stay monotonic per run.
///
/// Returns `true` when the flip happened.
pub fn mark_pending_success(
    db: &Database,
    id: i64,
    message: &str,
) -> Result<bool, DatabaseError> {
    let now = now_utc();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE pipeline_status SET status = 'success', message = ?2, updated_at = ?3
             WHERE id = ?1 AND LOWER(TRIM(status)) = 'pending'",
            params![id, message, now],
        )?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_record_and_fetch_for_run() {
        let db = test_db();
        record(&db, "acme", "run-1", "pending", "Accepted", None).unwrap();

        let row = latest_for_run(&db, "acme", "run-1").unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.message.as_deref(), Some("Accepted"));
        assert!(row.details.is_none());
    }

    #[test]
    fn test_record_same_run_updates_in_place() {
        let db = test_db();
        record(&db, "acme", "run-1", "pending", "Accepted", None).unwrap();
        record(
            &db,
            "acme",
            "run-1",
            "Success",
            "Done",
            Some(&json!({"successCount": 2})),
        )
        .unwrap();

        let row = latest_for_run(&db, "acme", "run-1").unwrap().unwrap();
        assert_eq!(row.status, "Success");
        assert_eq!(row.details.unwrap()["successCount"], 2);

        // Still one record for the run, not an append per write.
        db.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM pipeline_status WHERE run_id = 'run-1'",
                [],
                |r| r.get(0),
            )?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_latest_orders_by_update_not_insertion() {
        let db = test_db();
        record(&db, "acme", "run-1", "pending", "first", None).unwrap();
        record(&db, "acme", "run-2", "pending", "second", None).unwrap();
        // Touch run-1 again: it becomes the latest despite earlier insertion.
        record(&db, "acme", "run-1", "success", "flipped", None).unwrap();

        let row = latest(&db, "acme").unwrap().unwrap();
        assert_eq!(row.run_id, "run-1");
        assert_eq!(row.status, "success");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let db = test_db();
        record(&db, "Acme", "Run-1", "pending", "", None).unwrap();

        assert!(latest(&db, "ACME").unwrap().is_some());
        assert!(latest_for_run(&db, "acme", "run-1").unwrap().is_some());
    }

    #[test]
    fn test_snapshot_normalization() {
        let db = test_db();
        record(&db, "acme", "run-1", "ERROR", "boom", None).unwrap();

        let row = latest(&db, "acme").unwrap().unwrap();
        let snap = StatusSnapshot::from_record(row);
        assert_eq!(snap.pipeline_status, "error");
        assert!(snap.is_failed);
        assert!(!snap.is_success);
        assert!(!snap.is_pending());
    }

    #[test]
    fn test_mark_pending_success_flips_once() {
        let db = test_db();
        record(&db, "acme", "run-1", "Pending", "waiting", None).unwrap();
        let row = latest_for_run(&db, "acme", "run-1").unwrap().unwrap();

        assert!(mark_pending_success(&db, row.id, "Output objects observed").unwrap());

        let row = latest_for_run(&db, "acme", "run-1").unwrap().unwrap();
        assert_eq!(row.status, "success");

        // Already terminal: a second flip is a no-op.
        assert!(!mark_pending_success(&db, row.id, "again").unwrap());
    }

    #[test]
    fn test_mark_pending_success_never_reverts_failed() {
        let db = test_db();
        record(&db, "acme", "run-1", "failed", "script exited 1", None).unwrap();
        let row = latest_for_run(&db, "acme", "run-1").unwrap().unwrap();

        assert!(!mark_pending_success(&db, row.id, "nope").unwrap());
        let row = latest_for_run(&db, "acme", "run-1").unwrap().unwrap();
        assert_eq!(row.status, "failed");
    }

    #[test]
    fn test_status_synonyms() {
        assert!(is_failed_status(&normalize_status("FAILED")));
        assert!(is_failed_status(&normalize_status("Error")));
        assert!(!is_failed_status(&normalize_status("success")));
        assert!(!is_failed_status(&normalize_status("pending")));
    }
}
