//! Sync state repository — one row per tenant in the `sync_states` table.
//!
//! Writes are partial-merge by construction: an update statement only
//! touches the columns present in the patch, so concurrent step updates
//! for the same tenant cannot clobber each other's fields. The
//! `is_running_scripts` guard is flipped with a single conditional
//! statement (compare-and-set), never read-then-write.

use rusqlite::{params, Row};
use serde::Serialize;
use serde_json::Value;

use super::{now_utc, Database, DatabaseError};

/// Lifecycle status of a tenant's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Parses a stored status string. Accepts the legacy `in_progress`
    /// spelling for running rows written by earlier deployments.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "running" | "in_progress" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant's sync state row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateRow {
    pub client_name: String,
    pub current_step: u32,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_file: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_mappings: Option<Value>,
    pub selected_categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_status: Option<String>,
    pub is_running_scripts: bool,
    pub scripts_started_at: Option<String>,
    pub last_sync_date: Option<String>,
    pub last_sync_completed_at: Option<String>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl SyncStateRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_raw: String = row.get("status")?;
        let status = SyncStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown sync status '{}'", status_raw).into(),
            )
        })?;

        Ok(Self {
            client_name: row.get("client_name")?,
            current_step: row.get("current_step")?,
            status,
            csv_file: json_column(row.get("csv_file")?)?,
            field_mappings: json_column(row.get("field_mappings")?)?,
            selected_categories: categories_column(row.get("selected_categories")?)?,
            pipeline_status: row.get("pipeline_status")?,
            is_running_scripts: row.get("is_running_scripts")?,
            scripts_started_at: row.get("scripts_started_at")?,
            last_sync_date: row.get("last_sync_date")?,
            last_sync_completed_at: row.get("last_sync_completed_at")?,
            last_error: row.get("last_error")?,
            metadata: json_column(row.get("metadata")?)?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn json_column(raw: Option<String>) -> Result<Option<Value>, rusqlite::Error> {
    match raw {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }),
    }
}

fn categories_column(raw: Option<String>) -> Result<Vec<String>, rusqlite::Error> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) => serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }),
    }
}

fn categories_json(categories: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(categories).map_err(|e| DatabaseError::InvalidColumn {
        column: "selected_categories".to_string(),
        reason: e.to_string(),
    })
}

/// Fields to merge into a tenant's sync state. Absent fields are left
/// untouched; clearing of step payloads happens only through `reset` and
/// the terminal writes.
#[derive(Debug, Default, Clone)]
pub struct SyncStatePatch {
    pub current_step: Option<u32>,
    pub status: Option<SyncStatus>,
    pub csv_file: Option<Value>,
    pub field_mappings: Option<Value>,
    pub selected_categories: Option<Vec<String>>,
    pub pipeline_status: Option<String>,
    pub is_running_scripts: Option<bool>,
    pub scripts_started_at: Option<String>,
    pub metadata: Option<Value>,
}

impl SyncStatePatch {
    pub fn is_empty(&self) -> bool {
        self.current_step.is_none()
            && self.status.is_none()
            && self.csv_file.is_none()
            && self.field_mappings.is_none()
            && self.selected_categories.is_none()
            && self.pipeline_status.is_none()
            && self.is_running_scripts.is_none()
            && self.scripts_started_at.is_none()
            && self.metadata.is_none()
    }
}

/// Finds the sync state for a tenant. Client lookup is case-insensitive.
pub fn get(db: &Database, client_name: &str) -> Result<Option<SyncStateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM sync_states WHERE client_name = ?1")?;
        let mut rows = stmt.query_map(params![client_name], SyncStateRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Upserts a tenant's sync state, merging only the fields present in the
/// patch. Returns the resulting row.
pub fn upsert(
    db: &Database,
    client_name: &str,
    patch: &SyncStatePatch,
) -> Result<SyncStateRow, DatabaseError> {
    let now = now_utc();
    let categories = match &patch.selected_categories {
        Some(c) => Some(categories_json(c)?),
        None => None,
    };

    db.with_conn(|conn| {
        ensure_row(conn, client_name, &now)?;

        let mut assignments = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        values.push(Box::new(client_name.to_string()));

        if let Some(step) = patch.current_step {
            assignments.push(format!("current_step = ?{}", values.len() + 1));
            values.push(Box::new(step));
        }
        if let Some(status) = patch.status {
            assignments.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref csv_file) = patch.csv_file {
            assignments.push(format!("csv_file = ?{}", values.len() + 1));
            values.push(Box::new(csv_file.to_string()));
        }
        if let Some(ref mappings) = patch.field_mappings {
            assignments.push(format!("field_mappings = ?{}", values.len() + 1));
            values.push(Box::new(mappings.to_string()));
        }
        if let Some(ref cats) = categories {
            assignments.push(format!("selected_categories = ?{}", values.len() + 1));
            values.push(Box::new(cats.clone()));
        }
        if let Some(ref pipeline_status) = patch.pipeline_status {
            assignments.push(format!("pipeline_status = ?{}", values.len() + 1));
            values.push(Box::new(pipeline_status.clone()));
        }
        if let Some(running) = patch.is_running_scripts {
            assignments.push(format!("is_running_scripts = ?{}", values.len() + 1));
            values.push(Box::new(running));
        }
        if let Some(ref started) = patch.scripts_started_at {
            assignments.push(format!("scripts_started_at = ?{}", values.len() + 1));
            values.push(Box::new(started.clone()));
        }
        if let Some(ref metadata) = patch.metadata {
            assignments.push(format!("metadata = ?{}", values.len() + 1));
            values.push(Box::new(metadata.to_string()));
        }

        if !assignments.is_empty() {
            assignments.push(format!("updated_at = ?{}", values.len() + 1));
            values.push(Box::new(now.clone()));

            let sql = format!(
                "UPDATE sync_states SET {} WHERE client_name = ?1",
                assignments.join(", ")
            );
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();
            conn.execute(&sql, params_ref.as_slice())?;
        }

        fetch_row(conn, client_name)
    })
}

/// Atomically claims the run guard for a tenant.
///
/// A single conditional upsert sets `is_running_scripts = 1` only when it
/// is currently 0 (or the row does not exist yet), together with the
/// running status and the selected categories. Returns `false` when a run
/// is already in flight for this tenant.
pub fn try_begin_run(
    db: &Database,
    client_name: &str,
    categories: &[String],
) -> Result<bool, DatabaseError> {
    let now = now_utc();
    let categories = categories_json(categories)?;

    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO sync_states
                 (client_name, current_step, status, selected_categories,
                  is_running_scripts, scripts_started_at, created_at, updated_at)
             VALUES (?1, 3, 'running', ?2, 1, ?3, ?3, ?3)
             ON CONFLICT(client_name) DO UPDATE SET
                 current_step = 3,
                 status = 'running',
                 selected_categories = excluded.selected_categories,
                 is_running_scripts = 1,
                 scripts_started_at = excluded.scripts_started_at,
                 last_error = NULL,
                 updated_at = excluded.updated_at
             WHERE sync_states.is_running_scripts = 0",
            params![client_name, categories, now],
        )?;
        Ok(changed > 0)
    })
}

/// Terminal write for a failed run: failed status, wizard back to step 1,
/// run guard cleared, intermediate state dropped, failure recorded.
pub fn finish_failure(
    db: &Database,
    client_name: &str,
    error: &str,
) -> Result<(), DatabaseError> {
    let now = now_utc();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_states SET
                 status = 'failed',
                 current_step = 1,
                 is_running_scripts = 0,
                 pipeline_status = NULL,
                 selected_categories = '[]',
                 last_error = ?2,
                 updated_at = ?3
             WHERE client_name = ?1",
            params![client_name, error, now],
        )?;
        Ok(())
    })
}

/// Terminal write for a completed run: completed status, wizard back to
/// step 1, completion timestamps stamped, intermediate state and the run
/// guard cleared.
pub fn finish_success(db: &Database, client_name: &str) -> Result<(), DatabaseError> {
    let now = now_utc();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_states SET
                 status = 'completed',
                 current_step = 1,
                 last_sync_date = ?2,
                 last_sync_completed_at = ?2,
                 pipeline_status = NULL,
                 selected_categories = '[]',
                 is_running_scripts = 0,
                 last_error = NULL,
                 updated_at = ?2
             WHERE client_name = ?1",
            params![client_name, now],
        )?;
        Ok(())
    })
}

/// Resets a tenant to step 1 / pending and clears the step payloads.
/// History of prior successful runs (`last_sync_date`,
/// `last_sync_completed_at`) is preserved.
pub fn reset(db: &Database, client_name: &str) -> Result<SyncStateRow, DatabaseError> {
    let now = now_utc();
    db.with_conn(|conn| {
        ensure_row(conn, client_name, &now)?;
        conn.execute(
            "UPDATE sync_states SET
                 current_step = 1,
                 status = 'pending',
                 csv_file = NULL,
                 field_mappings = NULL,
                 pipeline_status = NULL,
                 selected_categories = '[]',
                 metadata = NULL,
                 last_error = NULL,
                 updated_at = ?2
             WHERE client_name = ?1",
            params![client_name, now],
        )?;
        fetch_row(conn, client_name)
    })
}

fn ensure_row(
    conn: &rusqlite::Connection,
    client_name: &str,
    now: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO sync_states (client_name, created_at, updated_at)
         VALUES (?1, ?2, ?2)",
        params![client_name, now],
    )?;
    Ok(())
}

fn fetch_row(
    conn: &rusqlite::Connection,
    client_name: &str,
) -> Result<SyncStateRow, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM sync_states WHERE client_name = ?1")?;
    let mut rows = stmt.query_map(params![client_name], SyncStateRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(row),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Err(DatabaseError::InvalidColumn {
            column: "client_name".to_string(),
            reason: format!("row for '{}' vanished after upsert", client_name),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = test_db();
        assert!(get(&db, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_upsert_creates_default_row() {
        let db = test_db();
        let row = upsert(&db, "acme", &SyncStatePatch::default()).unwrap();

        assert_eq!(row.client_name, "acme");
        assert_eq!(row.current_step, 1);
        assert_eq!(row.status, SyncStatus::Pending);
        assert!(!row.is_running_scripts);
        assert!(row.selected_categories.is_empty());
    }

    #[test]
    fn test_upsert_merges_without_clobbering() {
        let db = test_db();

        // Step 1: record the uploaded file.
        upsert(
            &db,
            "acme",
            &SyncStatePatch {
                current_step: Some(2),
                csv_file: Some(json!({"fileName": "catalog.csv", "fileSize": 1024})),
                ..Default::default()
            },
        )
        .unwrap();

        // Step 2: record mappings only — the csv file must survive.
        let row = upsert(
            &db,
            "acme",
            &SyncStatePatch {
                field_mappings: Some(json!({"sku": "product_id"})),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(row.current_step, 2);
        assert_eq!(row.csv_file.unwrap()["fileName"], "catalog.csv");
        assert_eq!(row.field_mappings.unwrap()["sku"], "product_id");
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let db = test_db();
        upsert(&db, "Acme", &SyncStatePatch::default()).unwrap();

        assert!(get(&db, "acme").unwrap().is_some());
        assert!(get(&db, "ACME").unwrap().is_some());
    }

    #[test]
    fn test_try_begin_run_claims_guard_once() {
        let db = test_db();
        let cats = vec!["shoes".to_string(), "bags".to_string()];

        assert!(try_begin_run(&db, "acme", &cats).unwrap());
        // Second claim while the first run is in flight must fail.
        assert!(!try_begin_run(&db, "acme", &cats).unwrap());

        let row = get(&db, "acme").unwrap().unwrap();
        assert!(row.is_running_scripts);
        assert_eq!(row.status, SyncStatus::Running);
        assert_eq!(row.selected_categories, cats);
        assert!(row.scripts_started_at.is_some());
    }

    #[test]
    fn test_guard_reopens_after_failure() {
        let db = test_db();
        let cats = vec!["shoes".to_string()];

        assert!(try_begin_run(&db, "acme", &cats).unwrap());
        finish_failure(&db, "acme", "extract script exited with code 2").unwrap();

        let row = get(&db, "acme").unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Failed);
        assert_eq!(row.current_step, 1);
        assert!(!row.is_running_scripts);
        assert!(row.selected_categories.is_empty());
        assert_eq!(
            row.last_error.as_deref(),
            Some("extract script exited with code 2")
        );

        // A new run may start now.
        assert!(try_begin_run(&db, "acme", &cats).unwrap());
        // Starting a run clears the stale failure message.
        let row = get(&db, "acme").unwrap().unwrap();
        assert!(row.last_error.is_none());
    }

    #[test]
    fn test_finish_success_stamps_history_and_clears_state() {
        let db = test_db();
        assert!(try_begin_run(&db, "acme", &["shoes".to_string()]).unwrap());
        finish_success(&db, "acme").unwrap();

        let row = get(&db, "acme").unwrap().unwrap();
        assert_eq!(row.status, SyncStatus::Completed);
        assert_eq!(row.current_step, 1);
        assert!(!row.is_running_scripts);
        assert!(row.selected_categories.is_empty());
        assert!(row.last_sync_date.is_some());
        assert!(row.last_sync_completed_at.is_some());
        assert!(row.last_error.is_none());
    }

    #[test]
    fn test_reset_preserves_sync_history() {
        let db = test_db();
        assert!(try_begin_run(&db, "acme", &["shoes".to_string()]).unwrap());
        finish_success(&db, "acme").unwrap();
        let completed = get(&db, "acme").unwrap().unwrap();

        let row = reset(&db, "acme").unwrap();
        assert_eq!(row.current_step, 1);
        assert_eq!(row.status, SyncStatus::Pending);
        assert!(row.csv_file.is_none());
        assert!(row.selected_categories.is_empty());
        // History survives the reset.
        assert_eq!(row.last_sync_date, completed.last_sync_date);
        assert_eq!(row.last_sync_completed_at, completed.last_sync_completed_at);
    }

    #[test]
    fn test_reset_on_missing_tenant_yields_default_row() {
        let db = test_db();
        let fresh = reset(&db, "newcomer").unwrap();

        assert_eq!(fresh.current_step, 1);
        assert_eq!(fresh.status, SyncStatus::Pending);
        assert!(fresh.csv_file.is_none());
        assert!(fresh.last_sync_date.is_none());
        assert!(!fresh.is_running_scripts);
    }

    #[test]
    fn test_status_parse_accepts_legacy_spelling() {
        assert_eq!(SyncStatus::parse("in_progress"), Some(SyncStatus::Running));
        assert_eq!(SyncStatus::parse("running"), Some(SyncStatus::Running));
        assert_eq!(SyncStatus::parse("bogus"), None);
    }
}
