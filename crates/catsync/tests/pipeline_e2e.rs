//! End-to-end pipeline tests with real shell scripts and the
//! directory-backed object store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use catsync::config::{ReconcileConfig, ScriptConfig, ScriptsConfig, StoreConfig};
use catsync::db::sync_state_repo::{self, SyncStatus};
use catsync::db::{pipeline_status_repo, Database};
use catsync::{
    FsObjectStore, ObjectStore, Reconciler, RunCoordinator, RunProgressBroadcaster, ScriptRunner,
    SyncPipeline,
};

struct Harness {
    _dir: tempfile::TempDir,
    store_root: PathBuf,
    db: Database,
    store: Arc<FsObjectStore>,
    coordinator: RunCoordinator,
    reconciler: Reconciler,
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

fn script_config(program: PathBuf, working_dir: &Path, store_root: &Path) -> ScriptConfig {
    let mut env = BTreeMap::new();
    env.insert(
        "STORE_ROOT".to_string(),
        store_root.display().to_string(),
    );
    ScriptConfig {
        program,
        args: Vec::new(),
        working_dir: working_dir.to_path_buf(),
        timeout_secs: 30,
        env,
    }
}

/// Builds a full stack in a tempdir. Script bodies are provided per
/// test; `$STORE_ROOT` points at the object store root.
fn harness(extract: &str, transform: &str, cleanup: &str, quality: &str) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let scripts_dir = dir.path().join("scripts");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    let store_root = dir.path().join("objects");

    let extract = write_script(&scripts_dir, "extract.sh", extract);
    let transform = write_script(&scripts_dir, "transform.sh", transform);
    let cleanup = write_script(&scripts_dir, "clearfiles.sh", cleanup);
    let quality = write_script(&scripts_dir, "quality.sh", quality);

    let scripts = ScriptsConfig {
        extract: script_config(extract, &scripts_dir, &store_root),
        transform: script_config(transform, &scripts_dir, &store_root),
        cleanup: script_config(cleanup, &scripts_dir, &store_root),
        quality: script_config(quality, &scripts_dir, &store_root),
    };
    let store_config = StoreConfig {
        root: store_root.clone(),
        quality_input_prefix: "quality-input".to_string(),
        output_prefix: "pipeline-output".to_string(),
    };

    let db = Database::open_in_memory().unwrap();
    let store = Arc::new(FsObjectStore::new(&store_root));
    let broadcaster = Arc::new(RunProgressBroadcaster::default());

    let pipeline = Arc::new(SyncPipeline::new(
        db.clone(),
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::new(ScriptRunner::new()),
        scripts,
        store_config.clone(),
    ));
    let coordinator = RunCoordinator::new(db.clone(), pipeline, Arc::clone(&broadcaster));
    let reconciler = Reconciler::new(
        db.clone(),
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        store_config,
        ReconcileConfig {
            max_retries: 1,
            retry_base_delay_ms: 1,
        },
    );

    Harness {
        _dir: dir,
        store_root,
        db,
        store,
        coordinator,
        reconciler,
    }
}

async fn seed_quality_input(h: &Harness, client: &str, category: &str) {
    h.store
        .put(
            &format!("quality-input/{}/{}.jsonl", client, category),
            b"{\"sku\": 1}\n",
        )
        .await
        .unwrap();
}

async fn wait_for_terminal(db: &Database, client: &str) -> SyncStatus {
    for _ in 0..500 {
        if let Some(row) = sync_state_repo::get(db, client).unwrap() {
            match row.status {
                SyncStatus::Completed | SyncStatus::Failed => return row.status,
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run for '{}' never reached a terminal state", client);
}

#[tokio::test]
async fn full_run_completes_and_writes_quality_outputs() {
    let h = harness(
        "echo extracting $1",
        "echo transforming $1",
        "exit 0",
        // quality.sh <input-key> <output-key> <category>
        "mkdir -p \"$STORE_ROOT/$(dirname \"$2\")\" && cp \"$STORE_ROOT/$1\" \"$STORE_ROOT/$2\"",
    );
    seed_quality_input(&h, "acme", "shoes").await;
    seed_quality_input(&h, "acme", "bags").await;

    let started = h
        .coordinator
        .start_run("acme", vec!["shoes".to_string(), "bags".to_string()])
        .unwrap();

    assert_eq!(wait_for_terminal(&h.db, "acme").await, SyncStatus::Completed);

    let state = sync_state_repo::get(&h.db, "acme").unwrap().unwrap();
    assert_eq!(state.current_step, 1);
    assert!(!state.is_running_scripts);
    assert!(state.last_sync_completed_at.is_some());
    assert!(state.last_error.is_none());

    // The quality script copied each input to the output prefix.
    assert!(h
        .store
        .head("pipeline-output/acme/shoes.jsonl")
        .await
        .unwrap());
    assert!(h
        .store
        .head("pipeline-output/acme/bags.jsonl")
        .await
        .unwrap());

    let row = pipeline_status_repo::latest_for_run(&h.db, "acme", &started.run_id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "success");
    let details = row.details.unwrap();
    assert_eq!(details["totalCategories"], 2);
    assert_eq!(details["failureCount"], 0);
}

#[tokio::test]
async fn transform_failure_runs_cleanup_and_records_failure() {
    let h = harness(
        "echo ok",
        "echo 'loader blew up' >&2; exit 4",
        // Cleanup leaves a marker so the test can see it ran.
        "touch \"$STORE_ROOT/cleanup-ran\"",
        "exit 0",
    );
    seed_quality_input(&h, "acme", "shoes").await;

    let started = h
        .coordinator
        .start_run("acme", vec!["shoes".to_string()])
        .unwrap();

    assert_eq!(wait_for_terminal(&h.db, "acme").await, SyncStatus::Failed);

    let state = sync_state_repo::get(&h.db, "acme").unwrap().unwrap();
    assert_eq!(state.current_step, 1);
    assert!(!state.is_running_scripts);
    let last_error = state.last_error.unwrap();
    assert!(last_error.contains("transform"), "got: {}", last_error);
    assert!(last_error.contains("loader blew up"), "got: {}", last_error);

    // Cleanup ran after the transform failure.
    assert!(h.store_root.join("cleanup-ran").exists());

    let row = pipeline_status_repo::latest_for_run(&h.db, "acme", &started.run_id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.details.as_ref().unwrap()["step"], "transform");
    assert_eq!(
        row.details.as_ref().unwrap()["stderr"],
        "loader blew up"
    );
}

#[tokio::test]
async fn partial_quality_failure_still_completes_with_results() {
    let h = harness(
        "exit 0",
        "exit 0",
        "exit 0",
        // Fail only the bags category.
        "case \"$3\" in bags) echo 'rate limited' >&2; exit 9;; *) exit 0;; esac",
    );
    for category in ["shoes", "bags", "hats"] {
        seed_quality_input(&h, "acme", category).await;
    }

    let started = h
        .coordinator
        .start_run(
            "acme",
            vec!["shoes".to_string(), "bags".to_string(), "hats".to_string()],
        )
        .unwrap();

    // One failing category does not fail the run.
    assert_eq!(wait_for_terminal(&h.db, "acme").await, SyncStatus::Completed);

    let row = pipeline_status_repo::latest_for_run(&h.db, "acme", &started.run_id)
        .unwrap()
        .unwrap();
    let details = row.details.unwrap();
    assert_eq!(details["totalCategories"], 3);
    assert_eq!(details["successCount"], 2);
    assert_eq!(details["failureCount"], 1);

    let results = details["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let bags = results
        .iter()
        .find(|r| r["category"] == "bags")
        .unwrap();
    assert_eq!(bags["success"], false);
    assert!(bags["error"].as_str().unwrap().contains("rate limited"));
}

#[tokio::test]
async fn reconcile_flips_pending_run_when_output_appears() {
    let h = harness("exit 0", "exit 0", "exit 0", "exit 0");

    // A run whose completion signal is "a file appeared": only a
    // pending record exists.
    pipeline_status_repo::record(
        &h.db,
        "acme",
        "external-run",
        "pending",
        "waiting on external pipeline",
        None,
    )
    .unwrap();

    // Nothing in the store yet: the record stays pending.
    let outcome = h.reconciler.reconcile("acme", Some("external-run")).await.unwrap();
    assert!(!outcome.flipped);
    assert!(outcome.snapshot.unwrap().is_pending());

    // The external pipeline drops its output after the record was
    // created; the next poll flips the record.
    h.store
        .put("pipeline-output/acme/shoes.jsonl", b"{}")
        .await
        .unwrap();

    let outcome = h.reconciler.reconcile("acme", Some("external-run")).await.unwrap();
    assert!(outcome.flipped);
    let snapshot = outcome.snapshot.unwrap();
    assert!(snapshot.is_success);
    assert!(!snapshot.is_failed);
}

#[tokio::test]
async fn busy_guard_rejects_overlapping_starts() {
    let h = harness("sleep 2", "exit 0", "exit 0", "exit 0");
    seed_quality_input(&h, "acme", "shoes").await;

    h.coordinator
        .start_run("acme", vec!["shoes".to_string()])
        .unwrap();

    // While extract sleeps, a second start must be rejected.
    let err = h
        .coordinator
        .start_run("acme", vec!["shoes".to_string()])
        .unwrap_err();
    assert!(matches!(
        err,
        catsync::pipeline::PipelineError::AlreadyRunning(_)
    ));

    assert_eq!(wait_for_terminal(&h.db, "acme").await, SyncStatus::Completed);
}
