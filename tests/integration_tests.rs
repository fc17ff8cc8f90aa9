//! Integration tests for Shipwright
//!
//! These drive the binary end to end against a throwaway project directory.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a shipwright Command rooted in `dir`
fn shipwright(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("shipwright");
    cmd.current_dir(dir.path())
        .env_remove("SHIPWRIGHT_WORKER_ID")
        .env_remove("SHIPWRIGHT_PLATFORM")
        .env_remove("RUST_LOG");
    cmd
}

/// Helper to create an initialized project
fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    shipwright(&dir).arg("init").assert().success();
    dir
}

fn create_job(dir: &TempDir, description: &str) {
    shipwright(dir)
        .args(["job", "create", description])
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        shipwright(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("worker"))
            .stdout(predicate::str::contains("artifact"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        shipwright(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = TempDir::new().unwrap();
        shipwright(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized shipwright project"));

        assert!(dir.path().join(".shipwright/shipwright.toml").exists());
        assert!(dir.path().join(".shipwright/shipwright.db").exists());
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = init_project();
        let config = dir.path().join(".shipwright/shipwright.toml");
        fs::write(&config, "[worker]\nid = \"mine\"\n").unwrap();

        shipwright(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("kept existing"));
        assert!(fs::read_to_string(&config).unwrap().contains("mine"));

        shipwright(&dir).args(["init", "--force"]).assert().success();
        assert!(!fs::read_to_string(&config).unwrap().contains("mine"));
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = init_project();
        fs::write(
            dir.path().join(".shipwright/shipwright.toml"),
            "[pipeline]\nplatform = \"bitbucket\"\n",
        )
        .unwrap();
        shipwright(&dir)
            .args(["job", "list"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Job Backlog
// =============================================================================

mod jobs {
    use super::*;

    #[test]
    fn test_create_and_list() {
        let dir = init_project();
        shipwright(&dir)
            .args(["job", "create", "Add search\nUse the existing index"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created job #1 (main, pending)"));

        shipwright(&dir)
            .args(["job", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Add search"))
            .stdout(predicate::str::contains("pending"));
    }

    #[test]
    fn test_list_filters_by_status() {
        let dir = init_project();
        create_job(&dir, "Add search");
        shipwright(&dir)
            .args(["job", "create", "Tweak ranking", "--patch"])
            .assert()
            .success()
            .stdout(predicate::str::contains("patch_pending"));

        shipwright(&dir)
            .args(["job", "list", "--status", "patch_pending"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Tweak ranking"))
            .stdout(predicate::str::contains("Add search").not());

        shipwright(&dir)
            .args(["job", "list", "--status", "bogus"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid job status"));
    }

    #[test]
    fn test_blank_description_is_rejected() {
        let dir = init_project();
        shipwright(&dir)
            .args(["job", "create", "   "])
            .assert()
            .failure()
            .stderr(predicate::str::contains("must not be empty"));
    }

    #[test]
    fn test_show_unknown_job() {
        let dir = init_project();
        shipwright(&dir)
            .args(["job", "show", "42"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Job 42 not found"));
    }

    #[test]
    fn test_requeue_pending_job_is_invalid() {
        let dir = init_project();
        create_job(&dir, "Add search");
        shipwright(&dir)
            .args(["job", "requeue-patch", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot move from pending"));
    }

    #[test]
    fn test_reclaim_with_nothing_stale() {
        let dir = init_project();
        create_job(&dir, "Add search");
        shipwright(&dir)
            .args(["job", "reclaim", "--older-than", "60"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No stale jobs"));
    }
}

// =============================================================================
// Workflows and Steps
// =============================================================================

mod workflows {
    use super::*;

    #[test]
    fn test_workflow_list() {
        let dir = init_project();
        shipwright(&dir)
            .args(["workflow", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("codereview"))
            .stdout(predicate::str::contains("main"))
            .stdout(predicate::str::contains("patch_plan -> implement"))
            .stdout(predicate::str::contains("create_pr").not());
    }

    #[test]
    fn test_workflow_list_with_platform_includes_create_pr() {
        let dir = init_project();
        fs::write(
            dir.path().join(".shipwright/shipwright.toml"),
            "[pipeline]\nplatform = \"github\"\n",
        )
        .unwrap();
        shipwright(&dir)
            .args(["workflow", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("prepare_pr -> create_pr"));
    }

    #[test]
    fn test_step_list() {
        let dir = init_project();
        shipwright(&dir)
            .args(["step", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("address_review"))
            .stdout(predicate::str::contains("plan | patch_plan"));
    }

    #[test]
    fn test_step_deps_in_order() {
        let dir = init_project();
        shipwright(&dir)
            .args(["step", "deps", "plan"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1. fetch_issue\n2. classify"));
    }

    #[test]
    fn test_step_deps_unknown_step() {
        let dir = init_project();
        shipwright(&dir)
            .args(["step", "deps", "deploy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("deploy"));
    }

    #[test]
    fn test_step_validate() {
        let dir = init_project();
        shipwright(&dir)
            .args(["step", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("valid"));
    }

    #[test]
    fn test_step_run_requires_run_id_for_dependent_step() {
        let dir = init_project();
        create_job(&dir, "Add search");
        shipwright(&dir)
            .args(["step", "run", "plan", "--job-id", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--run-id"));
    }

    #[test]
    fn test_step_run_fetch_issue_then_inspect_artifacts() {
        let dir = init_project();
        create_job(&dir, "Add search");

        let output = shipwright(&dir)
            .args(["step", "run", "fetch_issue", "--job-id", "1", "--run-id", "feedc0de"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Step 'fetch_issue' succeeded (run feedc0de)"))
            .get_output()
            .stdout
            .clone();
        assert!(String::from_utf8(output).unwrap().contains("\"title\""));

        shipwright(&dir)
            .args(["artifact", "list", "feedc0de"])
            .assert()
            .success()
            .stdout(predicate::str::contains("issue"));

        shipwright(&dir)
            .args(["artifact", "show", "feedc0de", "issue"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Add search"))
            .stdout(predicate::str::contains("checksum"));

        shipwright(&dir)
            .args(["artifact", "runs"])
            .assert()
            .success()
            .stdout(predicate::str::contains("feedc0de"));

        shipwright(&dir)
            .args(["artifact", "delete", "feedc0de", "issue"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted issue artifact"));

        shipwright(&dir)
            .args(["artifact", "show", "feedc0de", "issue"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No issue artifact"));
    }

    #[test]
    fn test_run_unknown_workflow() {
        let dir = init_project();
        create_job(&dir, "Add search");
        shipwright(&dir)
            .args(["run", "1", "--workflow", "deploy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown workflow type: deploy"));
    }
}

// =============================================================================
// Artifacts
// =============================================================================

mod artifacts {
    use super::*;

    #[test]
    fn test_artifact_types() {
        let dir = init_project();
        shipwright(&dir)
            .args(["artifact", "types"])
            .assert()
            .success()
            .stdout(predicate::str::contains("review_addressed"))
            .stdout(predicate::str::contains("pull_request"));
    }

    #[test]
    fn test_list_for_unknown_run_is_empty() {
        let dir = init_project();
        shipwright(&dir)
            .args(["artifact", "list", "abcd1234"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No artifacts for run abcd1234"));
    }

    #[test]
    fn test_show_rejects_unknown_type() {
        let dir = init_project();
        shipwright(&dir)
            .args(["artifact", "show", "abcd1234", "plan_file"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Valid types"));
    }

    #[test]
    fn test_file_backend_rejects_path_escaping_run_id() {
        let dir = init_project();
        fs::write(
            dir.path().join(".shipwright/shipwright.toml"),
            "[artifacts]\nbackend = \"files\"\n",
        )
        .unwrap();
        shipwright(&dir)
            .args(["artifact", "list", "../etc"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Worker
// =============================================================================

mod worker {
    use super::*;

    #[test]
    fn test_worker_requires_an_id() {
        let dir = init_project();
        shipwright(&dir)
            .args(["worker", "--once"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No worker id"));
    }

    #[test]
    fn test_worker_once_with_empty_queue() {
        let dir = init_project();
        shipwright(&dir)
            .args(["worker", "--once", "--worker-id", "w1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Processed 0 job(s)"));
    }

    #[test]
    fn test_worker_skips_jobs_reserved_for_another_worker() {
        let dir = init_project();
        shipwright(&dir)
            .args(["job", "create", "Add search", "--assign", "w2"])
            .assert()
            .success();
        shipwright(&dir)
            .args(["worker", "--once", "--worker-id", "w1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Processed 0 job(s)"));
        shipwright(&dir)
            .args(["job", "list", "--status", "pending"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Add search"));
    }
}
