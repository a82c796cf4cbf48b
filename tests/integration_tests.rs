//! Integration tests for rigger
//!
//! These tests exercise the HTTP surface end to end: starting a playbook,
//! following its replay stream, and querying the final status.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use predicates::prelude::*;
use tempfile::TempDir;
use tower::ServiceExt;

use rigger::broadcast::Broadcaster;
use rigger::job::JobController;
use rigger::server::api::AppState;
use rigger::server::{ServerConfig, build_router};

/// Helper to create a rigger Command
fn rigger() -> Command {
    Command::cargo_bin("rigger").unwrap()
}

/// Router backed by a temp playbook directory, with `sh` standing in for
/// the playbook interpreter.
fn test_router(playbook_dir: &Path, interpreter: &str) -> Router {
    let broadcaster = Broadcaster::new();
    let controller = JobController::new(Arc::clone(&broadcaster));
    let state = Arc::new(AppState {
        controller,
        broadcaster,
        config: ServerConfig {
            playbook_dir: playbook_dir.to_path_buf(),
            interpreter: interpreter.to_string(),
            ..ServerConfig::default()
        },
    });
    build_router(state)
}

fn write_playbook(dir: &TempDir, name: &str, contents: &str) {
    std::fs::write(dir.path().join(name), contents).unwrap();
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_start(app: &Router, playbook: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/playbook/{playbook}/start"))
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Fetch the replay stream (only sensible once the job is terminal, when the
/// stream is finite) with an optional reconnect cursor.
async fn get_stream(app: &Router, last_event_id: Option<&str>) -> String {
    let mut builder = Request::builder().uri("/api/output/stream");
    if let Some(id) = last_event_id {
        builder = builder.header("last-event-id", id);
    }
    let resp = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

async fn wait_until_terminal(app: &Router) -> serde_json::Value {
    for _ in 0..200 {
        let (_, body) = get_json(app, "/api/status").await;
        let status = body["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job did not reach a terminal state in time");
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_rigger_help() {
        rigger()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("playbook"));
    }

    #[test]
    fn test_rigger_version() {
        rigger().arg("--version").assert().success();
    }
}

// =============================================================================
// Playbook flow
// =============================================================================

mod playbook_flow {
    use super::*;

    #[tokio::test]
    async fn successful_run_end_to_end() {
        let dir = TempDir::new().unwrap();
        write_playbook(
            &dir,
            "deploy.sh",
            "echo connecting\necho connected\necho 'install step 1'\necho 'install step 2'\nexit 0\n",
        );
        let app = test_router(dir.path(), "sh");

        let (status, body) = post_start(&app, "deploy.sh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let final_status = wait_until_terminal(&app).await;
        assert_eq!(final_status["status"], "completed");
        assert_eq!(final_status["return_code"], 0);
        assert_eq!(final_status["job_id"], job_id.as_str());
        assert!(final_status["finished_at"].is_string());

        let stream = get_stream(&app, None).await;
        assert!(stream.contains("retry:"), "missing retry hint: {stream}");
        assert!(stream.contains("id: 0"));
        assert!(stream.contains("connecting"));
        assert!(stream.contains("install step 1"));
        assert!(stream.contains("install step 2"));
        assert!(stream.contains("event: done"));
    }

    #[tokio::test]
    async fn reconnect_resumes_without_duplicates() {
        let dir = TempDir::new().unwrap();
        write_playbook(&dir, "deploy.sh", "echo first\necho second\nexit 0\n");
        let app = test_router(dir.path(), "sh");

        post_start(&app, "deploy.sh").await;
        wait_until_terminal(&app).await;

        let full = get_stream(&app, None).await;
        assert!(full.contains("id: 0"));

        // A client that saw event 1 reconnects asking for everything after it.
        let resumed = get_stream(&app, Some("1")).await;
        assert!(!resumed.contains("id: 0\n"), "duplicate replay: {resumed}");
        assert!(!resumed.contains("id: 1\n"), "duplicate replay: {resumed}");
        assert!(resumed.contains("id: 2"));
        assert!(resumed.contains("event: done"));
    }

    #[tokio::test]
    async fn failed_run_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        write_playbook(&dir, "broken.sh", "echo starting\nexit 2\n");
        let app = test_router(dir.path(), "sh");

        post_start(&app, "broken.sh").await;
        let final_status = wait_until_terminal(&app).await;
        assert_eq!(final_status["status"], "failed");
        assert_eq!(final_status["return_code"], 2);

        let stream = get_stream(&app, None).await;
        assert!(stream.contains("event: failed"));
    }

    #[tokio::test]
    async fn setup_failure_is_observable_without_subscribing() {
        let dir = TempDir::new().unwrap();
        write_playbook(&dir, "site.yml", "- hosts: localhost\n");
        // Interpreter that cannot be spawned: the job is accepted, then
        // fails before producing output.
        let app = test_router(dir.path(), "/nonexistent/ansible-playbook");

        let (status, _) = post_start(&app, "site.yml").await;
        assert_eq!(status, StatusCode::OK);

        let final_status = wait_until_terminal(&app).await;
        assert_eq!(final_status["status"], "failed");
        assert!(final_status["return_code"].is_null());

        let stream = get_stream(&app, None).await;
        assert!(stream.contains("event: failed"));
        assert!(stream.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn new_job_discards_previous_replay() {
        let dir = TempDir::new().unwrap();
        write_playbook(&dir, "first.sh", "echo from-first-job\nexit 0\n");
        write_playbook(&dir, "second.sh", "echo from-second-job\nexit 0\n");
        let app = test_router(dir.path(), "sh");

        post_start(&app, "first.sh").await;
        wait_until_terminal(&app).await;

        post_start(&app, "second.sh").await;
        wait_until_terminal(&app).await;

        let stream = get_stream(&app, None).await;
        assert!(stream.contains("from-second-job"));
        assert!(!stream.contains("from-first-job"));
        assert!(stream.contains("id: 0"));
    }

    #[tokio::test]
    async fn status_query_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_playbook(&dir, "noop.sh", "exit 0\n");
        let app = test_router(dir.path(), "sh");

        post_start(&app, "noop.sh").await;
        wait_until_terminal(&app).await;

        let (_, first) = get_json(&app, "/api/status").await;
        let (_, second) = get_json(&app, "/api/status").await;
        assert_eq!(first, second);
    }
}
