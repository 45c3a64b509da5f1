//! Router tests -- drive the axum app in-process with `oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use testdash::api::{self, state::AppState};
use testdash::config::{DashboardConfig, RunnerConfig};

const REPORT: &str = include_str!("../fixtures/playwright/report.json");

struct TestApp {
    _tmp: TempDir,
    state: AppState,
}

impl TestApp {
    fn new() -> Self {
        // Harmless stand-in so queued jobs finish quickly.
        Self::with_runner(RunnerConfig {
            program: "true".into(),
            args: vec![],
            reporter_args: vec![],
            list_args: vec![],
            ..RunnerConfig::default()
        })
    }

    fn with_runner(runner: RunnerConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");

        add_project(&root, "shop", None);
        add_project(&root, "legacy", Some("name = \"Legacy\"\ncan_run_from_ui = false\n"));

        let mut config = DashboardConfig::default();
        config.projects.root = root;
        config.storage.db_path = tmp.path().join("testdash.db");
        config.runner = runner;

        let state = AppState::build(&config).unwrap();
        Self { _tmp: tmp, state }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = api::router(self.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

fn add_project(root: &std::path::Path, id: &str, manifest: Option<&str>) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("playwright.config.ts"), "export default {};\n").unwrap();
    if let Some(manifest) = manifest {
        std::fs::write(dir.join("testdash.toml"), manifest).unwrap();
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["meta"]["timestamp"].is_string());
}

#[tokio::test]
async fn test_projects_are_discovered() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/v1/projects").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);

    let projects = body["data"].as_array().unwrap();
    let legacy = projects.iter().find(|p| p["id"] == "legacy").unwrap();
    assert_eq!(legacy["name"], "Legacy");
    assert_eq!(legacy["canRunFromUI"], false);
}

#[tokio::test]
async fn test_trigger_run_is_accepted() {
    let app = TestApp::new();
    let (status, body) = app.post("/api/v1/projects/shop/run", r#"{"grep": "@smoke"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["projectId"], "shop");
    assert_eq!(body["data"]["grep"], "@smoke");
    assert!(body["data"]["jobId"].is_string());
}

#[tokio::test]
async fn test_trigger_run_without_body() {
    let app = TestApp::new();
    let (status, body) = app.post("/api/v1/projects/shop/run", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["data"]["grep"].is_null());
}

#[tokio::test]
async fn test_trigger_run_rejects_unsafe_grep() {
    let app = TestApp::new();
    let (status, body) = app
        .post("/api/v1/projects/shop/run", r#"{"grep": "x; rm -rf /"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("grep"));
}

#[tokio::test]
async fn test_trigger_while_running_is_409() {
    let app = TestApp::with_runner(RunnerConfig {
        program: "sh".into(),
        args: vec!["-c".into(), "exec sleep 5".into(), "sh".into()],
        reporter_args: vec![],
        list_args: vec![],
        timeout_secs: 3,
        list_timeout_secs: 1,
        ..RunnerConfig::default()
    });

    let (status, _) = app.post("/api/v1/projects/shop/run", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !app.state.orchestrator.is_running("shop") {
        assert!(std::time::Instant::now() < deadline, "run never started");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let (status, body) = app.post("/api/v1/projects/shop/run", "").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already has a run in progress"));

    let (_, active) = app.get("/api/v1/runs/active").await;
    assert_eq!(active["data"]["projectIds"], serde_json::json!(["shop"]));
}

#[tokio::test]
async fn test_trigger_unknown_project_is_404() {
    let app = TestApp::new();
    let (status, _) = app.post("/api/v1/projects/nope/run", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_locked_project_is_409() {
    let app = TestApp::new();
    let (status, _) = app.post("/api/v1/projects/legacy/run", "").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_run_all_lists_runnable_projects() {
    let app = TestApp::new();
    let (status, body) = app.post("/api/v1/run-all", "{}").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["projects"], serde_json::json!(["shop"]));
}

#[tokio::test]
async fn test_history_is_empty_by_default() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/v1/projects/shop/runs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["runs"], serde_json::json!([]));
    assert!(body["data"]["lastRun"].is_null());
}

#[tokio::test]
async fn test_upload_then_read_history() {
    let app = TestApp::new();
    let (status, body) = app.post("/api/v1/projects/ci-only/runs", REPORT).await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["stats"]["total"], 4);
    assert_eq!(body["data"]["stats"]["duration"], 7421);

    let (_, history) = app.get("/api/v1/projects/ci-only/runs").await;
    assert_eq!(history["data"]["runs"].as_array().unwrap().len(), 1);
    assert_eq!(history["data"]["lastRun"]["id"], run_id.as_str());

    let (_, last) = app.get("/api/v1/projects/ci-only/runs/last").await;
    assert_eq!(last["data"]["lastRun"]["id"], run_id.as_str());
}

#[tokio::test]
async fn test_upload_garbage_is_400() {
    let app = TestApp::new();
    let (status, _) = app.post("/api/v1/projects/shop/runs", "no report here").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_project_id_is_400() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/v1/projects/.hidden/runs").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_active_runs_empty_when_idle() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/v1/runs/active").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["projectIds"], serde_json::json!([]));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/v1/nothing-here").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
