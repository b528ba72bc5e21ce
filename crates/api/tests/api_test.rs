#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use trainer_api::{create_app, AppState};
use trainer_core::{
    config::{ApiConfig, TrainingConfig},
    models::{HyperParameters, NewModelVersion, Run, TriggerSource},
    traits::{ModelVersionRepository, RunRepository},
};
use trainer_dispatcher::{ModelVersionService, RunOrchestrator, ScheduleService, StatisticsService};
use trainer_infrastructure::DatabaseManager;
use trainer_worker::ProcessSupervisor;

struct TestApp {
    _workdir: TempDir,
    app: Router,
    runs: Arc<dyn RunRepository>,
    versions: Arc<dyn ModelVersionRepository>,
    orchestrator: Arc<RunOrchestrator>,
}

async fn test_app() -> TestApp {
    let workdir = TempDir::new().unwrap();
    std::fs::write(workdir.path().join("train.sh"), "echo training\n").unwrap();

    let manager = DatabaseManager::in_memory().await.unwrap();
    manager.migrate().await.unwrap();
    let runs = manager.run_repository();
    let versions = manager.model_version_repository();
    let schedules = manager.schedule_repository();

    let config = TrainingConfig {
        interpreter: "sh".to_string(),
        script_path: "train.sh".to_string(),
        working_dir: workdir.path().display().to_string(),
        ..TrainingConfig::default()
    };
    let supervisor = Arc::new(ProcessSupervisor::new(
        Arc::clone(&runs),
        Arc::clone(&versions),
        config,
    ));
    let orchestrator = Arc::new(RunOrchestrator::new(
        Arc::clone(&runs),
        Arc::clone(&schedules),
        supervisor,
        HyperParameters::default(),
    ));

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        statistics: Arc::new(StatisticsService::new(
            Arc::clone(&runs),
            Arc::clone(&schedules),
        )),
        schedule: Arc::new(ScheduleService::new(Arc::clone(&schedules))),
        model_versions: Arc::new(ModelVersionService::new(Arc::clone(&versions))),
    };

    TestApp {
        _workdir: workdir,
        app: create_app(state, &ApiConfig::default()),
        runs,
        versions,
        orchestrator,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn queued_run(runs: &Arc<dyn RunRepository>, alias: &str) -> Run {
    runs.create(&Run::queued(
        alias.to_string(),
        TriggerSource::Manual,
        HyperParameters::default(),
        Utc::now(),
    ))
    .await
    .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = test_app().await;
    let (status, body) = send(&t.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_trigger_run() {
    let t = test_app().await;
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/v1/model-training/runs/trigger",
        Some(json!({ "triggered_by": "manual", "rank": 16, "regParam": 0.05 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["triggered_by"], "manual");
    assert!(body["run_id"].as_str().unwrap().starts_with("manual__"));
    assert_eq!(body["hyper_parameters"]["rank"], 16);
    assert_eq!(body["hyper_parameters"]["regParam"], 0.05);
    assert_eq!(body["hyper_parameters"]["maxIter"], 10);

    t.orchestrator.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_trigger_rejects_invalid_body() {
    let t = test_app().await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/v1/model-training/runs/trigger",
        Some(json!({ "triggered_by": "manual", "rank": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/v1/model-training/runs/trigger",
        Some(json!({ "triggered_by": "cron" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    assert!(t.runs.find_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_runs_filters_and_validation() {
    let t = test_app().await;
    queued_run(&t.runs, "manual__a").await;
    queued_run(&t.runs, "manual__b").await;

    let (status, body) = send(
        &t.app,
        "GET",
        "/api/v1/model-training/runs?status=queued&limit=1&order=asc",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["total_pages"], 2);

    let (status, body) = send(&t.app, "GET", "/api/v1/model-training/runs?status=done", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(
        &t.app,
        "GET",
        "/api/v1/model-training/runs?triggered_by=robot",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, "GET", "/api/v1/model-training/runs?limit=500", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_logs_and_cancel_run() {
    let t = test_app().await;
    let run = queued_run(&t.runs, "manual__2024-01-01T00:00:00").await;

    let (status, body) = send(
        &t.app,
        "GET",
        "/api/v1/model-training/runs/manual__2024-01-01T00:00:00",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], run.id.as_str());

    let (status, body) = send(
        &t.app,
        "POST",
        &format!("/api/v1/model-training/runs/{}/cancel", run.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/v1/model-training/runs/{}/logs", run.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["logs"]
        .as_str()
        .unwrap()
        .contains("Run cancelled by user request."));
    assert_eq!(
        body["log_size"].as_u64().unwrap() as usize,
        body["logs"].as_str().unwrap().len()
    );

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/api/v1/model-training/runs/{}/cancel", run.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&t.app, "GET", "/api/v1/model-training/runs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_schedule_endpoints() {
    let t = test_app().await;

    let (status, _) = send(&t.app, "GET", "/api/v1/model-training/schedule", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &t.app,
        "PUT",
        "/api/v1/model-training/schedule",
        Some(json!({ "cron_expression": "every day" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        "PUT",
        "/api/v1/model-training/schedule",
        Some(json!({ "cron_expression": "0 */6 * * *", "maxIter": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "Every 6 hours");
    assert_eq!(body["maxIter"], 20);
    assert!(body["next_run"].is_string());

    let (status, body) = send(&t.app, "PATCH", "/api/v1/model-training/schedule/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_paused"], true);
    assert!(body["next_run"].is_null());

    let (_, stats) = send(&t.app, "GET", "/api/v1/model-training/statistics", None).await;
    assert!(stats["next_scheduled_run"].is_null());

    let (status, body) = send(&t.app, "PATCH", "/api/v1/model-training/schedule/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_paused"], false);

    let (_, stats) = send(&t.app, "GET", "/api/v1/model-training/statistics", None).await;
    assert!(stats["next_scheduled_run"].is_string());
    assert_eq!(stats["total_runs"], 0);
}

#[tokio::test]
async fn test_model_version_endpoints() {
    let t = test_app().await;

    let (status, body) = send(&t.app, "GET", "/api/v1/model-training/model-versions/active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["active_version"].is_null());
    assert_eq!(body["message"], "No active model version configured");

    let version = t
        .versions
        .create_version(&NewModelVersion {
            version_tag: "2024-01-01_00-00-00".to_string(),
            artifact_path: "models/als_model_2024-01-01_00-00-00".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/v1/model-training/model-versions/active",
        Some(json!({ "model_version_id": version.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_version"]["isActive"], true);
    assert_eq!(
        body["message"],
        "Successfully set active version to: 2024-01-01_00-00-00"
    );

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/v1/model-training/model-versions/active",
        Some(json!({ "model_version_id": 999 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/v1/model-training/metrics?version_id={}", version.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version_tag"], "2024-01-01_00-00-00");

    let (status, _) = send(&t.app, "GET", "/api/v1/model-training/metrics", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("/api/v1/model-training/model-versions/{}", version.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&t.app, "GET", "/api/v1/model-training/model-versions", None).await;
    assert!(body.as_array().unwrap().is_empty());
}
