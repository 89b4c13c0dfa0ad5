// =====================================================================================
// MONITORING CELL INTEGRATION TESTS - HTTP BOUNDARY
// =====================================================================================

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use monitoring_cell::{
    create_monitoring_router, MonitoringConfig, MonitoringHandlers, MonitoringService,
    RetryMode, ScriptedProbe,
};
use monitoring_cell::services::ProbeOutcome;
use shared_utils::test_utils::{manual_clock, TestConfig};

fn setup_app() -> Router {
    let config = MonitoringConfig::from_app_config(&TestConfig::default().to_app_config());
    let service = MonitoringService::builder(config, Arc::new(ScriptedProbe::new(ProbeOutcome::ok(120))))
        .clock(manual_clock())
        .retry_mode(RetryMode::Manual)
        .build();
    create_monitoring_router(Arc::new(MonitoringHandlers::new(service)))
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
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn outcome(connector_id: &str, success: bool, status_code: u16) -> Value {
    json!({
        "connector_id": connector_id,
        "endpoint": "/v1/data",
        "success": success,
        "status_code": status_code,
        "response_time_ms": 240,
        "error_message": if success { Value::Null } else { json!("upstream error") },
    })
}

#[tokio::test]
async fn test_list_health_returns_configured_connectors() {
    let app = setup_app();
    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let connectors = json.as_array().unwrap();
    assert_eq!(connectors.len(), 3);
    assert_eq!(connectors[0]["connector_id"], "usda-api");
    assert_eq!(connectors[0]["status"], "healthy");
    assert_eq!(connectors[0]["circuit_breaker"]["status"], "closed");
}

#[tokio::test]
async fn test_submit_outcome_updates_health() {
    let app = setup_app();
    let (status, json) = send(&app, "POST", "/outcomes", Some(outcome("bls-api", true, 200))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["request_count_24h"], 1);

    let (status, json) = send(&app, "GET", "/health/bls-api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["average_response_time_ms"], 240.0);
    assert!(json["last_success_at"].is_string());
}

#[tokio::test]
async fn test_unknown_connector_is_not_found() {
    let app = setup_app();
    let (status, json) = send(&app, "POST", "/outcomes", Some(outcome("nasa-api", true, 200))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nasa-api"));

    let (status, _) = send(&app, "GET", "/health/nasa-api", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scorecard_endpoint() {
    let app = setup_app();
    send(&app, "POST", "/outcomes", Some(outcome("usda-api", true, 200))).await;

    let (status, json) = send(&app, "GET", "/scorecards/usda?period=weekly", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["source_id"], "usda");
    assert_eq!(json["period"], "weekly");
    assert_eq!(json["trend"], "stable");

    let (status, _) = send(&app, "GET", "/scorecards/usda?period=monthly", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/scorecards/nasa", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_breaker_scenario_creates_job_and_degrades_summary() {
    let app = setup_app();
    let (status, json) = send(&app, "POST", "/scenarios/circuit-breaker-trip?connector_id=bls-api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcomes_submitted"], 6);
    assert_eq!(json["health"]["status"], "offline");
    assert_eq!(json["health"]["circuit_breaker"]["status"], "open");

    let (_, jobs) = send(&app, "GET", "/remediation/jobs", None).await;
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["connector_id"], "bls-api");
    assert_eq!(jobs[0]["reason"], "circuit-breaker-open");

    let (_, summary) = send(&app, "GET", "/summary", None).await;
    assert_eq!(summary["connectors"]["offline"], 1);
    assert_eq!(summary["connectors"]["healthy"], 2);
    assert_eq!(summary["overall_status"], "degraded");
}

#[tokio::test]
async fn test_unknown_scenario_is_not_found() {
    let app = setup_app();
    let (status, _) = send(&app, "POST", "/scenarios/meltdown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_alert_lifecycle_endpoints() {
    let app = setup_app();
    send(&app, "POST", "/scenarios/circuit-breaker-trip", None).await;

    let (status, alerts) = send(&app, "GET", "/alerts?state=active&level=critical", None).await;
    assert_eq!(status, StatusCode::OK);
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["alert_type"], "circuit-breaker");
    assert!(!alerts[0]["action_items"].as_array().unwrap().is_empty());
    let id = alerts[0]["id"].as_str().unwrap().to_string();

    let (status, acked) = send(&app, "POST", &format!("/alerts/{}/acknowledge", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(acked["acknowledged_at"].is_string());

    let (_, first) = send(&app, "POST", &format!("/alerts/{}/resolve", id), None).await;
    let (_, second) = send(&app, "POST", &format!("/alerts/{}/resolve", id), None).await;
    assert!(first["resolved_at"].is_string());
    assert_eq!(first["resolved_at"], second["resolved_at"]);

    let (_, active) = send(&app, "GET", "/alerts?state=active", None).await;
    assert!(active.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_alert_id_validation() {
    let app = setup_app();
    let (status, _) = send(&app, "POST", "/alerts/not-a-uuid/resolve", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, _) = send(&app, "POST", &format!("/alerts/{}/acknowledge", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_remediation_is_idempotent() {
    let app = setup_app();
    let body = json!({ "connector_id": "census-api" });

    let (status, first) = send(&app, "POST", "/remediation", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["reason"], "manual-trigger");
    assert_eq!(first["status"], "pending");

    let (_, second) = send(&app, "POST", "/remediation", Some(body)).await;
    assert_eq!(first["id"], second["id"]);

    let (_, jobs) = send(&app, "GET", "/remediation/jobs?status=pending", None).await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);

    let (_, cleared) = send(&app, "POST", "/remediation/jobs/clear", None).await;
    assert_eq!(cleared["cleared"], 0);
}

#[tokio::test]
async fn test_maintenance_endpoint() {
    let app = setup_app();
    let (status, json) = send(
        &app,
        "POST",
        "/health/census-api/maintenance",
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "maintenance");

    let (status, _) = send(&app, "POST", "/remediation", Some(json!({ "connector_id": "census-api" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_call_log_paging() {
    let app = setup_app();
    for code in [200, 500, 200] {
        send(&app, "POST", "/outcomes", Some(outcome("usda-api", code == 200, code))).await;
    }

    let (status, calls) = send(&app, "GET", "/calls?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let calls = calls.as_array().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1]["status_code"], 500);

    let (_, rest) = send(&app, "GET", "/calls?limit=10&offset=2", None).await;
    assert_eq!(rest.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_connector_test_endpoint_uses_probe() {
    let app = setup_app();
    let (status, json) = send(&app, "POST", "/health/usda-api/test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["request_count_24h"], 1);
    assert_eq!(json["consecutive_failures"], 0);

    let (_, calls) = send(&app, "GET", "/calls", None).await;
    assert_eq!(calls[0]["endpoint"], "manual-test");
}

#[tokio::test]
async fn test_reset_restores_initial_state() {
    let app = setup_app();
    send(&app, "POST", "/scenarios/circuit-breaker-trip", None).await;

    let (status, summary) = send(&app, "POST", "/scenarios/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["overall_status"], "healthy");
    assert_eq!(summary["connectors"]["healthy"], 3);
    assert_eq!(summary["alerts"]["critical"], 0);

    let (_, calls) = send(&app, "GET", "/calls", None).await;
    assert!(calls.as_array().unwrap().is_empty());
    let (_, jobs) = send(&app, "GET", "/remediation/jobs", None).await;
    assert!(jobs.as_array().unwrap().is_empty());
}
