// =====================================================================================
// MONITORING FACADE END-TO-END SCENARIOS
// =====================================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use tokio_test::assert_ok;

use monitoring_cell::models::{AlertFilter, AlertType, JobFilter};
use monitoring_cell::services::ProbeOutcome;
use monitoring_cell::{
    AlertLevel, CallOutcome, CircuitBreakerStatus, FileSnapshotStore, HealthStatus,
    MonitoringConfig, MonitoringError, MonitoringService, OverallStatus, RemediationReason,
    RemediationStatus, RetryMode, Scenario, ScriptedProbe,
};
use shared_utils::test_utils::{manual_clock, TestConfig};
use shared_utils::ManualClock;

struct Harness {
    service: MonitoringService,
    clock: Arc<ManualClock>,
    probe: Arc<ScriptedProbe>,
}

fn config() -> MonitoringConfig {
    MonitoringConfig::from_app_config(&TestConfig::default().to_app_config())
}

fn harness_with(config: MonitoringConfig, retry_mode: RetryMode) -> Harness {
    let clock = manual_clock();
    let probe = Arc::new(ScriptedProbe::new(ProbeOutcome::ok(90)));
    let service = MonitoringService::builder(config, probe.clone())
        .clock(clock.clone())
        .retry_mode(retry_mode)
        .build();
    Harness { service, clock, probe }
}

fn harness() -> Harness {
    harness_with(config(), RetryMode::Manual)
}

async fn submit_failures(service: &MonitoringService, connector_id: &str, count: usize) {
    for _ in 0..count {
        assert_ok!(
            service
                .submit_outcome(CallOutcome::failure(connector_id, "/foods", 503, "Service unavailable"))
                .await
        );
    }
}

#[tokio::test]
async fn test_breaker_trip_recovers_through_half_open_probe() {
    let h = harness();

    submit_failures(&h.service, "usda-api", 5).await;
    let health = h.service.get_health("usda-api").await.unwrap();
    assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Open);
    assert!(health.circuit_breaker.failures_at_open >= 5);
    assert_eq!(health.status, HealthStatus::Offline);

    let jobs = h.service.get_jobs(&JobFilter::default()).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].reason, RemediationReason::CircuitBreakerOpen);

    // Still cooling down: nothing is probed.
    assert_eq!(h.service.run_due_remediations().await, 0);
    assert!(h.probe.calls().is_empty());

    h.clock.advance_secs(60);
    assert!(h.service.tick().await);

    assert_eq!(h.probe.calls(), vec!["usda-api"]);
    let health = h.service.get_health("usda-api").await.unwrap();
    assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Closed);
    assert_eq!(health.consecutive_failures, 0);

    let job = h.service.get_job(jobs[0].id).await.unwrap();
    assert_eq!(job.status, RemediationStatus::Success);
    assert_eq!(job.attempts.len(), 1);
    assert!(job.total_duration_ms.is_some());

    let breaker_alerts = h
        .service
        .get_alerts(&AlertFilter {
            alert_type: Some(AlertType::CircuitBreaker),
            ..AlertFilter::active()
        })
        .await;
    assert!(breaker_alerts.is_empty());

    let calls = h.service.query_calls(1, 0).await;
    assert_eq!(calls[0].endpoint, "recovery-probe");
    assert_eq!(calls[0].retry_attempt, 1);
}

#[tokio::test]
async fn test_error_rate_spike_raises_one_critical_alert() {
    let h = harness();
    let report = h
        .service
        .run_scenario(Scenario::ErrorRateSpike, Some("bls-api"))
        .await
        .unwrap();
    assert_eq!(report.outcomes_submitted, 20);
    assert_eq!(report.health.circuit_breaker.status, CircuitBreakerStatus::Closed);

    let error_rate = AlertFilter {
        alert_type: Some(AlertType::ErrorRate),
        ..AlertFilter::default()
    };

    // The breach has to hold for two minutes first.
    assert!(h.service.get_alerts(&error_rate).await.is_empty());

    h.clock.advance_minutes(2);
    h.service.tick().await;
    let alerts = h.service.get_alerts(&error_rate).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Critical);
    assert!(alerts[0].metric_value > 0.30);

    // Operator resolves it, but the breach persists inside the cooldown window.
    h.service.resolve_alert(alerts[0].id).await.unwrap();
    h.clock.advance_minutes(1);
    h.service.tick().await;
    assert_eq!(h.service.get_alerts(&error_rate).await.len(), 1);

    // Once the cooldown has passed, the still-breached rule raises again.
    h.clock.advance_minutes(15);
    h.service.tick().await;
    assert_eq!(h.service.get_alerts(&error_rate).await.len(), 2);
}

#[tokio::test]
async fn test_critical_alert_triggers_remediation() {
    let h = harness();
    h.service
        .run_scenario(Scenario::ErrorRateSpike, Some("census-api"))
        .await
        .unwrap();
    h.clock.advance_minutes(2);
    h.service.tick().await;

    let jobs = h
        .service
        .get_jobs(&JobFilter {
            connector_id: Some("census-api".to_string()),
            ..JobFilter::default()
        })
        .await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].reason, RemediationReason::CriticalAlert);
    assert_eq!(jobs[0].status, RemediationStatus::Success);
}

#[tokio::test]
async fn test_summary_with_one_offline_connector_is_degraded() {
    let h = harness();
    h.service
        .run_scenario(Scenario::CircuitBreakerTrip, Some("usda-api"))
        .await
        .unwrap();
    h.service
        .submit_outcome(CallOutcome::success("bls-api", "/prices", 180))
        .await
        .unwrap();

    let summary = h.service.get_system_summary().await;
    assert_eq!(summary.connectors.total, 3);
    assert_eq!(summary.connectors.healthy, 2);
    assert_eq!(summary.connectors.offline, 1);
    assert_eq!(summary.overall_status, OverallStatus::Degraded);
    assert_eq!(summary.performance.total_requests_24h, 7);
    assert_eq!(summary.remediation.active, 1);
}

#[tokio::test]
async fn test_majority_offline_is_critical() {
    let h = harness();
    for connector_id in ["usda-api", "bls-api"] {
        h.service
            .run_scenario(Scenario::CircuitBreakerTrip, Some(connector_id))
            .await
            .unwrap();
    }
    let summary = h.service.get_system_summary().await;
    assert_eq!(summary.overall_status, OverallStatus::Critical);
}

#[tokio::test]
async fn test_exhausted_remediation_raises_single_critical_alert() {
    let h = harness();
    for _ in 0..3 {
        h.probe.push("census-api", ProbeOutcome::failed(503, "still down"));
    }

    let job = h
        .service
        .trigger_remediation("census-api", Some("census"), RemediationReason::ManualTrigger)
        .await
        .unwrap();

    // Attempt 1 runs now, then 1s and 2s backoffs.
    h.service.run_due_remediations().await;
    h.clock.advance_secs(1);
    h.service.run_due_remediations().await;
    h.clock.advance_secs(2);
    h.service.run_due_remediations().await;

    let job = h.service.get_job(job.id).await.unwrap();
    assert_eq!(job.status, RemediationStatus::Failed);
    assert_eq!(job.attempts.len(), 3);
    assert!(job.next_retry_at.is_none());

    let failed = h
        .service
        .get_alerts(&AlertFilter {
            alert_type: Some(AlertType::RemediationFailed),
            ..AlertFilter::default()
        })
        .await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].level, AlertLevel::Critical);

    // Terminal jobs are never retried on their own.
    h.clock.advance_minutes(10);
    assert_eq!(h.service.run_due_remediations().await, 0);
    assert_eq!(h.probe.calls().len(), 3);
}

#[tokio::test]
async fn test_at_most_one_active_job_per_connector() {
    let h = harness();
    let first = h
        .service
        .trigger_remediation("bls-api", None, RemediationReason::ManualTrigger)
        .await
        .unwrap();
    submit_failures(&h.service, "bls-api", 5).await;
    let again = h
        .service
        .trigger_remediation("bls-api", None, RemediationReason::ManualTrigger)
        .await
        .unwrap();

    assert_eq!(first.id, again.id);
    let active = h
        .service
        .get_jobs(&JobFilter::default())
        .await
        .into_iter()
        .filter(|job| job.connector_id == "bls-api" && job.status.is_active())
        .count();
    assert_eq!(active, 1);

    let cancelled = h.service.cancel_remediation("bls-api").await.unwrap();
    assert_eq!(cancelled.status, RemediationStatus::Failed);
    assert_matches!(
        h.service.cancel_remediation("bls-api").await,
        Err(MonitoringError::JobNotFound(_))
    );
    assert_eq!(h.service.clear_completed_jobs().await, 1);
}

#[tokio::test]
async fn test_call_log_respects_cap() {
    let mut config = config();
    config.retention.call_log_max_entries = 10;
    let h = harness_with(config, RetryMode::Manual);

    for i in 0..25 {
        h.service
            .submit_outcome(CallOutcome::success("usda-api", &format!("/page/{}", i), 50))
            .await
            .unwrap();
    }

    let calls = h.service.query_calls(100, 0).await;
    assert_eq!(calls.len(), 10);
    assert_eq!(calls[0].endpoint, "/page/24");
    assert_eq!(calls[9].endpoint, "/page/15");
}

#[tokio::test]
async fn test_old_calls_age_out_of_query() {
    let h = harness();
    h.service
        .submit_outcome(CallOutcome::success("usda-api", "/old", 50))
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::days(8));
    h.service.tick().await;

    assert!(h.service.query_calls(10, 0).await.is_empty());
}

#[tokio::test]
async fn test_reset_cancels_pending_retry_timers() {
    let h = harness_with(config(), RetryMode::Timers);
    submit_failures(&h.service, "usda-api", 5).await;

    // The immediate attempt finds the breaker open and re-arms a timer for half-open.
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(h.service.pending_timers(), 1);

    h.service.reset().await;
    assert_eq!(h.service.pending_timers(), 0);
    assert!(h.service.get_jobs(&JobFilter::default()).await.is_empty());
    let health = h.service.get_health("usda-api").await.unwrap();
    assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Closed);
    assert_eq!(health.request_count_24h, 0);
}

#[tokio::test]
async fn test_subscribers_receive_full_snapshots() {
    let h = harness();
    let mut receiver = h.service.subscribe();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let subscription = h.service.subscribe_fn(move |snapshot| {
        assert_eq!(snapshot.health.len(), 3);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.service
        .submit_outcome(CallOutcome::success("usda-api", "/foods", 80))
        .await
        .unwrap();
    let snapshot = receiver.recv().await.unwrap();
    assert_eq!(snapshot.health.len(), 3);
    assert_eq!(snapshot.summary.performance.total_requests_24h, 1);

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let delivered = seen.load(Ordering::SeqCst);
    assert!(delivered >= 1);

    subscription.unsubscribe();
    h.service
        .submit_outcome(CallOutcome::success("usda-api", "/foods", 80))
        .await
        .unwrap();
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), delivered);
}

#[tokio::test]
async fn test_state_survives_restart_through_snapshot_store() {
    let dir = tempfile::tempdir().unwrap();
    let clock = manual_clock();

    let first = MonitoringService::builder(config(), Arc::new(ScriptedProbe::new(ProbeOutcome::ok(50))))
        .clock(clock.clone())
        .store(Arc::new(FileSnapshotStore::new(dir.path())))
        .retry_mode(RetryMode::Manual)
        .build();
    first
        .run_scenario(Scenario::CircuitBreakerTrip, Some("bls-api"))
        .await
        .unwrap();
    first.persist().await.unwrap();

    let second = MonitoringService::builder(config(), Arc::new(ScriptedProbe::new(ProbeOutcome::ok(50))))
        .clock(clock.clone())
        .store(Arc::new(FileSnapshotStore::new(dir.path())))
        .retry_mode(RetryMode::Manual)
        .build_and_restore()
        .await;

    let health = second.get_health("bls-api").await.unwrap();
    assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Open);
    assert_eq!(health.request_count_24h, 6);
    assert_eq!(second.query_calls(100, 0).await.len(), 6);
    assert_eq!(
        second.get_alerts(&AlertFilter::active()).await.len(),
        first.get_alerts(&AlertFilter::active()).await.len()
    );

    // The open breaker gets a fresh recovery job after the restart.
    let jobs = second.get_jobs(&JobFilter::default()).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].connector_id, "bls-api");
    assert_eq!(jobs[0].reason, RemediationReason::CircuitBreakerOpen);

    clock.advance_secs(60);
    second.tick().await;
    let job = second.get_job(jobs[0].id).await.unwrap();
    assert_eq!(job.status, RemediationStatus::Success);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());
    tokio::fs::write(store.path(), b"not json").await.unwrap();

    let service = MonitoringService::builder(config(), Arc::new(ScriptedProbe::new(ProbeOutcome::ok(50))))
        .clock(manual_clock())
        .store(Arc::new(store))
        .retry_mode(RetryMode::Manual)
        .build_and_restore()
        .await;

    let health = service.list_health().await;
    assert_eq!(health.len(), 3);
    assert!(health.iter().all(|h| h.request_count_24h == 0));
}
