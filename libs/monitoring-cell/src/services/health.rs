// =====================================================================================
// HEALTH TRACKER
// =====================================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use shared_config::ConnectorConfig;

use crate::models::{
    CallLogEntry, CircuitBreakerStatus, ConnectorHealth, HealthStatus, MonitoringThresholds,
    RateLimitUsage,
};
use crate::services::circuit_breaker::{BreakerTransition, CircuitBreaker};
use crate::services::recorder::CallRecorder;

/// What changed for a connector as a result of one observation or poll.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthChange {
    pub connector_id: String,
    pub previous_status: HealthStatus,
    pub status: HealthStatus,
    pub transition: Option<BreakerTransition>,
}

/// Status is a pure function of the rolling metrics, failure streak and breaker.
pub fn derive_status(
    health: &ConnectorHealth,
    thresholds: &MonitoringThresholds,
    failure_threshold: u32,
) -> HealthStatus {
    if health.maintenance {
        return HealthStatus::Maintenance;
    }
    if health.circuit_breaker.status == CircuitBreakerStatus::Open
        || health.consecutive_failures >= failure_threshold
    {
        return HealthStatus::Offline;
    }
    if health.uptime_24h < thresholds.uptime_warning
        || health.average_response_time_ms > thresholds.response_time_warning_ms
    {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

pub struct HealthTracker {
    order: Vec<String>,
    connectors: HashMap<String, ConnectorHealth>,
    rate_limits: HashMap<String, u32>,
    breaker: CircuitBreaker,
    thresholds: MonitoringThresholds,
}

impl HealthTracker {
    pub fn new(
        connectors: &[ConnectorConfig],
        breaker: CircuitBreaker,
        thresholds: MonitoringThresholds,
    ) -> Self {
        let mut tracker = Self {
            order: Vec::with_capacity(connectors.len()),
            connectors: HashMap::with_capacity(connectors.len()),
            rate_limits: HashMap::with_capacity(connectors.len()),
            breaker,
            thresholds,
        };

        for connector in connectors {
            if tracker.connectors.contains_key(&connector.connector_id) {
                warn!(connector_id = %connector.connector_id, "duplicate connector ignored");
                continue;
            }
            tracker.order.push(connector.connector_id.clone());
            tracker
                .rate_limits
                .insert(connector.connector_id.clone(), connector.rate_limit_per_hour);
            let health = tracker.fresh_health(connector);
            tracker.connectors.insert(connector.connector_id.clone(), health);
        }

        info!(connectors = tracker.order.len(), "health tracker initialized");
        tracker
    }

    fn fresh_health(&self, connector: &ConnectorConfig) -> ConnectorHealth {
        ConnectorHealth {
            connector_id: connector.connector_id.clone(),
            source_id: connector.source_id.clone(),
            name: connector.name.clone(),
            status: HealthStatus::Healthy,
            circuit_breaker: self.breaker.initial_state(),
            consecutive_failures: 0,
            uptime_24h: 1.0,
            uptime_7d: 1.0,
            average_response_time_ms: 0.0,
            error_count_24h: 0,
            request_count_24h: 0,
            rate_limit: RateLimitUsage {
                used: 0,
                limit: connector.rate_limit_per_hour,
            },
            last_success_at: None,
            last_checked_at: None,
            last_error: None,
            maintenance: false,
        }
    }

    pub fn contains(&self, connector_id: &str) -> bool {
        self.connectors.contains_key(connector_id)
    }

    pub fn get(&self, connector_id: &str) -> Option<&ConnectorHealth> {
        self.connectors.get(connector_id)
    }

    /// All connectors in configuration order.
    pub fn list(&self) -> Vec<ConnectorHealth> {
        self.order
            .iter()
            .filter_map(|id| self.connectors.get(id))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectorHealth> {
        self.order.iter().filter_map(|id| self.connectors.get(id))
    }

    /// Applies one recorded outcome. The entry must already be in `recorder`.
    #[instrument(skip(self, entry, recorder), fields(connector_id = %entry.connector_id))]
    pub fn observe(
        &mut self,
        entry: &CallLogEntry,
        recorder: &CallRecorder,
        now: DateTime<Utc>,
    ) -> Option<HealthChange> {
        let breaker = self.breaker.clone();
        let health = self.connectors.get_mut(&entry.connector_id)?;
        let previous_status = health.status;

        // An open breaker whose cool-down has elapsed lets this call through as the trial.
        let mut transition = breaker.poll(&entry.connector_id, &mut health.circuit_breaker, now);

        health.last_checked_at = Some(entry.timestamp);
        if entry.success {
            // Calls that slip through an open breaker do not break the failure streak.
            if health.circuit_breaker.status != CircuitBreakerStatus::Open {
                health.consecutive_failures = 0;
            }
            health.last_success_at = Some(entry.timestamp);
            health.last_error = None;
            if let Some(closed) = breaker.on_success(&entry.connector_id, &mut health.circuit_breaker) {
                transition = Some(closed);
            }
        } else {
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_error = entry
                .error_message
                .clone()
                .or_else(|| Some(format!("HTTP {}", entry.status_code)));
            if let Some(opened) = breaker.on_failure(
                &entry.connector_id,
                &mut health.circuit_breaker,
                health.consecutive_failures,
                now,
            ) {
                transition = Some(opened);
            }
        }

        let rate_limit = self.rate_limits.get(&entry.connector_id).copied().unwrap_or(0);
        let health = self.connectors.get_mut(&entry.connector_id)?;
        apply_rolling_metrics(health, recorder, now, rate_limit);
        health.status = derive_status(health, &self.thresholds, breaker.failure_threshold());

        debug!(
            status = ?health.status,
            breaker = %health.circuit_breaker.status,
            consecutive_failures = health.consecutive_failures,
            "health updated"
        );

        Some(HealthChange {
            connector_id: entry.connector_id.clone(),
            previous_status,
            status: health.status,
            transition,
        })
    }

    /// Time-driven upkeep: cool-down expiry and sliding windows.
    pub fn poll(&mut self, recorder: &CallRecorder, now: DateTime<Utc>) -> Vec<HealthChange> {
        let mut changes = Vec::new();
        for connector_id in &self.order {
            let Some(health) = self.connectors.get_mut(connector_id) else {
                continue;
            };
            let previous_status = health.status;
            let transition = self.breaker.poll(connector_id, &mut health.circuit_breaker, now);
            let rate_limit = self.rate_limits.get(connector_id).copied().unwrap_or(0);
            apply_rolling_metrics(health, recorder, now, rate_limit);
            health.status = derive_status(health, &self.thresholds, self.breaker.failure_threshold());

            if transition.is_some() || health.status != previous_status {
                changes.push(HealthChange {
                    connector_id: connector_id.clone(),
                    previous_status,
                    status: health.status,
                    transition,
                });
            }
        }
        changes
    }

    /// Claims the half-open trial slot for a recovery probe.
    pub fn begin_trial(&mut self, connector_id: &str, now: DateTime<Utc>) -> Option<bool> {
        let health = self.connectors.get_mut(connector_id)?;
        self.breaker.poll(connector_id, &mut health.circuit_breaker, now);
        Some(self.breaker.try_begin_trial(&mut health.circuit_breaker))
    }

    pub fn release_trial(&mut self, connector_id: &str) {
        if let Some(health) = self.connectors.get_mut(connector_id) {
            self.breaker.release_trial(&mut health.circuit_breaker);
        }
    }

    pub fn set_maintenance(&mut self, connector_id: &str, enabled: bool) -> Option<ConnectorHealth> {
        let failure_threshold = self.breaker.failure_threshold();
        let health = self.connectors.get_mut(connector_id)?;
        health.maintenance = enabled;
        health.status = derive_status(health, &self.thresholds, failure_threshold);
        info!(connector_id = %connector_id, enabled, "maintenance mode changed");
        Some(health.clone())
    }

    /// Adopts persisted health for connectors that are still configured.
    pub fn restore(&mut self, persisted: HashMap<String, ConnectorHealth>) -> usize {
        let mut restored = 0;
        for (connector_id, mut health) in persisted {
            let Some(current) = self.connectors.get_mut(&connector_id) else {
                debug!(connector_id = %connector_id, "dropping persisted health for unknown connector");
                continue;
            };
            // Identity and limits come from configuration, not from the snapshot.
            health.source_id = current.source_id.clone();
            health.name = current.name.clone();
            health.rate_limit.limit = current.rate_limit.limit;
            health.circuit_breaker.trial_in_flight = false;
            *current = health;
            restored += 1;
        }
        restored
    }

    pub fn reset(&mut self) {
        let configs: Vec<ConnectorConfig> = self
            .iter()
            .map(|h| ConnectorConfig {
                connector_id: h.connector_id.clone(),
                source_id: h.source_id.clone(),
                name: h.name.clone(),
                rate_limit_per_hour: h.rate_limit.limit,
            })
            .collect();
        for config in configs {
            let health = self.fresh_health(&config);
            self.connectors.insert(config.connector_id.clone(), health);
        }
    }

    pub fn snapshot(&self) -> HashMap<String, ConnectorHealth> {
        self.connectors.clone()
    }
}

fn apply_rolling_metrics(
    health: &mut ConnectorHealth,
    recorder: &CallRecorder,
    now: DateTime<Utc>,
    rate_limit: u32,
) {
    let day = recorder.window_stats(&health.connector_id, now - Duration::hours(24));
    let week = recorder.window_stats(&health.connector_id, now - Duration::days(7));
    let hour = recorder.window_stats(&health.connector_id, now - Duration::hours(1));

    health.uptime_24h = day.uptime();
    health.uptime_7d = week.uptime();
    health.average_response_time_ms = day.average_response_time_ms();
    health.request_count_24h = day.requests;
    health.error_count_24h = day.errors;
    health.rate_limit = RateLimitUsage {
        used: hour.requests.min(u32::MAX as u64) as u32,
        limit: rate_limit,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RetentionConfig};
    use crate::models::CallOutcome;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    fn setup() -> (HealthTracker, CallRecorder) {
        let tracker = HealthTracker::new(
            &[
                ConnectorConfig::new("usda-api", "usda", "USDA"),
                ConnectorConfig::new("bls-api", "bls", "BLS"),
            ],
            CircuitBreaker::new(BreakerConfig::default()),
            MonitoringThresholds::default(),
        );
        (tracker, CallRecorder::new(&RetentionConfig::default()))
    }

    fn observe(
        tracker: &mut HealthTracker,
        recorder: &mut CallRecorder,
        outcome: CallOutcome,
        now: DateTime<Utc>,
    ) -> HealthChange {
        let entry = recorder.record(&outcome, now);
        tracker.observe(&entry, recorder, now).unwrap()
    }

    #[test]
    fn test_unknown_connector_is_ignored() {
        let (mut tracker, mut recorder) = setup();
        let entry = recorder.record(&CallOutcome::success("nope", "/", 10), epoch());
        assert!(tracker.observe(&entry, &recorder, epoch()).is_none());
    }

    #[test]
    fn test_failures_open_breaker_and_go_offline() {
        let (mut tracker, mut recorder) = setup();
        let mut last = None;
        for i in 0..5 {
            last = Some(observe(
                &mut tracker,
                &mut recorder,
                CallOutcome::failure("usda-api", "/foods", 503, "unavailable"),
                epoch() + Duration::seconds(i),
            ));
        }

        let change = last.unwrap();
        assert_eq!(change.transition, Some(BreakerTransition::Opened));
        assert_eq!(change.status, HealthStatus::Offline);

        let health = tracker.get("usda-api").unwrap();
        assert_eq!(health.circuit_breaker.status, CircuitBreakerStatus::Open);
        assert!(health.circuit_breaker.failures_at_open >= 5);
        assert_eq!(health.error_count_24h, 5);
        assert_eq!(health.last_error.as_deref(), Some("unavailable"));
    }

    #[test]
    fn test_success_resets_streak_and_updates_metrics() {
        let (mut tracker, mut recorder) = setup();
        observe(&mut tracker, &mut recorder, CallOutcome::failure("usda-api", "/", 500, "boom"), epoch());
        observe(&mut tracker, &mut recorder, CallOutcome::success("usda-api", "/", 300), epoch());

        let health = tracker.get("usda-api").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.request_count_24h, 2);
        assert_eq!(health.uptime_24h, 0.5);
        assert_eq!(health.average_response_time_ms, 150.0);
        assert_eq!(health.rate_limit.used, 2);
        assert_eq!(health.last_success_at, Some(epoch()));
        // Uptime of 50% is below the warning threshold.
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_success_while_open_keeps_streak_for_reopen() {
        let (mut tracker, mut recorder) = setup();
        for _ in 0..5 {
            observe(&mut tracker, &mut recorder, CallOutcome::failure("usda-api", "/", 503, "down"), epoch());
        }
        observe(&mut tracker, &mut recorder, CallOutcome::success("usda-api", "/", 80), epoch());
        assert_eq!(tracker.get("usda-api").unwrap().consecutive_failures, 5);

        let later = epoch() + Duration::seconds(61);
        let change = observe(
            &mut tracker,
            &mut recorder,
            CallOutcome::failure("usda-api", "/", 503, "down"),
            later,
        );
        assert_eq!(change.transition, Some(BreakerTransition::Reopened));

        let breaker = &tracker.get("usda-api").unwrap().circuit_breaker;
        assert_eq!(breaker.status, CircuitBreakerStatus::Open);
        assert!(breaker.failures_at_open >= tracker.breaker.failure_threshold());
    }

    #[test]
    fn test_poll_half_opens_after_cooldown() {
        let (mut tracker, mut recorder) = setup();
        for _ in 0..5 {
            observe(&mut tracker, &mut recorder, CallOutcome::failure("usda-api", "/", 503, "down"), epoch());
        }

        assert!(tracker.poll(&recorder, epoch() + Duration::seconds(30)).is_empty());

        let changes = tracker.poll(&recorder, epoch() + Duration::seconds(60));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].transition, Some(BreakerTransition::HalfOpened));
        assert_eq!(
            tracker.get("usda-api").unwrap().circuit_breaker.status,
            CircuitBreakerStatus::HalfOpen
        );
    }

    #[test]
    fn test_maintenance_overrides_status() {
        let (mut tracker, _) = setup();
        let health = tracker.set_maintenance("bls-api", true).unwrap();
        assert_eq!(health.status, HealthStatus::Maintenance);
        let health = tracker.set_maintenance("bls-api", false).unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(tracker.set_maintenance("missing", true).is_none());
    }

    #[test]
    fn test_derive_status_thresholds() {
        let (tracker, _) = setup();
        let thresholds = MonitoringThresholds::default();
        let mut health = tracker.get("usda-api").unwrap().clone();
        assert_eq!(derive_status(&health, &thresholds, 5), HealthStatus::Healthy);

        health.average_response_time_ms = 2_500.0;
        assert_eq!(derive_status(&health, &thresholds, 5), HealthStatus::Degraded);

        health.consecutive_failures = 5;
        assert_eq!(derive_status(&health, &thresholds, 5), HealthStatus::Offline);
    }
}
