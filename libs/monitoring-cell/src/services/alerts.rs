// =====================================================================================
// ALERT ENGINE
// =====================================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AlertRule;
use crate::models::{
    AlertFilter, AlertLevel, AlertType, CircuitBreakerStatus, ConnectorHealth, MonitoringAlert,
    MonitoringError, MonitoringThresholds,
};

pub type AlertKey = (String, AlertType);

/// A breached threshold: which level, the observed value and the cut-off it crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Default)]
pub struct AlertEvaluation {
    pub raised: Vec<MonitoringAlert>,
    pub resolved: Vec<Uuid>,
}

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    thresholds: MonitoringThresholds,
    alerts: Vec<MonitoringAlert>,
    breach_started: HashMap<AlertKey, DateTime<Utc>>,
    last_raised: HashMap<AlertKey, DateTime<Utc>>,
    retention: Duration,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, thresholds: MonitoringThresholds, retention: Duration) -> Self {
        Self {
            rules,
            thresholds,
            alerts: Vec::new(),
            breach_started: HashMap::new(),
            last_raised: HashMap::new(),
            retention,
        }
    }

    /// Measures one rule against a connector. `None` means the condition is clear.
    pub fn measure(
        &self,
        rule: &AlertRule,
        health: &ConnectorHealth,
        now: DateTime<Utc>,
    ) -> Option<Breach> {
        let t = &self.thresholds;
        match rule.alert_type {
            AlertType::ResponseTime => {
                if health.request_count_24h < rule.min_samples.max(1) {
                    return None;
                }
                above(
                    health.average_response_time_ms,
                    t.response_time_warning_ms,
                    t.response_time_critical_ms,
                )
            }
            AlertType::ErrorRate => {
                if health.request_count_24h < rule.min_samples.max(1) {
                    return None;
                }
                above(health.error_rate_24h(), t.error_rate_warning, t.error_rate_critical)
            }
            AlertType::DataFreshness => {
                let last_success = health.last_success_at?;
                let hours = (now - last_success).num_seconds().max(0) as f64 / 3600.0;
                above(hours, t.freshness_warning_hours, t.freshness_critical_hours)
            }
            AlertType::Uptime => {
                if health.request_count_24h < rule.min_samples.max(1) {
                    return None;
                }
                below(health.uptime_24h, t.uptime_warning, t.uptime_critical)
            }
            AlertType::CircuitBreaker => match health.circuit_breaker.status {
                CircuitBreakerStatus::Open => Some(Breach {
                    level: AlertLevel::Critical,
                    value: health.consecutive_failures as f64,
                    threshold: health.circuit_breaker.failures_at_open as f64,
                }),
                CircuitBreakerStatus::HalfOpen => Some(Breach {
                    level: AlertLevel::Warning,
                    value: health.consecutive_failures as f64,
                    threshold: health.circuit_breaker.failures_at_open as f64,
                }),
                CircuitBreakerStatus::Closed => None,
            },
            // Raised directly by the remediation scheduler, never by a threshold rule.
            AlertType::RemediationFailed => None,
        }
    }

    #[instrument(skip(self, connectors))]
    pub fn evaluate(&mut self, connectors: &[ConnectorHealth], now: DateTime<Utc>) -> AlertEvaluation {
        let mut evaluation = AlertEvaluation::default();
        let rules = self.rules.clone();

        for health in connectors {
            for rule in &rules {
                let key = (health.connector_id.clone(), rule.alert_type);
                let breach = if health.maintenance {
                    None
                } else {
                    self.measure(rule, health, now)
                };

                match breach {
                    Some(breach) => {
                        let started = *self.breach_started.entry(key.clone()).or_insert(now);
                        if now - started < rule.sustain {
                            debug!(
                                connector_id = %health.connector_id,
                                alert_type = %rule.alert_type,
                                "breach not yet sustained"
                            );
                            continue;
                        }
                        self.open_or_refresh(health, rule, breach, now, &mut evaluation);
                    }
                    None => {
                        self.breach_started.remove(&key);
                        if let Some(alert) = self.active_mut(&health.connector_id, rule.alert_type) {
                            alert.resolved_at = Some(now);
                            alert.updated_at = Some(now);
                            info!(
                                alert_id = %alert.id,
                                connector_id = %alert.connector_id,
                                alert_type = %alert.alert_type,
                                "alert auto-resolved, condition cleared"
                            );
                            evaluation.resolved.push(alert.id);
                        }
                    }
                }
            }
        }

        evaluation
    }

    fn open_or_refresh(
        &mut self,
        health: &ConnectorHealth,
        rule: &AlertRule,
        breach: Breach,
        now: DateTime<Utc>,
        evaluation: &mut AlertEvaluation,
    ) {
        let message = describe(rule.alert_type, &breach);
        if let Some(alert) = self.active_mut(&health.connector_id, rule.alert_type) {
            if alert.level != breach.level {
                info!(
                    alert_id = %alert.id,
                    from = ?alert.level,
                    to = ?breach.level,
                    "alert level changed"
                );
            }
            alert.level = breach.level;
            alert.metric_value = breach.value;
            alert.threshold = breach.threshold;
            alert.message = message;
            alert.updated_at = Some(now);
            return;
        }

        let key = (health.connector_id.clone(), rule.alert_type);
        if let Some(last) = self.last_raised.get(&key) {
            if now - *last < rule.cooldown {
                debug!(
                    connector_id = %health.connector_id,
                    alert_type = %rule.alert_type,
                    "alert suppressed by cooldown"
                );
                return;
            }
        }

        let alert = self.create(health, rule.alert_type, breach, message, now);
        evaluation.raised.push(alert);
    }

    /// Raises an alert that is not driven by a threshold rule. An already-active alert
    /// for the same connector and type is returned instead of creating a duplicate.
    pub fn raise(
        &mut self,
        health: &ConnectorHealth,
        alert_type: AlertType,
        breach: Breach,
        message: String,
        now: DateTime<Utc>,
    ) -> (MonitoringAlert, bool) {
        if let Some(existing) = self.active(&health.connector_id, alert_type) {
            return (existing.clone(), false);
        }
        (self.create(health, alert_type, breach, message, now), true)
    }

    fn create(
        &mut self,
        health: &ConnectorHealth,
        alert_type: AlertType,
        breach: Breach,
        message: String,
        now: DateTime<Utc>,
    ) -> MonitoringAlert {
        let alert = MonitoringAlert {
            id: Uuid::new_v4(),
            connector_id: health.connector_id.clone(),
            source_id: health.source_id.clone(),
            level: breach.level,
            alert_type,
            title: title(alert_type, &health.name),
            message,
            action_items: action_items(alert_type),
            metric_value: breach.value,
            threshold: breach.threshold,
            timestamp: now,
            updated_at: None,
            acknowledged_at: None,
            resolved_at: None,
        };

        match alert.level {
            AlertLevel::Critical => {
                error!(
                    alert_id = %alert.id,
                    connector_id = %alert.connector_id,
                    alert_type = %alert.alert_type,
                    value = %alert.metric_value,
                    threshold = %alert.threshold,
                    "CRITICAL ALERT TRIGGERED: {}", alert.title
                );
            }
            AlertLevel::Warning => {
                warn!(
                    alert_id = %alert.id,
                    connector_id = %alert.connector_id,
                    value = %alert.metric_value,
                    "WARNING ALERT: {}", alert.title
                );
            }
            AlertLevel::Info => {
                info!(alert_id = %alert.id, "INFO ALERT: {}", alert.title);
            }
        }

        self.last_raised
            .insert((alert.connector_id.clone(), alert.alert_type), now);
        self.alerts.push(alert.clone());
        alert
    }

    pub fn acknowledge(&mut self, alert_id: Uuid, now: DateTime<Utc>) -> Result<MonitoringAlert, MonitoringError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| MonitoringError::AlertNotFound(alert_id.to_string()))?;
        if alert.acknowledged_at.is_none() {
            alert.acknowledged_at = Some(now);
            info!(alert_id = %alert_id, "alert acknowledged");
        }
        Ok(alert.clone())
    }

    pub fn resolve(&mut self, alert_id: Uuid, now: DateTime<Utc>) -> Result<MonitoringAlert, MonitoringError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| MonitoringError::AlertNotFound(alert_id.to_string()))?;
        if alert.resolved_at.is_none() {
            alert.resolved_at = Some(now);
            alert.updated_at = Some(now);
            info!(alert_id = %alert_id, "alert resolved");
        }
        Ok(alert.clone())
    }

    /// Resolves every active alert of one type for a connector.
    pub fn resolve_type(&mut self, connector_id: &str, alert_type: AlertType, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut resolved = Vec::new();
        for alert in self
            .alerts
            .iter_mut()
            .filter(|a| a.is_active() && a.connector_id == connector_id && a.alert_type == alert_type)
        {
            alert.resolved_at = Some(now);
            alert.updated_at = Some(now);
            resolved.push(alert.id);
        }
        resolved
    }

    pub fn active(&self, connector_id: &str, alert_type: AlertType) -> Option<&MonitoringAlert> {
        self.alerts
            .iter()
            .find(|a| a.is_active() && a.connector_id == connector_id && a.alert_type == alert_type)
    }

    fn active_mut(&mut self, connector_id: &str, alert_type: AlertType) -> Option<&mut MonitoringAlert> {
        self.alerts
            .iter_mut()
            .find(|a| a.is_active() && a.connector_id == connector_id && a.alert_type == alert_type)
    }

    /// Newest first.
    pub fn list(&self, filter: &AlertFilter) -> Vec<MonitoringAlert> {
        self.alerts
            .iter()
            .rev()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[MonitoringAlert] {
        &self.alerts
    }

    /// Drops resolved alerts older than the retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.alerts.len();
        self.alerts
            .retain(|alert| alert.is_active() || alert.timestamp >= cutoff);
        let pruned = before - self.alerts.len();
        if pruned > 0 {
            debug!(pruned, "alert history pruned");
        }
        pruned
    }

    pub fn restore(&mut self, mut alerts: Vec<MonitoringAlert>, now: DateTime<Utc>) {
        alerts.sort_by_key(|alert| alert.timestamp);
        for alert in &alerts {
            let key = (alert.connector_id.clone(), alert.alert_type);
            let last = self.last_raised.entry(key).or_insert(alert.timestamp);
            if alert.timestamp > *last {
                *last = alert.timestamp;
            }
        }
        self.alerts = alerts;
        self.prune(now);
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
        self.breach_started.clear();
        self.last_raised.clear();
    }
}

fn above(value: f64, warning: f64, critical: f64) -> Option<Breach> {
    if value > critical {
        Some(Breach { level: AlertLevel::Critical, value, threshold: critical })
    } else if value > warning {
        Some(Breach { level: AlertLevel::Warning, value, threshold: warning })
    } else {
        None
    }
}

fn below(value: f64, warning: f64, critical: f64) -> Option<Breach> {
    if value < critical {
        Some(Breach { level: AlertLevel::Critical, value, threshold: critical })
    } else if value < warning {
        Some(Breach { level: AlertLevel::Warning, value, threshold: warning })
    } else {
        None
    }
}

fn title(alert_type: AlertType, connector_name: &str) -> String {
    match alert_type {
        AlertType::ResponseTime => format!("Slow responses from {}", connector_name),
        AlertType::ErrorRate => format!("High error rate on {}", connector_name),
        AlertType::DataFreshness => format!("Stale data from {}", connector_name),
        AlertType::Uptime => format!("Low uptime for {}", connector_name),
        AlertType::CircuitBreaker => format!("Circuit breaker tripped for {}", connector_name),
        AlertType::RemediationFailed => format!("Automatic recovery failed for {}", connector_name),
    }
}

fn describe(alert_type: AlertType, breach: &Breach) -> String {
    match alert_type {
        AlertType::ResponseTime => format!(
            "Average response time {:.0}ms exceeds {:.0}ms",
            breach.value, breach.threshold
        ),
        AlertType::ErrorRate => format!(
            "Error rate {:.1}% exceeds {:.1}%",
            breach.value * 100.0,
            breach.threshold * 100.0
        ),
        AlertType::DataFreshness => format!(
            "No successful call for {:.1}h (limit {:.1}h)",
            breach.value, breach.threshold
        ),
        AlertType::Uptime => format!(
            "24h uptime {:.1}% is below {:.1}%",
            breach.value * 100.0,
            breach.threshold * 100.0
        ),
        AlertType::CircuitBreaker => format!(
            "Circuit breaker engaged after {:.0} consecutive failures",
            breach.threshold
        ),
        AlertType::RemediationFailed => format!(
            "Recovery gave up after {:.0} attempts",
            breach.value
        ),
    }
}

fn action_items(alert_type: AlertType) -> Vec<String> {
    let items: &[&str] = match alert_type {
        AlertType::ResponseTime => &[
            "Check the upstream API status page for latency incidents",
            "Reduce request payload size or page through results",
            "Serve cached data while latency is elevated",
        ],
        AlertType::ErrorRate => &[
            "Inspect recent error messages in the call log",
            "Verify API credentials and request parameters",
            "Implement exponential backoff retry",
        ],
        AlertType::DataFreshness => &[
            "Confirm the connector's sync schedule is still running",
            "Trigger a manual connector test",
            "Flag dependent views as showing stale data",
        ],
        AlertType::Uptime => &[
            "Review the outage window in the call log",
            "Check external service status",
            "Consider a fallback data source",
        ],
        AlertType::CircuitBreaker => &[
            "Wait for the breaker cool-down and half-open probe",
            "Check external service status",
            "Use cached data if available",
        ],
        AlertType::RemediationFailed => &[
            "Investigate the connector manually",
            "Contact the data provider",
            "Trigger remediation again once the root cause is fixed",
        ],
    };
    items.iter().map(|item| item.to_string()).collect()
}
