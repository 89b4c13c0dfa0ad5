// =====================================================================================
// MONITORING ENGINE CONFIGURATION
// =====================================================================================

use std::time::Duration;

use shared_config::{AppConfig, ConnectorConfig};

use crate::models::{AlertType, MonitoringThresholds};

pub const CALL_LOG_MAX_ENTRIES: usize = 1000;
pub const CALL_LOG_MAX_AGE_DAYS: i64 = 7;
pub const ALERT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
    /// Multiplier applied to the cool-down each time a half-open trial fails.
    pub cooldown_multiplier: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(900),
            cooldown_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemediationConfig {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
    /// Jitter applied as `delay * (1 ± ratio)`; zero disables jitter.
    pub jitter_ratio: f64,
    pub jitter_seed: Option<u64>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_attempts: 5,
            jitter_ratio: 0.2,
            jitter_seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub call_log_max_entries: usize,
    pub call_log_max_age: chrono::Duration,
    pub alert_history: chrono::Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            call_log_max_entries: CALL_LOG_MAX_ENTRIES,
            call_log_max_age: chrono::Duration::days(CALL_LOG_MAX_AGE_DAYS),
            alert_history: chrono::Duration::days(ALERT_RETENTION_DAYS),
        }
    }
}

/// A threshold rule evaluated for every connector on each pass.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub alert_type: AlertType,
    /// How long the breach must hold before an alert opens.
    pub sustain: chrono::Duration,
    /// Minimum gap between two raises for the same connector.
    pub cooldown: chrono::Duration,
    /// Calls required in the 24h window before ratio-based rules apply.
    pub min_samples: u64,
}

pub fn default_alert_rules(thresholds: &MonitoringThresholds) -> Vec<AlertRule> {
    let cooldown = chrono::Duration::minutes(thresholds.cooldown_minutes as i64);
    vec![
        AlertRule {
            alert_type: AlertType::ResponseTime,
            sustain: chrono::Duration::minutes(5),
            cooldown,
            min_samples: 3,
        },
        AlertRule {
            alert_type: AlertType::ErrorRate,
            sustain: chrono::Duration::minutes(2),
            cooldown,
            min_samples: 10,
        },
        AlertRule {
            alert_type: AlertType::DataFreshness,
            sustain: chrono::Duration::zero(),
            cooldown,
            min_samples: 0,
        },
        AlertRule {
            alert_type: AlertType::Uptime,
            sustain: chrono::Duration::minutes(10),
            cooldown,
            min_samples: 10,
        },
        AlertRule {
            alert_type: AlertType::CircuitBreaker,
            sustain: chrono::Duration::zero(),
            cooldown,
            min_samples: 0,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub connectors: Vec<ConnectorConfig>,
    pub thresholds: MonitoringThresholds,
    pub alert_rules: Vec<AlertRule>,
    pub breaker: BreakerConfig,
    pub remediation: RemediationConfig,
    pub retention: RetentionConfig,
    pub tick_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl MonitoringConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let thresholds = MonitoringThresholds {
            response_time_warning_ms: config.threshold_response_time_warning_ms,
            response_time_critical_ms: config.threshold_response_time_critical_ms,
            error_rate_warning: config.threshold_error_rate_warning,
            error_rate_critical: config.threshold_error_rate_critical,
            freshness_warning_hours: config.threshold_freshness_warning_hours,
            freshness_critical_hours: config.threshold_freshness_critical_hours,
            uptime_warning: config.threshold_uptime_warning,
            uptime_critical: config.threshold_uptime_critical,
            cooldown_minutes: config.threshold_cooldown_minutes,
        };

        Self {
            connectors: config.connectors.clone(),
            alert_rules: default_alert_rules(&thresholds),
            thresholds,
            breaker: BreakerConfig {
                failure_threshold: config.breaker_failure_threshold.max(1),
                base_cooldown: Duration::from_secs(config.breaker_cooldown_secs),
                max_cooldown: Duration::from_secs(
                    config.breaker_max_cooldown_secs.max(config.breaker_cooldown_secs),
                ),
                cooldown_multiplier: 2,
            },
            remediation: RemediationConfig {
                base_backoff_ms: config.remediation_base_backoff_ms,
                max_backoff_ms: config
                    .remediation_max_backoff_ms
                    .max(config.remediation_base_backoff_ms),
                max_attempts: config.remediation_max_attempts.max(1),
                jitter_ratio: config.remediation_jitter_ratio.clamp(0.0, 1.0),
                jitter_seed: config.remediation_jitter_seed,
            },
            retention: RetentionConfig::default(),
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_app_config_sanitizes_values() {
        let app = AppConfig {
            breaker_failure_threshold: 0,
            breaker_cooldown_secs: 120,
            breaker_max_cooldown_secs: 30,
            remediation_jitter_ratio: 3.5,
            remediation_max_attempts: 0,
            ..AppConfig::default()
        };

        let config = MonitoringConfig::from_app_config(&app);
        assert_eq!(config.breaker.failure_threshold, 1);
        assert_eq!(config.breaker.max_cooldown, Duration::from_secs(120));
        assert_eq!(config.remediation.jitter_ratio, 1.0);
        assert_eq!(config.remediation.max_attempts, 1);
    }

    #[test]
    fn test_default_rules_cover_threshold_metrics() {
        let rules = default_alert_rules(&MonitoringThresholds::default());
        let types: Vec<AlertType> = rules.iter().map(|r| r.alert_type).collect();
        assert!(types.contains(&AlertType::ErrorRate));
        assert!(types.contains(&AlertType::ResponseTime));
        assert!(types.contains(&AlertType::DataFreshness));
        assert!(types.contains(&AlertType::Uptime));
        assert!(types.contains(&AlertType::CircuitBreaker));
        assert!(rules.iter().all(|r| r.cooldown == chrono::Duration::minutes(15)));
    }
}
