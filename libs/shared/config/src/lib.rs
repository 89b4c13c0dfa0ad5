use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

const DEFAULT_CONNECTORS: &str =
    "usda-api:usda:USDA FoodData API,bls-api:bls:BLS Price Index API,census-api:census:Census ACS API";

/// One monitored connector as declared in `MONITOR_CONNECTORS` (`id:source:name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connector_id: String,
    pub source_id: String,
    pub name: String,
    pub rate_limit_per_hour: u32,
}

impl ConnectorConfig {
    pub fn new(connector_id: &str, source_id: &str, name: &str) -> Self {
        Self {
            connector_id: connector_id.to_string(),
            source_id: source_id.to_string(),
            name: name.to_string(),
            rate_limit_per_hour: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub connectors: Vec<ConnectorConfig>,
    pub tick_interval_secs: u64,

    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub breaker_max_cooldown_secs: u64,

    pub remediation_base_backoff_ms: u64,
    pub remediation_max_backoff_ms: u64,
    pub remediation_max_attempts: u32,
    pub remediation_jitter_ratio: f64,
    pub remediation_jitter_seed: Option<u64>,

    pub threshold_response_time_warning_ms: f64,
    pub threshold_response_time_critical_ms: f64,
    pub threshold_error_rate_warning: f64,
    pub threshold_error_rate_critical: f64,
    pub threshold_freshness_warning_hours: f64,
    pub threshold_freshness_critical_hours: f64,
    pub threshold_uptime_warning: f64,
    pub threshold_uptime_critical: f64,
    pub threshold_cooldown_minutes: u64,

    pub snapshot_dir: Option<String>,
    pub simulated_probe_success_rate: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            connectors: parse_connectors(DEFAULT_CONNECTORS),
            tick_interval_secs: 30,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
            breaker_max_cooldown_secs: 900,
            remediation_base_backoff_ms: 1_000,
            remediation_max_backoff_ms: 60_000,
            remediation_max_attempts: 5,
            remediation_jitter_ratio: 0.2,
            remediation_jitter_seed: None,
            threshold_response_time_warning_ms: 2_000.0,
            threshold_response_time_critical_ms: 5_000.0,
            threshold_error_rate_warning: 0.10,
            threshold_error_rate_critical: 0.30,
            threshold_freshness_warning_hours: 6.0,
            threshold_freshness_critical_hours: 24.0,
            threshold_uptime_warning: 0.95,
            threshold_uptime_critical: 0.90,
            threshold_cooldown_minutes: 15,
            snapshot_dir: None,
            simulated_probe_success_rate: 0.7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let connectors = match env::var("MONITOR_CONNECTORS") {
            Ok(raw) => {
                let parsed = parse_connectors(&raw);
                if parsed.is_empty() {
                    warn!("MONITOR_CONNECTORS has no valid entries, using defaults");
                    defaults.connectors.clone()
                } else {
                    parsed
                }
            }
            Err(_) => {
                warn!("MONITOR_CONNECTORS not set, using default connector set");
                defaults.connectors.clone()
            }
        };

        let config = Self {
            bind_addr: env::var("MONITOR_BIND_ADDR").unwrap_or_else(|_| {
                warn!("MONITOR_BIND_ADDR not set, using default");
                defaults.bind_addr.clone()
            }),
            connectors,
            tick_interval_secs: env_or("MONITOR_TICK_INTERVAL_SECS", defaults.tick_interval_secs),

            breaker_failure_threshold: env_or(
                "MONITOR_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_cooldown_secs: env_or("MONITOR_BREAKER_COOLDOWN_SECS", defaults.breaker_cooldown_secs),
            breaker_max_cooldown_secs: env_or(
                "MONITOR_BREAKER_MAX_COOLDOWN_SECS",
                defaults.breaker_max_cooldown_secs,
            ),

            remediation_base_backoff_ms: env_or(
                "MONITOR_REMEDIATION_BASE_BACKOFF_MS",
                defaults.remediation_base_backoff_ms,
            ),
            remediation_max_backoff_ms: env_or(
                "MONITOR_REMEDIATION_MAX_BACKOFF_MS",
                defaults.remediation_max_backoff_ms,
            ),
            remediation_max_attempts: env_or(
                "MONITOR_REMEDIATION_MAX_ATTEMPTS",
                defaults.remediation_max_attempts,
            ),
            remediation_jitter_ratio: env_or(
                "MONITOR_REMEDIATION_JITTER_RATIO",
                defaults.remediation_jitter_ratio,
            ),
            remediation_jitter_seed: env::var("MONITOR_REMEDIATION_JITTER_SEED")
                .ok()
                .and_then(|raw| raw.parse().ok()),

            threshold_response_time_warning_ms: env_or(
                "MONITOR_THRESHOLD_RESPONSE_TIME_WARNING_MS",
                defaults.threshold_response_time_warning_ms,
            ),
            threshold_response_time_critical_ms: env_or(
                "MONITOR_THRESHOLD_RESPONSE_TIME_CRITICAL_MS",
                defaults.threshold_response_time_critical_ms,
            ),
            threshold_error_rate_warning: env_or(
                "MONITOR_THRESHOLD_ERROR_RATE_WARNING",
                defaults.threshold_error_rate_warning,
            ),
            threshold_error_rate_critical: env_or(
                "MONITOR_THRESHOLD_ERROR_RATE_CRITICAL",
                defaults.threshold_error_rate_critical,
            ),
            threshold_freshness_warning_hours: env_or(
                "MONITOR_THRESHOLD_FRESHNESS_WARNING_HOURS",
                defaults.threshold_freshness_warning_hours,
            ),
            threshold_freshness_critical_hours: env_or(
                "MONITOR_THRESHOLD_FRESHNESS_CRITICAL_HOURS",
                defaults.threshold_freshness_critical_hours,
            ),
            threshold_uptime_warning: env_or(
                "MONITOR_THRESHOLD_UPTIME_WARNING",
                defaults.threshold_uptime_warning,
            ),
            threshold_uptime_critical: env_or(
                "MONITOR_THRESHOLD_UPTIME_CRITICAL",
                defaults.threshold_uptime_critical,
            ),
            threshold_cooldown_minutes: env_or(
                "MONITOR_THRESHOLD_COOLDOWN_MINUTES",
                defaults.threshold_cooldown_minutes,
            ),

            snapshot_dir: env::var("MONITOR_SNAPSHOT_DIR").ok().filter(|dir| !dir.is_empty()),
            simulated_probe_success_rate: env_or(
                "MONITOR_SIMULATED_PROBE_SUCCESS_RATE",
                defaults.simulated_probe_success_rate,
            ),
        };

        if !config.is_persistent() {
            warn!("MONITOR_SNAPSHOT_DIR not set - monitoring state will not survive restarts");
        }

        config
    }

    pub fn is_persistent(&self) -> bool {
        self.snapshot_dir.is_some()
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Parses `id:source:name` entries separated by commas. Entries missing an id are skipped;
/// a missing source defaults to the id and a missing name defaults to the id.
pub fn parse_connectors(raw: &str) -> Vec<ConnectorConfig> {
    raw.split(',')
        .filter_map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            let id = parts.next().map(str::trim).filter(|id| !id.is_empty())?;
            let source = parts.next().map(str::trim).filter(|s| !s.is_empty()).unwrap_or(id);
            let name = parts.next().map(str::trim).filter(|n| !n.is_empty()).unwrap_or(id);
            Some(ConnectorConfig::new(id, source, name))
        })
        .collect()
}
