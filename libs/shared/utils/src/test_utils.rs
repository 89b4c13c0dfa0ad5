use std::sync::Arc;
use chrono::{DateTime, TimeZone, Utc};

use shared_config::{AppConfig, ConnectorConfig};

use crate::clock::ManualClock;

/// Test-friendly configuration: three connectors, no persistence, no jitter,
/// short breaker cool-downs.
pub struct TestConfig {
    pub connectors: Vec<ConnectorConfig>,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub remediation_max_attempts: u32,
    pub jitter_ratio: f64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            connectors: vec![
                ConnectorConfig::new("usda-api", "usda", "USDA FoodData API"),
                ConnectorConfig::new("bls-api", "bls", "BLS Price Index API"),
                ConnectorConfig::new("census-api", "census", "Census ACS API"),
            ],
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 60,
            remediation_max_attempts: 3,
            jitter_ratio: 0.0,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            connectors: self.connectors.clone(),
            breaker_failure_threshold: self.breaker_failure_threshold,
            breaker_cooldown_secs: self.breaker_cooldown_secs,
            remediation_max_attempts: self.remediation_max_attempts,
            remediation_jitter_ratio: self.jitter_ratio,
            remediation_jitter_seed: Some(42),
            snapshot_dir: None,
            ..AppConfig::default()
        }
    }
}

/// Fixed instant used as the starting point for deterministic tests.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(test_epoch()))
}
