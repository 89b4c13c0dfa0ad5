// =====================================================================================
// MONITORING CELL MODELS
// =====================================================================================

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =====================================================================================
// CONNECTOR HEALTH
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Offline,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitBreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitBreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerStatus::Closed => write!(f, "closed"),
            CircuitBreakerStatus::Open => write!(f, "open"),
            CircuitBreakerStatus::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker bookkeeping persisted alongside the connector it protects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub status: CircuitBreakerStatus,
    /// When the breaker last moved to open.
    pub opened_at: Option<DateTime<Utc>>,
    /// When an open breaker becomes eligible for half-open.
    pub retry_at: Option<DateTime<Utc>>,
    /// Cool-down applied on the most recent open; grows on every failed trial.
    pub cooldown_secs: u64,
    /// Consecutive failures observed at the moment the breaker opened.
    pub failures_at_open: u32,
    #[serde(default)]
    pub trips: u32,
    #[serde(default)]
    pub trial_in_flight: bool,
}

impl CircuitBreakerState {
    pub fn closed(base_cooldown_secs: u64) -> Self {
        Self {
            status: CircuitBreakerStatus::Closed,
            opened_at: None,
            retry_at: None,
            cooldown_secs: base_cooldown_secs,
            failures_at_open: 0,
            trips: 0,
            trial_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitUsage {
    pub used: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorHealth {
    pub connector_id: String,
    pub source_id: String,
    pub name: String,
    pub status: HealthStatus,
    pub circuit_breaker: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub uptime_24h: f64,
    pub uptime_7d: f64,
    pub average_response_time_ms: f64,
    pub error_count_24h: u64,
    pub request_count_24h: u64,
    pub rate_limit: RateLimitUsage,
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub maintenance: bool,
}

impl ConnectorHealth {
    pub fn error_rate_24h(&self) -> f64 {
        if self.request_count_24h == 0 {
            0.0
        } else {
            self.error_count_24h as f64 / self.request_count_24h as f64
        }
    }
}

// =====================================================================================
// CALL LOG
// =====================================================================================

/// Raw outcome of one connector call, as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub connector_id: String,
    pub endpoint: String,
    pub success: bool,
    pub status_code: u16,
    /// Signed so that bogus negative latencies can be clamped instead of rejected.
    pub response_time_ms: i64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_attempt: u32,
}

impl CallOutcome {
    pub fn success(connector_id: &str, endpoint: &str, response_time_ms: i64) -> Self {
        Self {
            connector_id: connector_id.to_string(),
            endpoint: endpoint.to_string(),
            success: true,
            status_code: 200,
            response_time_ms,
            error_message: None,
            retry_attempt: 0,
        }
    }

    pub fn failure(connector_id: &str, endpoint: &str, status_code: u16, error: &str) -> Self {
        Self {
            connector_id: connector_id.to_string(),
            endpoint: endpoint.to_string(),
            success: false,
            status_code,
            response_time_ms: 0,
            error_message: Some(error.to_string()),
            retry_attempt: 0,
        }
    }

    pub fn with_response_time(mut self, response_time_ms: i64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub id: Uuid,
    pub connector_id: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub retry_attempt: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallLogQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// =====================================================================================
// ALERTS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    ResponseTime,
    ErrorRate,
    DataFreshness,
    Uptime,
    CircuitBreaker,
    RemediationFailed,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertType::ResponseTime => "response-time",
            AlertType::ErrorRate => "error-rate",
            AlertType::DataFreshness => "data-freshness",
            AlertType::Uptime => "uptime",
            AlertType::CircuitBreaker => "circuit-breaker",
            AlertType::RemediationFailed => "remediation-failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringAlert {
    pub id: Uuid,
    pub connector_id: String,
    pub source_id: String,
    pub level: AlertLevel,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub action_items: Vec<String>,
    pub metric_value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MonitoringAlert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertState {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub level: Option<AlertLevel>,
    pub connector_id: Option<String>,
    pub alert_type: Option<AlertType>,
    pub state: Option<AlertState>,
}

impl AlertFilter {
    pub fn active() -> Self {
        Self {
            state: Some(AlertState::Active),
            ..Self::default()
        }
    }

    pub fn matches(&self, alert: &MonitoringAlert) -> bool {
        if let Some(level) = self.level {
            if alert.level != level {
                return false;
            }
        }
        if let Some(connector_id) = &self.connector_id {
            if &alert.connector_id != connector_id {
                return false;
            }
        }
        if let Some(alert_type) = self.alert_type {
            if alert.alert_type != alert_type {
                return false;
            }
        }
        match self.state {
            Some(AlertState::Active) => alert.resolved_at.is_none(),
            Some(AlertState::Acknowledged) => {
                alert.acknowledged_at.is_some() && alert.resolved_at.is_none()
            }
            Some(AlertState::Resolved) => alert.resolved_at.is_some(),
            None => true,
        }
    }
}

/// Configured cut-offs; read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringThresholds {
    pub response_time_warning_ms: f64,
    pub response_time_critical_ms: f64,
    pub error_rate_warning: f64,
    pub error_rate_critical: f64,
    pub freshness_warning_hours: f64,
    pub freshness_critical_hours: f64,
    pub uptime_warning: f64,
    pub uptime_critical: f64,
    pub cooldown_minutes: u64,
}

impl Default for MonitoringThresholds {
    fn default() -> Self {
        Self {
            response_time_warning_ms: 2_000.0,
            response_time_critical_ms: 5_000.0,
            error_rate_warning: 0.10,
            error_rate_critical: 0.30,
            freshness_warning_hours: 6.0,
            freshness_critical_hours: 24.0,
            uptime_warning: 0.95,
            uptime_critical: 0.90,
            cooldown_minutes: 15,
        }
    }
}

// =====================================================================================
// QUALITY SCORECARDS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScorecardPeriod {
    Daily,
    Weekly,
}

impl FromStr for ScorecardPeriod {
    type Err = MonitoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" | "24h" => Ok(ScorecardPeriod::Daily),
            "weekly" | "week" | "7d" => Ok(ScorecardPeriod::Weekly),
            other => Err(MonitoringError::InvalidInput(format!("Unknown scorecard period: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub availability: f64,
    pub freshness: f64,
    pub performance: f64,
    pub accuracy: f64,
    pub completeness: f64,
    pub consistency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScorecard {
    pub source_id: String,
    pub period: ScorecardPeriod,
    pub period_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub connector_ids: Vec<String>,
    pub scores: SubScores,
    pub overall: f64,
    pub previous_overall: Option<f64>,
    pub trend: TrendDirection,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorecardQuery {
    pub period: Option<String>,
}

// =====================================================================================
// REMEDIATION JOBS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RemediationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RemediationStatus::Pending | RemediationStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationReason {
    CircuitBreakerOpen,
    CriticalAlert,
    ManualTrigger,
}

impl fmt::Display for RemediationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationReason::CircuitBreakerOpen => write!(f, "circuit-breaker-open"),
            RemediationReason::CriticalAlert => write!(f, "critical-alert"),
            RemediationReason::ManualTrigger => write!(f, "manual-trigger"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationJob {
    pub id: Uuid,
    pub connector_id: String,
    pub source_id: String,
    pub reason: RemediationReason,
    pub status: RemediationStatus,
    pub attempts: Vec<RemediationAttempt>,
    pub current_backoff_ms: u64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_duration_ms: Option<u64>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub connector_id: Option<String>,
    pub status: Option<RemediationStatus>,
}

impl JobFilter {
    pub fn matches(&self, job: &RemediationJob) -> bool {
        self.connector_id.as_ref().map_or(true, |id| &job.connector_id == id)
            && self.status.map_or(true, |status| job.status == status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRemediationRequest {
    pub connector_id: String,
    pub source_id: Option<String>,
    pub reason: Option<RemediationReason>,
}

// =====================================================================================
// SUMMARY & SNAPSHOTS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorCounts {
    pub total: u32,
    pub healthy: u32,
    pub degraded: u32,
    pub offline: u32,
    pub maintenance: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub critical: u32,
    pub warning: u32,
    pub info: u32,
    pub unacknowledged: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub total_requests_24h: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCounts {
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSummary {
    pub overall_status: OverallStatus,
    pub connectors: ConnectorCounts,
    pub alerts: AlertCounts,
    pub performance: PerformanceSummary,
    pub remediation: JobCounts,
    pub generated_at: DateTime<Utc>,
}

/// Full-state payload delivered to subscribers after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSnapshot {
    pub version: u64,
    pub summary: SystemSummary,
    pub health: Vec<ConnectorHealth>,
    pub active_alerts: Vec<MonitoringAlert>,
    pub jobs: Vec<RemediationJob>,
}

/// Durable state written under a single storage key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub health: HashMap<String, ConnectorHealth>,
    #[serde(default)]
    pub alerts: Vec<MonitoringAlert>,
    #[serde(default)]
    pub call_log: Vec<CallLogEntry>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

// Request/Response models
#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioQuery {
    pub connector_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub connector_id: String,
    pub outcomes_submitted: usize,
    pub health: ConnectorHealth,
}

#[derive(Debug, Serialize)]
pub struct ClearJobsResponse {
    pub cleared: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("Connector not found: {0}")]
    ConnectorNotFound(String),
    #[error("Alert not found: {0}")]
    AlertNotFound(String),
    #[error("Remediation job not found: {0}")]
    JobNotFound(String),
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}
