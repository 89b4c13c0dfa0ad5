// =====================================================================================
// MONITORING CELL - API HEALTH MONITORING & AUTO-REMEDIATION
// =====================================================================================
//
// This cell turns the outcomes of calls to external data connectors into operational
// state:
// - Per-connector health with rolling uptime and latency windows
// - Circuit breakers that stop hammering failing connectors
// - Threshold alerts with sustain windows, cooldowns and a lifecycle
// - Weighted quality scorecards per data source
// - Remediation jobs retried with exponential backoff and jitter
//
// =====================================================================================

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export commonly used types
pub use config::MonitoringConfig;
pub use models::{
    AlertLevel, AlertType, CallOutcome, CircuitBreakerStatus, ConnectorHealth, HealthStatus,
    MonitoringAlert, MonitoringError, OverallStatus, QualityScorecard, RemediationJob,
    RemediationReason, RemediationStatus, SystemSummary,
};

pub use services::{
    FileSnapshotStore, InMemorySnapshotStore, MonitoringService, RecoveryProbe, RetryMode,
    Scenario, ScriptedProbe, SimulatedProbe, SnapshotStore,
};

pub use handlers::MonitoringHandlers;
pub use router::create_monitoring_router;
