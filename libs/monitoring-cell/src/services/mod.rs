pub mod alerts;
pub mod circuit_breaker;
pub mod health;
pub mod monitor;
pub mod notifier;
pub mod persistence;
pub mod probe;
pub mod recorder;
pub mod remediation;
pub mod scenarios;
pub mod scorecard;

pub use alerts::AlertEngine;
pub use circuit_breaker::CircuitBreaker;
pub use health::HealthTracker;
pub use monitor::{MonitoringService, MonitoringServiceBuilder, RetryMode};
pub use notifier::{ChangeNotifier, Subscription};
pub use persistence::{FileSnapshotStore, InMemorySnapshotStore, PersistenceError, SnapshotStore};
pub use probe::{ProbeOutcome, RecoveryProbe, ScriptedProbe, SimulatedProbe};
pub use recorder::CallRecorder;
pub use remediation::RemediationScheduler;
pub use scenarios::Scenario;
pub use scorecard::ScorecardCalculator;
