// =====================================================================================
// MONITORING FACADE
// =====================================================================================
//
// Single owner of all monitoring state. Every command takes the state lock, mutates
// synchronously, releases it, and then publishes a full snapshot to subscribers.
// Recovery probes are awaited with the lock released; their results are re-applied
// under the lock and discarded if the job was cancelled or the engine reset meanwhile.
//
// =====================================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_utils::clock::{SharedClock, SystemClock};

use crate::config::MonitoringConfig;
use crate::models::{
    AlertCounts, AlertFilter, AlertLevel, AlertType, CallLogEntry, CallOutcome, CircuitBreakerStatus,
    ConnectorCounts,
    ConnectorHealth, HealthStatus, JobCounts, JobFilter, MonitoringAlert, MonitoringError,
    MonitoringSnapshot, OverallStatus, PerformanceSummary, PersistedState, QualityScorecard,
    RemediationAttempt, RemediationJob, RemediationReason, RemediationStatus, ScenarioReport,
    ScorecardPeriod, SystemSummary,
};
use crate::services::alerts::{AlertEngine, Breach};
use crate::services::circuit_breaker::{BreakerTransition, CircuitBreaker};
use crate::services::health::HealthTracker;
use crate::services::notifier::{ChangeNotifier, SnapshotReceiver, Subscription};
use crate::services::persistence::SnapshotStore;
use crate::services::probe::{RecoveryProbe, RECOVERY_ENDPOINT};
use crate::services::recorder::CallRecorder;
use crate::services::remediation::{AttemptDecision, RemediationScheduler};
use crate::services::scenarios::{Scenario, DEFAULT_SCENARIO_CONNECTOR};
use crate::services::scorecard::ScorecardCalculator;

pub const MANUAL_TEST_ENDPOINT: &str = "manual-test";

/// How remediation retries are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Each due attempt gets its own tokio timer.
    Timers,
    /// Due attempts run only from `tick` or `run_due_remediations`.
    Manual,
}

// =====================================================================================
// STATE
// =====================================================================================

struct MonitoringState {
    recorder: CallRecorder,
    tracker: HealthTracker,
    alerts: AlertEngine,
    scorecards: ScorecardCalculator,
    scheduler: RemediationScheduler,
    in_flight: HashSet<Uuid>,
    /// Bumped by `reset`; probe results from an older generation are dropped.
    generation: u64,
}

impl MonitoringState {
    fn new(config: &MonitoringConfig) -> Self {
        Self {
            recorder: CallRecorder::new(&config.retention),
            tracker: HealthTracker::new(
                &config.connectors,
                CircuitBreaker::new(config.breaker.clone()),
                config.thresholds.clone(),
            ),
            alerts: AlertEngine::new(
                config.alert_rules.clone(),
                config.thresholds.clone(),
                config.retention.alert_history,
            ),
            scorecards: ScorecardCalculator::new(config.thresholds.clone()),
            scheduler: RemediationScheduler::new(config.remediation.clone()),
            in_flight: HashSet::new(),
            generation: 0,
        }
    }

    /// Records, observes and evaluates one outcome. Returns newly created jobs.
    fn apply_outcome(&mut self, outcome: &CallOutcome, now: DateTime<Utc>) -> Vec<RemediationJob> {
        let entry = self.recorder.record(outcome, now);
        let mut created = Vec::new();

        if let Some(change) = self.tracker.observe(&entry, &self.recorder, now) {
            if change.previous_status != change.status {
                info!(
                    connector_id = %change.connector_id,
                    from = ?change.previous_status,
                    to = ?change.status,
                    "connector status changed"
                );
            }
            // Only a fresh trip starts remediation; a failed half-open trial belongs to
            // the job that is already running.
            if change.transition == Some(BreakerTransition::Opened) {
                created.extend(self.trigger(
                    &change.connector_id,
                    RemediationReason::CircuitBreakerOpen,
                    now,
                ));
            }
        }

        created.extend(self.evaluate_alerts(now));
        created
    }

    fn evaluate_alerts(&mut self, now: DateTime<Utc>) -> Vec<RemediationJob> {
        let health = self.tracker.list();
        let evaluation = self.alerts.evaluate(&health, now);
        if !evaluation.resolved.is_empty() {
            debug!(resolved = evaluation.resolved.len(), "alerts auto-resolved");
        }

        evaluation
            .raised
            .iter()
            .filter(|alert| alert.level == AlertLevel::Critical)
            .filter_map(|alert| self.trigger(&alert.connector_id, RemediationReason::CriticalAlert, now))
            .collect()
    }

    /// Creates a job unless one is active or the connector is in maintenance.
    fn trigger(
        &mut self,
        connector_id: &str,
        reason: RemediationReason,
        now: DateTime<Utc>,
    ) -> Option<RemediationJob> {
        let health = self.tracker.get(connector_id)?;
        if health.maintenance {
            debug!(connector_id = %connector_id, "connector in maintenance, remediation skipped");
            return None;
        }
        let source_id = health.source_id.clone();
        let (job, created) = self.scheduler.trigger(connector_id, &source_id, reason, now);
        created.then_some(job)
    }

    fn persisted(&self, now: DateTime<Utc>) -> PersistedState {
        PersistedState {
            health: self.tracker.snapshot(),
            alerts: self.alerts.all().to_vec(),
            call_log: self.recorder.snapshot(),
            saved_at: Some(now),
        }
    }

    fn summary(&self, now: DateTime<Utc>) -> SystemSummary {
        let mut connectors = ConnectorCounts::default();
        let mut requests = 0u64;
        let mut errors = 0u64;
        let mut weighted_latency = 0.0;

        for health in self.tracker.iter() {
            connectors.total += 1;
            match health.status {
                HealthStatus::Healthy => connectors.healthy += 1,
                HealthStatus::Degraded => connectors.degraded += 1,
                HealthStatus::Offline => connectors.offline += 1,
                HealthStatus::Maintenance => connectors.maintenance += 1,
            }
            requests += health.request_count_24h;
            errors += health.error_count_24h;
            weighted_latency += health.average_response_time_ms * health.request_count_24h as f64;
        }

        let mut alerts = AlertCounts::default();
        for alert in self.alerts.all().iter().filter(|alert| alert.is_active()) {
            match alert.level {
                AlertLevel::Critical => alerts.critical += 1,
                AlertLevel::Warning => alerts.warning += 1,
                AlertLevel::Info => alerts.info += 1,
            }
            if alert.acknowledged_at.is_none() {
                alerts.unacknowledged += 1;
            }
        }

        let mut remediation = JobCounts::default();
        for job in self.scheduler.all() {
            match job.status {
                RemediationStatus::Pending | RemediationStatus::Running => remediation.active += 1,
                RemediationStatus::Success => remediation.succeeded += 1,
                RemediationStatus::Failed => remediation.failed += 1,
            }
        }

        let performance = PerformanceSummary {
            success_rate: if requests == 0 {
                1.0
            } else {
                (requests - errors) as f64 / requests as f64
            },
            avg_response_time_ms: if requests == 0 {
                0.0
            } else {
                weighted_latency / requests as f64
            },
            total_requests_24h: requests,
        };

        SystemSummary {
            overall_status: overall_status(&connectors, &alerts),
            connectors,
            alerts,
            performance,
            remediation,
            generated_at: now,
        }
    }
}

/// Critical when most non-maintenance connectors are offline; degraded when anything is
/// unhealthy or a critical alert is open.
pub fn overall_status(connectors: &ConnectorCounts, alerts: &AlertCounts) -> OverallStatus {
    let monitored = connectors.total.saturating_sub(connectors.maintenance);
    if monitored > 0 && connectors.offline * 2 > monitored {
        OverallStatus::Critical
    } else if connectors.degraded > 0 || connectors.offline > 0 || alerts.critical > 0 {
        OverallStatus::Degraded
    } else {
        OverallStatus::Healthy
    }
}

// =====================================================================================
// SERVICE
// =====================================================================================

struct Inner {
    config: MonitoringConfig,
    state: RwLock<MonitoringState>,
    clock: SharedClock,
    probe: Arc<dyn RecoveryProbe>,
    store: Option<Arc<dyn SnapshotStore>>,
    notifier: ChangeNotifier,
    retry_mode: RetryMode,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
    ticking: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        if let Some(task) = self
            .tick_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

pub struct MonitoringServiceBuilder {
    config: MonitoringConfig,
    probe: Arc<dyn RecoveryProbe>,
    clock: SharedClock,
    store: Option<Arc<dyn SnapshotStore>>,
    retry_mode: RetryMode,
}

impl MonitoringServiceBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn retry_mode(mut self, retry_mode: RetryMode) -> Self {
        self.retry_mode = retry_mode;
        self
    }

    pub fn build(self) -> MonitoringService {
        let state = MonitoringState::new(&self.config);
        let (shutdown, _) = watch::channel(false);
        info!(
            connectors = self.config.connectors.len(),
            retry_mode = ?self.retry_mode,
            persistent = self.store.is_some(),
            "monitoring service created"
        );
        MonitoringService {
            inner: Arc::new(Inner {
                config: self.config,
                state: RwLock::new(state),
                clock: self.clock,
                probe: self.probe,
                store: self.store,
                notifier: ChangeNotifier::new(),
                retry_mode: self.retry_mode,
                timers: Mutex::new(HashMap::new()),
                tick_task: Mutex::new(None),
                ticking: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// Builds the service and adopts the persisted snapshot, if any.
    pub async fn build_and_restore(self) -> MonitoringService {
        let service = self.build();
        service.restore().await;
        service
    }
}

#[derive(Clone)]
pub struct MonitoringService {
    inner: Arc<Inner>,
}

impl MonitoringService {
    pub fn builder(config: MonitoringConfig, probe: Arc<dyn RecoveryProbe>) -> MonitoringServiceBuilder {
        MonitoringServiceBuilder {
            config,
            probe,
            clock: Arc::new(SystemClock),
            store: None,
            retry_mode: RetryMode::Timers,
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.inner.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =================================================================================
    // OUTCOMES
    // =================================================================================

    /// Entry point for every call outcome the host observes.
    #[instrument(skip(self, outcome), fields(connector_id = %outcome.connector_id))]
    pub async fn submit_outcome(&self, outcome: CallOutcome) -> Result<ConnectorHealth, MonitoringError> {
        let now = self.now();
        let (health, created) = {
            let mut state = self.inner.state.write().await;
            if !state.tracker.contains(&outcome.connector_id) {
                warn!("outcome for unknown connector rejected");
                return Err(MonitoringError::ConnectorNotFound(outcome.connector_id));
            }
            let created = state.apply_outcome(&outcome, now);
            let health = state
                .tracker
                .get(&outcome.connector_id)
                .cloned()
                .ok_or_else(|| MonitoringError::ConnectorNotFound(outcome.connector_id.clone()))?;
            (health, created)
        };

        for job in &created {
            self.schedule(job.id, Duration::zero());
        }
        self.notify().await;
        Ok(health)
    }

    // =================================================================================
    // QUERIES
    // =================================================================================

    pub async fn get_health(&self, connector_id: &str) -> Option<ConnectorHealth> {
        self.inner.state.read().await.tracker.get(connector_id).cloned()
    }

    pub async fn list_health(&self) -> Vec<ConnectorHealth> {
        self.inner.state.read().await.tracker.list()
    }

    pub async fn get_alerts(&self, filter: &AlertFilter) -> Vec<MonitoringAlert> {
        self.inner.state.read().await.alerts.list(filter)
    }

    /// Newest first.
    pub async fn query_calls(&self, limit: usize, offset: usize) -> Vec<CallLogEntry> {
        self.inner
            .state
            .read()
            .await
            .recorder
            .query(limit, offset)
            .cloned()
            .collect()
    }

    pub async fn get_scorecard(&self, source_id: &str, period: ScorecardPeriod) -> Option<QualityScorecard> {
        let now = self.now();
        let mut guard = self.inner.state.write().await;
        let state = &mut *guard;
        state
            .scorecards
            .compute(source_id, period, state.tracker.iter(), &state.recorder, now)
    }

    pub async fn get_system_summary(&self) -> SystemSummary {
        let now = self.now();
        self.inner.state.read().await.summary(now)
    }

    pub async fn get_jobs(&self, filter: &JobFilter) -> Vec<RemediationJob> {
        self.inner.state.read().await.scheduler.list(filter)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<RemediationJob> {
        self.inner.state.read().await.scheduler.get(job_id).cloned()
    }

    pub async fn snapshot(&self) -> MonitoringSnapshot {
        let now = self.now();
        let state = self.inner.state.read().await;
        MonitoringSnapshot {
            version: self.inner.notifier.next_version(),
            summary: state.summary(now),
            health: state.tracker.list(),
            active_alerts: state.alerts.list(&AlertFilter::active()),
            jobs: state.scheduler.list(&JobFilter::default()),
        }
    }

    // =================================================================================
    // ALERT COMMANDS
    // =================================================================================

    #[instrument(skip(self))]
    pub async fn acknowledge_alert(&self, alert_id: Uuid) -> Result<MonitoringAlert, MonitoringError> {
        let now = self.now();
        let alert = self.inner.state.write().await.alerts.acknowledge(alert_id, now)?;
        self.notify().await;
        Ok(alert)
    }

    #[instrument(skip(self))]
    pub async fn resolve_alert(&self, alert_id: Uuid) -> Result<MonitoringAlert, MonitoringError> {
        let now = self.now();
        let alert = self.inner.state.write().await.alerts.resolve(alert_id, now)?;
        self.notify().await;
        Ok(alert)
    }

    // =================================================================================
    // CONNECTOR COMMANDS
    // =================================================================================

    #[instrument(skip(self))]
    pub async fn set_maintenance(&self, connector_id: &str, enabled: bool) -> Result<ConnectorHealth, MonitoringError> {
        let now = self.now();
        let (health, created) = {
            let mut state = self.inner.state.write().await;
            let health = state
                .tracker
                .set_maintenance(connector_id, enabled)
                .ok_or_else(|| MonitoringError::ConnectorNotFound(connector_id.to_string()))?;
            // Maintenance clears this connector's alerts. Leaving it re-evaluates them, and a
            // critical breach found there starts a job like any other.
            let created = state.evaluate_alerts(now);
            (health, created)
        };
        for job in &created {
            self.schedule(job.id, Duration::zero());
        }
        self.notify().await;
        Ok(health)
    }

    /// Probes the connector once and feeds the result through the normal outcome path.
    #[instrument(skip(self))]
    pub async fn test_connector(&self, connector_id: &str) -> Result<ConnectorHealth, MonitoringError> {
        if self.get_health(connector_id).await.is_none() {
            return Err(MonitoringError::ConnectorNotFound(connector_id.to_string()));
        }
        let probe = self.inner.probe.probe(connector_id, MANUAL_TEST_ENDPOINT).await;
        info!(success = probe.success, status_code = probe.status_code, "manual connector test finished");
        self.submit_outcome(CallOutcome {
            connector_id: connector_id.to_string(),
            endpoint: MANUAL_TEST_ENDPOINT.to_string(),
            success: probe.success,
            status_code: probe.status_code,
            response_time_ms: probe.response_time_ms as i64,
            error_message: probe.error_message,
            retry_attempt: 0,
        })
        .await
    }

    // =================================================================================
    // REMEDIATION
    // =================================================================================

    /// Idempotent per connector: an active job is returned unchanged.
    #[instrument(skip(self))]
    pub async fn trigger_remediation(
        &self,
        connector_id: &str,
        source_id: Option<&str>,
        reason: RemediationReason,
    ) -> Result<RemediationJob, MonitoringError> {
        let now = self.now();
        let (job, created) = {
            let mut state = self.inner.state.write().await;
            let health = state
                .tracker
                .get(connector_id)
                .ok_or_else(|| MonitoringError::ConnectorNotFound(connector_id.to_string()))?;
            if let Some(source_id) = source_id {
                if source_id != health.source_id {
                    return Err(MonitoringError::InvalidInput(format!(
                        "Connector {} belongs to source {}, not {}",
                        connector_id, health.source_id, source_id
                    )));
                }
            }
            if health.maintenance {
                return Err(MonitoringError::InvalidInput(format!(
                    "Connector {} is in maintenance",
                    connector_id
                )));
            }
            let source_id = health.source_id.clone();
            state.scheduler.trigger(connector_id, &source_id, reason, now)
        };

        if created {
            self.schedule(job.id, Duration::zero());
            self.notify().await;
        }
        Ok(job)
    }

    /// Cancels the connector's active job and its pending timer.
    #[instrument(skip(self))]
    pub async fn cancel_remediation(&self, connector_id: &str) -> Result<RemediationJob, MonitoringError> {
        let now = self.now();
        let job = {
            let mut state = self.inner.state.write().await;
            let job = state.scheduler.cancel(connector_id, now)?;
            state.tracker.release_trial(connector_id);
            job
        };
        self.cancel_timer(job.id);
        self.notify().await;
        Ok(job)
    }

    pub async fn clear_completed_jobs(&self) -> usize {
        let cleared = self.inner.state.write().await.scheduler.clear_completed();
        if cleared > 0 {
            info!(cleared, "completed remediation jobs cleared");
            self.notify().await;
        }
        cleared
    }

    /// Runs every attempt that is due now. Returns how many attempts were started.
    pub async fn run_due_remediations(&self) -> usize {
        let now = self.now();
        let due = {
            let state = self.inner.state.read().await;
            state
                .scheduler
                .due_jobs(now)
                .into_iter()
                .filter(|job_id| !state.in_flight.contains(job_id))
                .collect::<Vec<_>>()
        };

        let mut started = 0;
        for job_id in due {
            if self.run_attempt(job_id).await {
                started += 1;
            }
        }
        started
    }

    /// One remediation attempt. Returns whether a probe was actually issued.
    #[instrument(skip(self))]
    async fn run_attempt(&self, job_id: Uuid) -> bool {
        let now = self.now();
        let retry_fallback = Duration::milliseconds(self.inner.config.remediation.base_backoff_ms as i64);

        let (connector_id, attempt, generation) = {
            let mut state = self.inner.state.write().await;
            let Some(job) = state.scheduler.get(job_id) else {
                return false;
            };
            if !job.status.is_active() || state.in_flight.contains(&job_id) {
                return false;
            }
            if job.next_retry_at.is_some_and(|retry_at| retry_at > now) {
                debug!(job_id = %job_id, "remediation attempt not yet due");
                return false;
            }
            let connector_id = job.connector_id.clone();

            let trial = state.tracker.begin_trial(&connector_id, now);
            match trial {
                None => return false,
                Some(false) => {
                    // Breaker still cooling down: wait for half-open without using up an attempt.
                    let retry_at = state
                        .tracker
                        .get(&connector_id)
                        .and_then(|health| health.circuit_breaker.retry_at)
                        .filter(|retry_at| *retry_at > now)
                        .unwrap_or(now + retry_fallback);
                    state.scheduler.defer(job_id, retry_at);
                    drop(state);
                    debug!(connector_id = %connector_id, retry_at = %retry_at, "remediation deferred until half-open");
                    self.schedule(job_id, retry_at - now);
                    self.notify().await;
                    return false;
                }
                Some(true) => {}
            }

            let Some(attempt) = state.scheduler.begin_attempt(job_id) else {
                state.tracker.release_trial(&connector_id);
                return false;
            };
            state.in_flight.insert(job_id);
            (connector_id, attempt, state.generation)
        };
        self.notify().await;

        info!(connector_id = %connector_id, attempt, "remediation attempt started");
        let probe = self.inner.probe.probe(&connector_id, RECOVERY_ENDPOINT).await;
        let finished = self.now();

        let (decision, created) = {
            let mut state = self.inner.state.write().await;
            state.in_flight.remove(&job_id);
            if state.generation != generation {
                debug!(connector_id = %connector_id, "engine reset during probe, outcome dropped");
                return true;
            }
            let still_active = state
                .scheduler
                .get(job_id)
                .is_some_and(|job| job.status.is_active());
            if !still_active {
                state.tracker.release_trial(&connector_id);
                debug!(connector_id = %connector_id, "job cancelled during probe, outcome dropped");
                return true;
            }

            let outcome = CallOutcome {
                connector_id: connector_id.clone(),
                endpoint: RECOVERY_ENDPOINT.to_string(),
                success: probe.success,
                status_code: probe.status_code,
                response_time_ms: probe.response_time_ms as i64,
                error_message: probe.error_message.clone(),
                retry_attempt: attempt,
            };
            let created = state.apply_outcome(&outcome, finished);
            state.tracker.release_trial(&connector_id);

            // A host failure may have re-opened the breaker while the probe was out; the
            // connector only counts as recovered once the breaker is closed.
            let breaker_closed = state
                .tracker
                .get(&connector_id)
                .is_some_and(|health| health.circuit_breaker.status == CircuitBreakerStatus::Closed);
            let recovered = probe.success && breaker_closed;
            let error_message = if probe.success && !breaker_closed {
                warn!(connector_id = %connector_id, attempt, "probe succeeded but circuit breaker is still open");
                Some("Circuit breaker still open after probe".to_string())
            } else {
                probe.error_message
            };

            let record = RemediationAttempt {
                attempt,
                started_at: now,
                finished_at: finished,
                success: recovered,
                status_code: probe.status_code,
                response_time_ms: probe.response_time_ms,
                error_message,
            };
            let decision = state.scheduler.complete_attempt(job_id, record, finished);

            match decision {
                Some(AttemptDecision::Succeeded) => {
                    state
                        .alerts
                        .resolve_type(&connector_id, AlertType::RemediationFailed, finished);
                }
                Some(AttemptDecision::Exhausted) => {
                    let max_attempts = state.scheduler.max_attempts();
                    if let Some(health) = state.tracker.get(&connector_id).cloned() {
                        let breach = Breach {
                            level: AlertLevel::Critical,
                            value: attempt as f64,
                            threshold: max_attempts as f64,
                        };
                        let message = format!(
                            "Recovery gave up after {} attempts; manual intervention required",
                            attempt
                        );
                        let (alert, raised) =
                            state
                                .alerts
                                .raise(&health, AlertType::RemediationFailed, breach, message, finished);
                        if raised {
                            error!(alert_id = %alert.id, connector_id = %connector_id, "remediation failure alert raised");
                        }
                    }
                }
                _ => {}
            }
            (decision, created)
        };

        if let Some(AttemptDecision::Retrying { delay_ms, .. }) = decision {
            self.schedule(job_id, Duration::milliseconds(delay_ms as i64));
        }
        for job in &created {
            self.schedule(job.id, Duration::zero());
        }
        self.notify().await;
        true
    }

    // =================================================================================
    // TIMERS
    // =================================================================================

    fn schedule(&self, job_id: Uuid, delay: Duration) {
        if self.inner.retry_mode == RetryMode::Manual {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let delay = delay.to_std().unwrap_or_default();
        let handle = tokio::spawn(fire_timer(weak, job_id, delay));
        if let Some(previous) = self.timers().insert(job_id, handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self, job_id: Uuid) {
        if let Some(handle) = self.timers().remove(&job_id) {
            handle.abort();
            debug!(job_id = %job_id, "retry timer cancelled");
        }
    }

    fn cancel_all_timers(&self) -> usize {
        let mut timers = self.timers();
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        count
    }

    fn has_live_timer(&self, job_id: Uuid) -> bool {
        self.timers()
            .get(&job_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn pending_timers(&self) -> usize {
        self.timers().values().filter(|handle| !handle.is_finished()).count()
    }

    // =================================================================================
    // TICK & LIFECYCLE
    // =================================================================================

    /// Periodic upkeep: retention, breaker cool-downs, time-based alerts and persistence.
    /// Returns `false` when a previous tick is still running.
    pub async fn tick(&self) -> bool {
        let Some(_ticking) = TickGuard::acquire(&self.inner.ticking) else {
            debug!("tick skipped, previous tick still in flight");
            return false;
        };

        let now = self.now();
        let (created, due) = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;
            let pruned = state.recorder.prune(now);
            let changes = state.tracker.poll(&state.recorder, now);
            let pruned_alerts = state.alerts.prune(now);
            let created = state.evaluate_alerts(now);
            debug!(pruned, pruned_alerts, changes = changes.len(), "tick evaluated");
            let due = state
                .scheduler
                .due_jobs(now)
                .into_iter()
                .filter(|job_id| !state.in_flight.contains(job_id))
                .collect::<Vec<_>>();
            (created, due)
        };

        for job in &created {
            self.schedule(job.id, Duration::zero());
        }
        match self.inner.retry_mode {
            RetryMode::Manual => {
                self.run_due_remediations().await;
            }
            RetryMode::Timers => {
                // Any due job without a live timer would otherwise never run again.
                for job_id in due {
                    if !self.has_live_timer(job_id) {
                        warn!(job_id = %job_id, "due remediation job had no timer, re-arming");
                        self.schedule(job_id, Duration::zero());
                    }
                }
            }
        }

        self.notify().await;
        self.persist_quietly().await;
        true
    }

    /// Spawns the periodic tick loop. Stopped by `shutdown`.
    pub fn start(&self) {
        let mut slot = self
            .inner
            .tick_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("monitoring tick loop already running");
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = self.inner.config.tick_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        MonitoringService { inner }.tick().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("monitoring tick loop stopped");
        }));
        info!(interval_secs = period.as_secs(), "monitoring tick loop started");
    }

    /// Stops the tick loop, cancels every retry timer and saves a final snapshot.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let task = self
            .inner
            .tick_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        let cancelled = self.cancel_all_timers();
        self.persist_quietly().await;
        info!(cancelled_timers = cancelled, "monitoring service shut down");
    }

    /// Restores every connector to its initial state, clears alerts, jobs and the call
    /// log, and cancels every pending retry timer.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let cancelled = self.cancel_all_timers();
        {
            let mut state = self.inner.state.write().await;
            state.recorder.clear();
            state.tracker.reset();
            state.alerts.clear();
            state.scorecards.clear();
            state.scheduler.reset();
            state.in_flight.clear();
            state.generation += 1;
        }
        info!(cancelled_timers = cancelled, "monitoring state reset");
        self.notify().await;
        self.persist_quietly().await;
    }

    /// Feeds a named scenario's outcomes through the normal submission path.
    #[instrument(skip(self))]
    pub async fn run_scenario(
        &self,
        scenario: Scenario,
        connector_id: Option<&str>,
    ) -> Result<ScenarioReport, MonitoringError> {
        let connector_id = connector_id.unwrap_or(DEFAULT_SCENARIO_CONNECTOR);
        let outcomes = scenario.outcomes(connector_id);
        let submitted = outcomes.len();

        let mut health = None;
        for outcome in outcomes {
            health = Some(self.submit_outcome(outcome).await?);
        }
        let health = health.ok_or_else(|| MonitoringError::ConnectorNotFound(connector_id.to_string()))?;

        info!(scenario = %scenario, connector_id = %connector_id, submitted, "scenario executed");
        Ok(ScenarioReport {
            scenario: scenario.name().to_string(),
            connector_id: connector_id.to_string(),
            outcomes_submitted: submitted,
            health,
        })
    }

    // =================================================================================
    // SUBSCRIPTIONS
    // =================================================================================

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.inner.notifier.subscribe()
    }

    /// Registers a callback for every published snapshot.
    pub fn subscribe_fn<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<MonitoringSnapshot>) + Send + Sync + 'static,
    {
        Subscription::spawn(self.subscribe(), callback)
    }

    async fn notify(&self) {
        if self.inner.notifier.subscriber_count() == 0 {
            return;
        }
        let snapshot = self.snapshot().await;
        self.inner.notifier.publish(snapshot);
    }

    // =================================================================================
    // PERSISTENCE
    // =================================================================================

    pub async fn persist(&self) -> Result<(), MonitoringError> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(());
        };
        let now = self.now();
        let state = self.inner.state.read().await.persisted(now);
        store.save(&state).await?;
        debug!("monitoring state persisted");
        Ok(())
    }

    async fn persist_quietly(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist monitoring state, continuing in memory");
        }
    }

    /// Loads the persisted snapshot. Failures fall back to fresh in-memory state.
    pub async fn restore(&self) -> bool {
        let Some(store) = self.inner.store.clone() else {
            return false;
        };
        let persisted = match store.load().await {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "failed to load monitoring snapshot, starting fresh");
                return false;
            }
        };

        let now = self.now();
        let created = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;
            state.recorder.restore(persisted.call_log, now);
            let connectors = state.tracker.restore(persisted.health);
            state.alerts.restore(persisted.alerts, now);
            state.tracker.poll(&state.recorder, now);

            // Jobs are not persisted: a breaker that is still tripped needs a new one.
            let tripped = state
                .tracker
                .iter()
                .filter(|health| health.circuit_breaker.status != CircuitBreakerStatus::Closed)
                .map(|health| health.connector_id.clone())
                .collect::<Vec<_>>();
            let created = tripped
                .iter()
                .filter_map(|connector_id| {
                    state.trigger(connector_id, RemediationReason::CircuitBreakerOpen, now)
                })
                .collect::<Vec<_>>();

            info!(
                connectors,
                calls = state.recorder.len(),
                alerts = state.alerts.all().len(),
                jobs = created.len(),
                "monitoring snapshot restored"
            );
            created
        };

        for job in &created {
            self.schedule(job.id, Duration::zero());
        }
        true
    }
}

/// Holds the tick slot; releasing it on drop keeps a cancelled tick from blocking the
/// next one.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn fire_timer(inner: Weak<Inner>, job_id: Uuid, delay: std::time::Duration) -> BoxFuture<'static, ()> {
    async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let service = MonitoringService { inner };
        service.timers().remove(&job_id);
        service.run_attempt(job_id).await;
    }
    .boxed()
}
