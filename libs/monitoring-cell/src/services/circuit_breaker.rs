// =====================================================================================
// CIRCUIT BREAKER
// =====================================================================================
//
// Three-state breaker (closed / open / half-open) driven purely by observed outcomes
// and the clock. The breaker never goes from open straight to closed: it must first
// cool down into half-open, where a single trial decides between closing and
// re-opening with a longer (capped) cool-down.
//
// =====================================================================================

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::config::BreakerConfig;
use crate::models::{CircuitBreakerState, CircuitBreakerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    HalfOpened,
    Closed,
    Reopened,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    pub fn initial_state(&self) -> CircuitBreakerState {
        CircuitBreakerState::closed(self.config.base_cooldown.as_secs())
    }

    pub fn on_success(
        &self,
        connector_id: &str,
        state: &mut CircuitBreakerState,
    ) -> Option<BreakerTransition> {
        match state.status {
            CircuitBreakerStatus::HalfOpen => {
                state.status = CircuitBreakerStatus::Closed;
                state.opened_at = None;
                state.retry_at = None;
                state.trial_in_flight = false;
                state.cooldown_secs = self.config.base_cooldown.as_secs();
                info!(connector_id = %connector_id, "Circuit breaker reset to CLOSED state");
                Some(BreakerTransition::Closed)
            }
            CircuitBreakerStatus::Open => {
                warn!(connector_id = %connector_id, "Success recorded while circuit is open");
                None
            }
            CircuitBreakerStatus::Closed => None,
        }
    }

    pub fn on_failure(
        &self,
        connector_id: &str,
        state: &mut CircuitBreakerState,
        consecutive_failures: u32,
        now: DateTime<Utc>,
    ) -> Option<BreakerTransition> {
        match state.status {
            CircuitBreakerStatus::Closed if consecutive_failures >= self.config.failure_threshold => {
                let cooldown = self.config.base_cooldown.as_secs();
                self.open(state, cooldown, consecutive_failures, now);
                error!(
                    connector_id = %connector_id,
                    consecutive_failures,
                    cooldown_secs = cooldown,
                    "Circuit breaker opened"
                );
                Some(BreakerTransition::Opened)
            }
            CircuitBreakerStatus::HalfOpen => {
                let cooldown = self.escalated_cooldown(state.cooldown_secs);
                self.open(state, cooldown, consecutive_failures, now);
                warn!(
                    connector_id = %connector_id,
                    cooldown_secs = cooldown,
                    "Half-open trial failed, circuit breaker re-opened"
                );
                Some(BreakerTransition::Reopened)
            }
            _ => None,
        }
    }

    /// Moves an open breaker to half-open once its cool-down has elapsed.
    pub fn poll(
        &self,
        connector_id: &str,
        state: &mut CircuitBreakerState,
        now: DateTime<Utc>,
    ) -> Option<BreakerTransition> {
        if state.status != CircuitBreakerStatus::Open {
            return None;
        }

        let due = state.retry_at.map_or(true, |retry_at| now >= retry_at);
        if !due {
            return None;
        }

        state.status = CircuitBreakerStatus::HalfOpen;
        state.trial_in_flight = false;
        info!(connector_id = %connector_id, "Circuit breaker moved to HALF-OPEN state");
        Some(BreakerTransition::HalfOpened)
    }

    /// Claims the single trial call a half-open breaker allows.
    pub fn try_begin_trial(&self, state: &mut CircuitBreakerState) -> bool {
        match state.status {
            CircuitBreakerStatus::Closed => true,
            CircuitBreakerStatus::Open => false,
            CircuitBreakerStatus::HalfOpen if state.trial_in_flight => false,
            CircuitBreakerStatus::HalfOpen => {
                state.trial_in_flight = true;
                true
            }
        }
    }

    pub fn release_trial(&self, state: &mut CircuitBreakerState) {
        state.trial_in_flight = false;
    }

    fn open(
        &self,
        state: &mut CircuitBreakerState,
        cooldown_secs: u64,
        consecutive_failures: u32,
        now: DateTime<Utc>,
    ) {
        state.status = CircuitBreakerStatus::Open;
        state.opened_at = Some(now);
        state.retry_at = Some(now + Duration::seconds(cooldown_secs as i64));
        state.cooldown_secs = cooldown_secs;
        state.failures_at_open = consecutive_failures;
        state.trial_in_flight = false;
        state.trips += 1;
    }

    fn escalated_cooldown(&self, current_secs: u64) -> u64 {
        current_secs
            .max(1)
            .saturating_mul(self.config.cooldown_multiplier.max(1) as u64)
            .min(self.config.max_cooldown.as_secs())
    }
}
