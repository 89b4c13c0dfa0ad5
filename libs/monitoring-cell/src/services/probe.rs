use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const RECOVERY_ENDPOINT: &str = "recovery-probe";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

impl ProbeOutcome {
    pub fn ok(response_time_ms: u64) -> Self {
        Self {
            success: true,
            status_code: 200,
            response_time_ms,
            error_message: None,
        }
    }

    pub fn failed(status_code: u16, error: &str) -> Self {
        Self {
            success: false,
            status_code,
            response_time_ms: 0,
            error_message: Some(error.to_string()),
        }
    }
}

/// Issues one request through a connector's normal path to check whether it recovered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecoveryProbe: Send + Sync {
    async fn probe(&self, connector_id: &str, endpoint: &str) -> ProbeOutcome;
}

/// Stand-in for real connectors: succeeds at a fixed rate with plausible latencies.
pub struct SimulatedProbe {
    success_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedProbe {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(success_rate: f64, seed: u64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl RecoveryProbe for SimulatedProbe {
    async fn probe(&self, connector_id: &str, endpoint: &str) -> ProbeOutcome {
        let outcome = match self.rng.lock() {
            Ok(mut rng) => {
                if rng.gen_bool(self.success_rate) {
                    ProbeOutcome::ok(rng.gen_range(80..600))
                } else if rng.gen_bool(0.3) {
                    ProbeOutcome {
                        response_time_ms: rng.gen_range(5_000..10_000),
                        ..ProbeOutcome::failed(504, "Gateway timeout")
                    }
                } else {
                    ProbeOutcome {
                        response_time_ms: rng.gen_range(100..1_500),
                        ..ProbeOutcome::failed(503, "Service unavailable")
                    }
                }
            }
            Err(_) => ProbeOutcome::failed(500, "probe rng poisoned"),
        };

        debug!(
            connector_id = %connector_id,
            endpoint = %endpoint,
            success = outcome.success,
            "simulated probe finished"
        );
        outcome
    }
}

/// Replays queued outcomes per connector, then falls back to a default.
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<ProbeOutcome>>>,
    fallback: ProbeOutcome,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new(fallback: ProbeOutcome) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, connector_id: &str, outcome: ProbeOutcome) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(connector_id.to_string())
                .or_default()
                .push_back(outcome);
        }
    }

    /// Connector ids probed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RecoveryProbe for ScriptedProbe {
    async fn probe(&self, connector_id: &str, _endpoint: &str) -> ProbeOutcome {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(connector_id.to_string());
        }
        self.scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(connector_id).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| self.fallback.clone())
    }
}
