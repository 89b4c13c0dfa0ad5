// =====================================================================================
// TEST-HARNESS SCENARIOS
// =====================================================================================
//
// Canned outcome sequences for exercising the engine without real connectors. They
// go through the same submission path as real outcomes.
//
// =====================================================================================

use std::fmt;
use std::str::FromStr;

use crate::models::{CallOutcome, MonitoringError};

pub const DEFAULT_SCENARIO_CONNECTOR: &str = "usda-api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    CircuitBreakerTrip,
    ErrorRateSpike,
    SlowResponses,
    RateLimited,
    Recovery,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::CircuitBreakerTrip,
        Scenario::ErrorRateSpike,
        Scenario::SlowResponses,
        Scenario::RateLimited,
        Scenario::Recovery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::CircuitBreakerTrip => "circuit-breaker-trip",
            Scenario::ErrorRateSpike => "error-rate-spike",
            Scenario::SlowResponses => "slow-responses",
            Scenario::RateLimited => "rate-limited",
            Scenario::Recovery => "recovery",
        }
    }

    pub fn outcomes(&self, connector_id: &str) -> Vec<CallOutcome> {
        match self {
            Scenario::CircuitBreakerTrip => (0..6)
                .map(|_| {
                    CallOutcome::failure(connector_id, "/data", 503, "Service unavailable")
                        .with_response_time(1_200)
                })
                .collect(),
            // 7 of 20 fail (35%), spread out so the failure streak never reaches 5.
            Scenario::ErrorRateSpike => (0..20)
                .map(|i| {
                    if i % 3 == 1 {
                        CallOutcome::failure(connector_id, "/data", 500, "Internal server error")
                            .with_response_time(300)
                    } else {
                        CallOutcome::success(connector_id, "/data", 250)
                    }
                })
                .collect(),
            Scenario::SlowResponses => (0..10)
                .map(|_| CallOutcome::success(connector_id, "/data", 6_000))
                .collect(),
            Scenario::RateLimited => (0..4)
                .map(|_| {
                    CallOutcome::failure(connector_id, "/data", 429, "Rate limit exceeded")
                        .with_response_time(80)
                })
                .collect(),
            Scenario::Recovery => (0..5)
                .map(|_| CallOutcome::success(connector_id, "/data", 150))
                .collect(),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = MonitoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| MonitoringError::UnknownScenario(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_round_trips_names() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert_matches!("meltdown".parse::<Scenario>(), Err(MonitoringError::UnknownScenario(_)));
    }

    #[test]
    fn test_error_rate_spike_shape() {
        let outcomes = Scenario::ErrorRateSpike.outcomes("bls-api");
        let failures = outcomes.iter().filter(|o| !o.success).count();
        assert_eq!(outcomes.len(), 20);
        assert_eq!(failures, 7);

        let mut streak = 0;
        let mut longest = 0;
        for outcome in &outcomes {
            streak = if outcome.success { 0 } else { streak + 1 };
            longest = longest.max(streak);
        }
        assert!(longest < 5);
    }

    #[test]
    fn test_rate_limited_stays_below_breaker_threshold() {
        let outcomes = Scenario::RateLimited.outcomes("census-api");
        assert!(outcomes.len() < 5);
        assert!(outcomes.iter().all(|o| o.status_code == 429 && !o.success));
    }
}
