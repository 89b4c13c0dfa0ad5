// =====================================================================================
// QUALITY SCORECARDS
// =====================================================================================

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use tracing::debug;

use crate::models::{
    ConnectorHealth, MonitoringThresholds, QualityScorecard, ScorecardPeriod, SubScores,
    TrendDirection,
};
use crate::services::recorder::{CallRecorder, WindowStats};

/// Fixed weight table, in percent. Must sum to 100.
pub const WEIGHTS: SubScores = SubScores {
    availability: 35.0,
    freshness: 25.0,
    performance: 20.0,
    accuracy: 10.0,
    completeness: 5.0,
    consistency: 5.0,
};

pub const RECOMMENDATION_CUTOFF: f64 = 70.0;
pub const TREND_DELTA: f64 = 2.0;
/// Points lost per hour since the last successful call.
pub const FRESHNESS_PENALTY_PER_HOUR: f64 = 4.0;

pub fn weighted_overall(scores: &SubScores) -> f64 {
    let total = scores.availability * WEIGHTS.availability
        + scores.freshness * WEIGHTS.freshness
        + scores.performance * WEIGHTS.performance
        + scores.accuracy * WEIGHTS.accuracy
        + scores.completeness * WEIGHTS.completeness
        + scores.consistency * WEIGHTS.consistency;
    round1(total / 100.0)
}

pub fn availability_score(stats: &WindowStats) -> f64 {
    clamp_score(stats.uptime() * 100.0)
}

pub fn freshness_score(last_success_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_success_at {
        Some(at) => {
            let hours = (now - at).num_seconds().max(0) as f64 / 3600.0;
            clamp_score(100.0 - FRESHNESS_PENALTY_PER_HOUR * hours)
        }
        None => 0.0,
    }
}

/// 100 up to the warning cut-off, 60 at the critical cut-off, approaching zero at twice
/// the critical cut-off.
pub fn performance_score(stats: &WindowStats, thresholds: &MonitoringThresholds) -> f64 {
    if stats.requests == 0 {
        return 100.0;
    }
    let avg = stats.average_response_time_ms();
    let warning = thresholds.response_time_warning_ms;
    let critical = thresholds.response_time_critical_ms.max(warning + 1.0);
    let score = if avg <= warning {
        100.0
    } else if avg <= critical {
        100.0 - 40.0 * (avg - warning) / (critical - warning)
    } else {
        60.0 - 60.0 * (avg - critical) / critical
    };
    clamp_score(score)
}

/// Share of calls the upstream accepted as well-formed. Outages and throttling count
/// against availability, not here.
pub fn accuracy_score(stats: &WindowStats) -> f64 {
    if stats.requests == 0 {
        return 100.0;
    }
    clamp_score(100.0 - 100.0 * stats.rejected as f64 / stats.requests as f64)
}

pub fn completeness_score(stats: &WindowStats) -> f64 {
    ratio_score(stats.complete_responses, stats.successes)
}

pub fn consistency_score(stats: &WindowStats) -> f64 {
    if stats.requests == 0 {
        return 100.0;
    }
    clamp_score(100.0 - 100.0 * stats.inconsistent as f64 / stats.requests as f64)
}

pub fn trend(previous: Option<f64>, current: f64) -> TrendDirection {
    match previous {
        Some(previous) if current - previous > TREND_DELTA => TrendDirection::Improving,
        Some(previous) if current - previous < -TREND_DELTA => TrendDirection::Degrading,
        _ => TrendDirection::Stable,
    }
}

/// Deterministic, in weight order.
pub fn recommendations(scores: &SubScores) -> Vec<String> {
    let checks: [(f64, &str); 6] = [
        (
            scores.availability,
            "Improve availability: investigate outages and add a fallback data source",
        ),
        (
            scores.freshness,
            "Refresh data more often: the last successful sync is too old",
        ),
        (
            scores.performance,
            "Reduce latency: cache responses or request smaller pages",
        ),
        (
            scores.accuracy,
            "Reduce failed calls: review error responses and request parameters",
        ),
        (
            scores.completeness,
            "Request complete payloads: too many partial or empty responses",
        ),
        (
            scores.consistency,
            "Validate responses: success flags disagree with HTTP status codes",
        ),
    ];
    checks
        .iter()
        .filter(|(score, _)| *score < RECOMMENDATION_CUTOFF)
        .map(|(_, text)| text.to_string())
        .collect()
}

pub fn period_window(period: ScorecardPeriod) -> Duration {
    match period {
        ScorecardPeriod::Daily => Duration::hours(24),
        ScorecardPeriod::Weekly => Duration::days(7),
    }
}

/// Start of the calendar bucket `now` falls in: UTC midnight, or Monday midnight.
pub fn period_start(period: ScorecardPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    let date = match period {
        ScorecardPeriod::Daily => now.date_naive(),
        ScorecardPeriod::Weekly => {
            now.date_naive() - Duration::days(now.weekday().num_days_from_monday() as i64)
        }
    };
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

pub fn score_connector(
    health: &ConnectorHealth,
    stats: &WindowStats,
    thresholds: &MonitoringThresholds,
    now: DateTime<Utc>,
) -> SubScores {
    SubScores {
        availability: availability_score(stats),
        freshness: freshness_score(health.last_success_at, now),
        performance: performance_score(stats, thresholds),
        accuracy: accuracy_score(stats),
        completeness: completeness_score(stats),
        consistency: consistency_score(stats),
    }
}

#[derive(Debug, Clone, Copy)]
struct PeriodSnapshot {
    period_start: DateTime<Utc>,
    overall: f64,
}

#[derive(Debug, Clone, Copy)]
struct PeriodHistory {
    current: PeriodSnapshot,
    previous: Option<PeriodSnapshot>,
}

/// Computes scorecards and retains one snapshot per earlier period for trends.
pub struct ScorecardCalculator {
    thresholds: MonitoringThresholds,
    history: HashMap<(String, ScorecardPeriod), PeriodHistory>,
}

impl ScorecardCalculator {
    pub fn new(thresholds: MonitoringThresholds) -> Self {
        Self {
            thresholds,
            history: HashMap::new(),
        }
    }

    /// Scores every connector of `source_id` and averages them. `None` when the source
    /// has no configured connector.
    pub fn compute<'a>(
        &mut self,
        source_id: &str,
        period: ScorecardPeriod,
        connectors: impl IntoIterator<Item = &'a ConnectorHealth>,
        recorder: &CallRecorder,
        now: DateTime<Utc>,
    ) -> Option<QualityScorecard> {
        let since = now - period_window(period);
        let per_connector: Vec<(String, SubScores)> = connectors
            .into_iter()
            .filter(|health| health.source_id == source_id)
            .map(|health| {
                let stats = recorder.window_stats(&health.connector_id, since);
                (
                    health.connector_id.clone(),
                    score_connector(health, &stats, &self.thresholds, now),
                )
            })
            .collect();

        if per_connector.is_empty() {
            return None;
        }

        let scores = average(per_connector.iter().map(|(_, s)| s));
        let overall = weighted_overall(&scores);
        let start = period_start(period, now);
        let previous_overall = self.remember(source_id, period, start, overall);

        debug!(
            source_id = %source_id,
            period = ?period,
            overall,
            "scorecard computed"
        );

        Some(QualityScorecard {
            source_id: source_id.to_string(),
            period,
            period_start: start,
            generated_at: now,
            connector_ids: per_connector.into_iter().map(|(id, _)| id).collect(),
            recommendations: recommendations(&scores),
            scores,
            overall,
            previous_overall,
            trend: trend(previous_overall, overall),
        })
    }

    /// Records the current bucket's score and returns the latest score from an
    /// earlier bucket, if any.
    fn remember(
        &mut self,
        source_id: &str,
        period: ScorecardPeriod,
        start: DateTime<Utc>,
        overall: f64,
    ) -> Option<f64> {
        let current = PeriodSnapshot { period_start: start, overall };
        let key = (source_id.to_string(), period);
        let entry = self.history.entry(key).or_insert(PeriodHistory {
            current,
            previous: None,
        });

        if entry.current.period_start < start {
            entry.previous = Some(entry.current);
        }
        entry.current = current;
        entry.previous.map(|snapshot| snapshot.overall)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

fn average<'a>(scores: impl Iterator<Item = &'a SubScores>) -> SubScores {
    let mut sum = SubScores {
        availability: 0.0,
        freshness: 0.0,
        performance: 0.0,
        accuracy: 0.0,
        completeness: 0.0,
        consistency: 0.0,
    };
    let mut count = 0.0;
    for s in scores {
        sum.availability += s.availability;
        sum.freshness += s.freshness;
        sum.performance += s.performance;
        sum.accuracy += s.accuracy;
        sum.completeness += s.completeness;
        sum.consistency += s.consistency;
        count += 1.0;
    }
    if count == 0.0 {
        return sum;
    }
    SubScores {
        availability: round1(sum.availability / count),
        freshness: round1(sum.freshness / count),
        performance: round1(sum.performance / count),
        accuracy: round1(sum.accuracy / count),
        completeness: round1(sum.completeness / count),
        consistency: round1(sum.consistency / count),
    }
}

fn ratio_score(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        100.0
    } else {
        clamp_score(100.0 * numerator as f64 / denominator as f64)
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
