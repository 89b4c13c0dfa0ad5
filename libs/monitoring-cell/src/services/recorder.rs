// =====================================================================================
// CALL RECORDER
// =====================================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::models::{CallLogEntry, CallOutcome};

const RATE_LIMITED_STATUS: u16 = 429;

/// Aggregates over a slice of the call log for one connector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_response_time_ms: u64,
    /// Successful calls that returned a full 2xx body (not 204/206).
    pub complete_responses: u64,
    /// Calls whose success flag disagrees with the status code class.
    pub inconsistent: u64,
    /// Calls the upstream refused as malformed (4xx other than throttling).
    pub rejected: u64,
}

impl WindowStats {
    pub fn uptime(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    pub fn average_response_time_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_response_time_ms as f64 / self.requests as f64
        }
    }

    fn add(&mut self, entry: &CallLogEntry) {
        self.requests += 1;
        self.total_response_time_ms += entry.response_time_ms;

        let is_2xx = (200..300).contains(&entry.status_code);
        if entry.success {
            self.successes += 1;
            if is_2xx && entry.status_code != 204 && entry.status_code != 206 {
                self.complete_responses += 1;
            }
        } else {
            self.errors += 1;
        }
        if entry.success != is_2xx {
            self.inconsistent += 1;
        }
        if (400..500).contains(&entry.status_code) && entry.status_code != RATE_LIMITED_STATUS {
            self.rejected += 1;
        }
    }
}

/// Bounded, time-ordered log of call outcomes. Oldest entries are evicted first
/// once either the count cap or the age cap is exceeded.
#[derive(Debug)]
pub struct CallRecorder {
    entries: VecDeque<CallLogEntry>,
    max_entries: usize,
    max_age: Duration,
}

impl CallRecorder {
    pub fn new(retention: &RetentionConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(retention.call_log_max_entries.min(1024)),
            max_entries: retention.call_log_max_entries.max(1),
            max_age: retention.call_log_max_age,
        }
    }

    pub fn record(&mut self, outcome: &CallOutcome, now: DateTime<Utc>) -> CallLogEntry {
        let entry = CallLogEntry {
            id: Uuid::new_v4(),
            connector_id: outcome.connector_id.clone(),
            endpoint: outcome.endpoint.clone(),
            timestamp: now,
            status_code: outcome.status_code,
            response_time_ms: outcome.response_time_ms.max(0) as u64,
            // A throttled call never counts as a success, whatever the host reported.
            success: outcome.success && outcome.status_code != RATE_LIMITED_STATUS,
            error_message: outcome.error_message.clone(),
            retry_attempt: outcome.retry_attempt,
        };

        self.entries.push_back(entry.clone());
        self.prune(now);

        debug!(
            connector_id = %entry.connector_id,
            endpoint = %entry.endpoint,
            status_code = entry.status_code,
            success = entry.success,
            "call recorded"
        );

        entry
    }

    /// Drops entries beyond the count cap and entries older than the age cap.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let cutoff = now - self.max_age;

        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        while self
            .entries
            .front()
            .is_some_and(|entry| entry.timestamp < cutoff)
        {
            self.entries.pop_front();
        }

        before - self.entries.len()
    }

    /// Newest-first page. The iterator is `Clone`, so a caller can restart it.
    pub fn query(
        &self,
        limit: usize,
        offset: usize,
    ) -> impl Iterator<Item = &CallLogEntry> + Clone + '_ {
        self.entries.iter().rev().skip(offset).take(limit)
    }

    pub fn entries_since<'a>(
        &'a self,
        connector_id: &'a str,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a CallLogEntry> + 'a {
        self.entries
            .iter()
            .rev()
            .take_while(move |entry| entry.timestamp >= since)
            .filter(move |entry| entry.connector_id == connector_id)
    }

    pub fn window_stats(&self, connector_id: &str, since: DateTime<Utc>) -> WindowStats {
        let mut stats = WindowStats::default();
        for entry in self.entries_since(connector_id, since) {
            stats.add(entry);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<CallLogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Replaces the log with persisted entries, re-sorting and re-applying retention.
    pub fn restore(&mut self, mut entries: Vec<CallLogEntry>, now: DateTime<Utc>) {
        entries.sort_by_key(|entry| entry.timestamp);
        self.entries = entries.into();
        self.prune(now);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
