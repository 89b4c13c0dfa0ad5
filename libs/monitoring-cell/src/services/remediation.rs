// =====================================================================================
// REMEDIATION SCHEDULER
// =====================================================================================
//
// Owns the remediation job table. Jobs move forward only:
// pending -> running -> success | failed. A job stays `running` between retries, with
// `next_retry_at` telling the facade when the next attempt is due. Timers live in the
// facade; this type only decides what happens and when.
//
// =====================================================================================

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RemediationConfig;
use crate::models::{
    JobFilter, MonitoringError, RemediationAttempt, RemediationJob, RemediationReason,
    RemediationStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptDecision {
    Succeeded,
    Retrying {
        delay_ms: u64,
        next_retry_at: DateTime<Utc>,
    },
    Exhausted,
}

pub struct RemediationScheduler {
    config: RemediationConfig,
    jobs: Vec<RemediationJob>,
    rng: StdRng,
}

impl RemediationScheduler {
    pub fn new(config: RemediationConfig) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            jobs: Vec::new(),
            rng,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// `min(base * 2^attempt_index, max)` before jitter.
    pub fn base_delay_ms(&self, attempt_index: u32) -> u64 {
        self.config
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt_index))
            .min(self.config.max_backoff_ms)
    }

    /// Backoff with `± jitter_ratio` noise applied to the capped delay.
    pub fn backoff_delay_ms(&mut self, attempt_index: u32) -> u64 {
        let delay = self.base_delay_ms(attempt_index) as f64;
        if self.config.jitter_ratio <= 0.0 {
            return delay as u64;
        }
        let noise: f64 = self.rng.gen_range(-1.0..=1.0);
        (delay * (1.0 + self.config.jitter_ratio * noise)).max(0.0).round() as u64
    }

    /// Returns the active job for the connector if there is one, otherwise creates a
    /// pending job due immediately. The flag tells whether a job was created.
    pub fn trigger(
        &mut self,
        connector_id: &str,
        source_id: &str,
        reason: RemediationReason,
        now: DateTime<Utc>,
    ) -> (RemediationJob, bool) {
        if let Some(active) = self.active_for(connector_id) {
            info!(
                job_id = %active.id,
                connector_id = %connector_id,
                requested_reason = %reason,
                "remediation already active, trigger ignored"
            );
            return (active.clone(), false);
        }

        let job = RemediationJob {
            id: Uuid::new_v4(),
            connector_id: connector_id.to_string(),
            source_id: source_id.to_string(),
            reason,
            status: RemediationStatus::Pending,
            attempts: Vec::new(),
            current_backoff_ms: 0,
            next_retry_at: Some(now),
            created_at: now,
            completed_at: None,
            total_duration_ms: None,
            failure_reason: None,
        };

        info!(
            job_id = %job.id,
            connector_id = %connector_id,
            reason = %reason,
            "remediation job created"
        );
        self.jobs.push(job.clone());
        (job, true)
    }

    /// Marks the job running and returns the 1-based number of the attempt starting.
    pub fn begin_attempt(&mut self, job_id: Uuid) -> Option<u32> {
        let job = self.job_mut(job_id)?;
        if !job.status.is_active() {
            return None;
        }
        job.status = RemediationStatus::Running;
        job.next_retry_at = None;
        Some(job.attempts.len() as u32 + 1)
    }

    /// Pushes the next attempt out without consuming one.
    pub fn defer(&mut self, job_id: Uuid, until: DateTime<Utc>) -> Option<RemediationJob> {
        let job = self.job_mut(job_id)?;
        if !job.status.is_active() {
            return None;
        }
        job.next_retry_at = Some(until);
        Some(job.clone())
    }

    pub fn complete_attempt(
        &mut self,
        job_id: Uuid,
        attempt: RemediationAttempt,
        now: DateTime<Utc>,
    ) -> Option<AttemptDecision> {
        let max_attempts = self.config.max_attempts;
        let attempts_made = {
            let job = self.job_mut(job_id)?;
            if !job.status.is_active() {
                return None;
            }
            job.attempts.push(attempt.clone());
            job.attempts.len() as u32
        };

        if attempt.success {
            let job = self.job_mut(job_id)?;
            finish(job, RemediationStatus::Success, None, now);
            info!(
                job_id = %job_id,
                connector_id = %job.connector_id,
                attempts = attempts_made,
                "remediation succeeded"
            );
            return Some(AttemptDecision::Succeeded);
        }

        if attempts_made >= max_attempts {
            let job = self.job_mut(job_id)?;
            let reason = format!(
                "Exhausted {} attempts: {}",
                attempts_made,
                attempt
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("HTTP {}", attempt.status_code))
            );
            finish(job, RemediationStatus::Failed, Some(reason), now);
            error!(
                job_id = %job_id,
                connector_id = %job.connector_id,
                attempts = attempts_made,
                "remediation exhausted"
            );
            return Some(AttemptDecision::Exhausted);
        }

        let delay_ms = self.backoff_delay_ms(attempts_made - 1);
        let next_retry_at = now + Duration::milliseconds(delay_ms as i64);
        let job = self.job_mut(job_id)?;
        job.current_backoff_ms = delay_ms;
        job.next_retry_at = Some(next_retry_at);
        warn!(
            job_id = %job_id,
            connector_id = %job.connector_id,
            attempt = attempts_made,
            delay_ms,
            "remediation attempt failed, retrying"
        );
        Some(AttemptDecision::Retrying { delay_ms, next_retry_at })
    }

    /// Cancels the connector's active job, marking it failed.
    pub fn cancel(&mut self, connector_id: &str, now: DateTime<Utc>) -> Result<RemediationJob, MonitoringError> {
        let job = self
            .jobs
            .iter_mut()
            .find(|job| job.connector_id == connector_id && job.status.is_active())
            .ok_or_else(|| MonitoringError::JobNotFound(connector_id.to_string()))?;
        finish(job, RemediationStatus::Failed, Some("cancelled".to_string()), now);
        info!(job_id = %job.id, connector_id = %connector_id, "remediation cancelled");
        Ok(job.clone())
    }

    /// Drops terminal jobs; active ones are kept.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.status.is_active());
        before - self.jobs.len()
    }

    pub fn get(&self, job_id: Uuid) -> Option<&RemediationJob> {
        self.jobs.iter().find(|job| job.id == job_id)
    }

    pub fn active_for(&self, connector_id: &str) -> Option<&RemediationJob> {
        self.jobs
            .iter()
            .find(|job| job.connector_id == connector_id && job.status.is_active())
    }

    /// Newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<RemediationJob> {
        self.jobs
            .iter()
            .rev()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[RemediationJob] {
        &self.jobs
    }

    /// Active jobs whose next attempt is due at `now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.jobs
            .iter()
            .filter(|job| job.status.is_active())
            .filter(|job| job.next_retry_at.is_some_and(|at| at <= now))
            .map(|job| job.id)
            .collect()
    }

    pub fn reset(&mut self) {
        self.jobs.clear();
    }

    fn job_mut(&mut self, job_id: Uuid) -> Option<&mut RemediationJob> {
        self.jobs.iter_mut().find(|job| job.id == job_id)
    }
}

fn finish(
    job: &mut RemediationJob,
    status: RemediationStatus,
    failure_reason: Option<String>,
    now: DateTime<Utc>,
) {
    job.status = status;
    job.next_retry_at = None;
    job.completed_at = Some(now);
    job.total_duration_ms = Some((now - job.created_at).num_milliseconds().max(0) as u64);
    job.failure_reason = failure_reason;
}
