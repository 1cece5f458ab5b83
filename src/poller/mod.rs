//! Status poller for asynchronous generation jobs
//!
//! One parameterized loop serves every job family. A job moves
//! `Submitted -> Polling -> {Completed | Failed | TimedOut}`, or stops early
//! when its [`CancellationToken`] fires. The attempt ceiling is the only
//! timeout; there is no wall-clock deadline.

pub mod rewrite;

pub use rewrite::ResultUrlRewrite;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::traits::{GenerationBackend, GenerationOutput, IdField, JobHandle, JobState};
use crate::config::{PollProfileConfig, PollingConfig, ScheduleKind};
use crate::error::{AppError, Result};
use crate::time::{Sleeper, TokioSleeper};

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl PollPhase {
    /// Phase a failed generation ends in
    pub fn for_error(error: &AppError) -> Self {
        match error {
            AppError::TimedOut { .. } => PollPhase::TimedOut,
            AppError::Cancelled => PollPhase::Cancelled,
            _ => PollPhase::Failed,
        }
    }
}

/// Wait between two status checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySchedule {
    Fixed(Duration),
    /// `min(base + attempt * step, max)`
    Linear {
        base: Duration,
        step: Duration,
        max: Option<Duration>,
    },
}

impl DelaySchedule {
    /// Delay before the zero-based `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            DelaySchedule::Fixed(interval) => interval,
            DelaySchedule::Linear { base, step, max } => {
                let delay = base.saturating_add(step.saturating_mul(attempt));
                match max {
                    Some(max) => delay.min(max),
                    None => delay,
                }
            }
        }
    }
}

/// Cadence and attempt ceiling for one job family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProfile {
    pub schedule: DelaySchedule,
    pub max_attempts: u32,
}

impl From<&PollProfileConfig> for PollProfile {
    fn from(config: &PollProfileConfig) -> Self {
        let schedule = match config.schedule {
            ScheduleKind::Fixed => DelaySchedule::Fixed(Duration::from_millis(config.interval_ms)),
            ScheduleKind::Linear => DelaySchedule::Linear {
                base: Duration::from_millis(config.interval_ms),
                step: Duration::from_millis(config.step_ms),
                max: config.max_interval_ms.map(Duration::from_millis),
            },
        };

        Self {
            schedule,
            max_attempts: config.max_attempts,
        }
    }
}

/// Profiles for each job id scheme
#[derive(Debug, Clone)]
pub struct PollProfiles {
    pub image: PollProfile,
    pub video: PollProfile,
    pub video_task: PollProfile,
}

impl PollProfiles {
    pub fn for_handle(&self, handle: &JobHandle) -> &PollProfile {
        match handle.id_field {
            IdField::GenerationId => &self.image,
            IdField::JobId => &self.video,
            IdField::TaskId => &self.video_task,
        }
    }
}

impl From<&PollingConfig> for PollProfiles {
    fn from(config: &PollingConfig) -> Self {
        Self {
            image: PollProfile::from(&config.image),
            video: PollProfile::from(&config.video),
            video_task: PollProfile::from(&config.video_task),
        }
    }
}

impl Default for PollProfiles {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

/// Removes the job from the in-flight set when polling ends
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Polls job status until the job reaches a terminal state
pub struct Poller {
    sleeper: Arc<dyn Sleeper>,
    rewrite: ResultUrlRewrite,
    in_flight: DashMap<String, ()>,
}

impl Poller {
    /// Create a poller that waits on the tokio timer
    pub fn new(rewrite: ResultUrlRewrite) -> Self {
        Self::with_sleeper(rewrite, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(rewrite: ResultUrlRewrite, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            sleeper,
            rewrite,
            in_flight: DashMap::new(),
        }
    }

    /// Whether a poll loop for this job is currently running
    pub fn is_polling(&self, handle: &JobHandle) -> bool {
        self.in_flight.contains_key(&handle.key())
    }

    fn claim(&self, handle: &JobHandle) -> Result<InFlightGuard<'_>> {
        let key = handle.key();
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(AppError::AlreadyPolling(handle.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlightGuard {
                    in_flight: &self.in_flight,
                    key,
                })
            }
        }
    }

    /// Poll `handle` until it completes, fails, runs out of attempts, or
    /// `cancel` fires. No status request is issued after cancellation.
    pub async fn poll(
        &self,
        backend: &dyn GenerationBackend,
        handle: &JobHandle,
        profile: &PollProfile,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput> {
        let _guard = self.claim(handle)?;

        info!(
            job_id = %handle.id,
            id_field = handle.id_field.as_str(),
            max_attempts = profile.max_attempts,
            "Polling job"
        );

        for attempt in 0..profile.max_attempts {
            let delay = profile.schedule.delay(attempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle, attempt)),
                _ = self.sleeper.sleep(delay) => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle, attempt)),
                status = backend.job_status(handle) => status,
            };

            let status = match fetched {
                Ok(status) => status,
                Err(e) if is_transient(&e) => {
                    warn!(
                        job_id = %handle.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Status check failed, will retry"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            match status.state {
                JobState::Completed => {
                    let raw = status
                        .result_url
                        .ok_or_else(|| AppError::MissingResult(handle.id.clone()))?;
                    let url = self.rewrite.apply(&raw)?;
                    info!(job_id = %handle.id, attempts = attempt + 1, url = %url, "Job completed");
                    return Ok(GenerationOutput::Asset {
                        url,
                        metadata: status.metadata,
                    });
                }
                JobState::Failed => {
                    let message = status
                        .error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| "generation failed".to_string());
                    warn!(job_id = %handle.id, error = %message, "Job failed");
                    return Err(AppError::JobFailed {
                        job_id: handle.id.clone(),
                        message,
                    });
                }
                JobState::NotFound => {
                    warn!(job_id = %handle.id, "Job unknown to backend");
                    return Err(AppError::JobNotFound(handle.id.clone()));
                }
                JobState::Queued | JobState::Processing => {
                    debug!(
                        job_id = %handle.id,
                        attempt = attempt + 1,
                        state = ?status.state,
                        "Job still running"
                    );
                }
            }
        }

        warn!(job_id = %handle.id, attempts = profile.max_attempts, "Job timed out");
        Err(AppError::TimedOut {
            job_id: handle.id.clone(),
            attempts: profile.max_attempts,
        })
    }

    fn cancelled(&self, handle: &JobHandle, attempt: u32) -> AppError {
        debug!(job_id = %handle.id, attempt, "Polling cancelled");
        AppError::Cancelled
    }
}

/// Status-check failures that consume an attempt instead of ending the poll
fn is_transient(error: &AppError) -> bool {
    match error {
        AppError::HttpClient(_) | AppError::RateLimited(_) => true,
        AppError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}
