//! Plan quotas and the client-side usage cache

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::PlansConfig;
use crate::error::{AppError, Result};

/// Plan name to generation quota, loaded once at startup
#[derive(Debug, Clone)]
pub struct PlanLimits {
    limits: HashMap<String, u32>,
    default_plan: String,
}

impl PlanLimits {
    pub fn from_config(config: &PlansConfig) -> Self {
        Self {
            limits: config
                .limits
                .iter()
                .map(|(plan, limit)| (plan.to_ascii_lowercase(), *limit))
                .collect(),
            default_plan: config.default_plan.to_ascii_lowercase(),
        }
    }

    /// Quota for `plan`; unknown plans get the default plan's quota
    pub fn limit_for(&self, plan: &str) -> u32 {
        self.limits
            .get(&plan.to_ascii_lowercase())
            .or_else(|| self.limits.get(&self.default_plan))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self::from_config(&PlansConfig::default())
    }
}

#[derive(Debug, Default)]
struct UsageInner {
    used: u32,
    counted: HashSet<String>,
}

/// Per-user generation count.
///
/// The server owns the real number; this copy gates requests between
/// refreshes and is overwritten by [`UsageCounter::reconcile`].
#[derive(Debug)]
pub struct UsageCounter {
    plan: String,
    limit: u32,
    inner: Mutex<UsageInner>,
}

impl UsageCounter {
    pub fn new(plan: impl Into<String>, limits: &PlanLimits, used: u32) -> Self {
        let plan = plan.into();
        let limit = limits.limit_for(&plan);
        Self {
            plan,
            limit,
            inner: Mutex::new(UsageInner {
                used,
                counted: HashSet::new(),
            }),
        }
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self) -> u32 {
        self.inner.lock().used
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used())
    }

    /// Fail when the plan has no generations left
    pub fn check(&self) -> Result<()> {
        let used = self.used();
        if used >= self.limit {
            return Err(AppError::PlanLimitExceeded(format!(
                "plan '{}' allows {} generations and {} have been used",
                self.plan, self.limit, used
            )));
        }
        Ok(())
    }

    /// Count one successful job. Returns false if `job_key` was already counted.
    pub fn record_success(&self, job_key: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.counted.insert(job_key.to_string()) {
            debug!(job_key = %job_key, "Usage already recorded for job");
            return false;
        }
        inner.used = inner.used.saturating_add(1);
        debug!(job_key = %job_key, used = inner.used, limit = self.limit, "Usage recorded");
        true
    }

    /// Replace the cached count with the server's value
    pub fn reconcile(&self, server_used: u32) {
        let mut inner = self.inner.lock();
        if inner.used != server_used {
            info!(
                plan = %self.plan,
                cached = inner.used,
                server = server_used,
                "Reconciled usage with server"
            );
        }
        inner.used = server_used;
    }
}
