//! Per-handler duration estimates from prior runs.
//!
//! A run that completes is a measurement and is blended into the average.
//! A run cut off at a deadline only shows the handler needs *at least* that
//! long; it raises the estimate to that bound and marks it as a bound. The
//! next completed run replaces a bound instead of blending with it.
//!
//! A handler rejected for its estimate is let through again once
//! `retry_after` has passed since it last ran, so an estimate never locks a
//! handler out for good.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::lifecycle::InstanceId;

/// Weight of the newest observation.
const DEFAULT_ALPHA: f64 = 0.3;

/// Default time after which an over-limit handler gets a trial run.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct Estimate {
    duration: Duration,
    /// `duration` is a lower bound from a cut-off run.
    lower_bound: bool,
    last_run: Instant,
}

impl Estimate {
    fn exceeds(&self, limit: Duration) -> bool {
        if self.lower_bound {
            self.duration >= limit
        } else {
            self.duration > limit
        }
    }
}

/// Exponentially weighted moving average of handler run times.
#[derive(Debug)]
pub struct DurationEstimator {
    alpha: f64,
    retry_after: Duration,
    estimates: Mutex<HashMap<InstanceId, Estimate>>,
}

impl DurationEstimator {
    /// `alpha` is clamped to `(0, 1]`.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            retry_after: DEFAULT_RETRY_AFTER,
            estimates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Records a run that completed after `observed`.
    pub fn record(&self, instance: InstanceId, observed: Duration) {
        let mut estimates = self.estimates.lock();
        let duration = match estimates.get(&instance) {
            Some(previous) if !previous.lower_bound => {
                let blended = self.alpha * observed.as_secs_f64()
                    + (1.0 - self.alpha) * previous.duration.as_secs_f64();
                Duration::from_secs_f64(blended)
            }
            _ => observed,
        };
        estimates.insert(
            instance,
            Estimate {
                duration,
                lower_bound: false,
                last_run: Instant::now(),
            },
        );
    }

    /// Records a run that was cut off after `ran_for`.
    pub fn record_cutoff(&self, instance: InstanceId, ran_for: Duration) {
        let mut estimates = self.estimates.lock();
        let duration = estimates
            .get(&instance)
            .map_or(ran_for, |previous| previous.duration.max(ran_for));
        estimates.insert(
            instance,
            Estimate {
                duration,
                lower_bound: true,
                last_run: Instant::now(),
            },
        );
    }

    pub fn estimate(&self, instance: InstanceId) -> Option<Duration> {
        self.estimates.lock().get(&instance).map(|e| e.duration)
    }

    /// Returns the estimate if it does not fit in `limit` and the handler
    /// ran within `retry_after`.
    ///
    /// Once `retry_after` has passed the dispatch is admitted as a trial and
    /// the clock restarts, so concurrent dispatches keep being rejected
    /// until the trial reports back.
    pub fn over_limit(&self, instance: InstanceId, limit: Duration) -> Option<Duration> {
        let mut estimates = self.estimates.lock();
        let estimate = estimates.get_mut(&instance)?;
        if !estimate.exceeds(limit) {
            return None;
        }
        let now = Instant::now();
        if now.duration_since(estimate.last_run) < self.retry_after {
            return Some(estimate.duration);
        }
        debug!(
            instance = %instance,
            estimate = ?estimate.duration,
            "Admitting a trial run despite the estimate"
        );
        estimate.last_run = now;
        None
    }

    pub fn forget(&self, instance: InstanceId) {
        self.estimates.lock().remove(&instance);
    }
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}
