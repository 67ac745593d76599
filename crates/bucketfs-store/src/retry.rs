//! C10: retry/backoff layer and adaptive stall-timeout tracking (§4.1).
//!
//! Every object-store RPC in [`crate::client`] is wrapped by
//! [`RetryPolicy::execute`]. Transient failures are retried with
//! exponential backoff and jitter; `PreconditionFailed`/`NotFound` are
//! never retried (§4.1, §7). A per-request deadline is derived from
//! [`StallTracker`], which watches observed latencies and inflates the
//! deadline when requests are timing out.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bucketfs_core::config::{ReadStallConfig, RetryConfig};
use bucketfs_core::error::BucketFsError;
use rand::Rng;
use tracing::{debug, info, warn};

/// Exponential-backoff-with-jitter policy, applied uniformly to every RPC.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(1).as_secs_f64();
        let sleep_secs = base * self.config.multiplier.powi(attempt as i32);
        let capped = sleep_secs.min(self.config.max_retry_sleep_secs as f64);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.25 * capped.max(0.001));
        Duration::from_secs_f64(capped + jitter)
    }

    /// Runs `operation` under the backoff policy and the given stall
    /// tracker. `operation` receives the current per-request deadline and
    /// must itself honor it (e.g. via `tokio::time::timeout`).
    pub async fn execute<F, Fut, T>(
        &self,
        op_name: &str,
        stall: &StallTracker,
        mut operation: F,
    ) -> Result<T, BucketFsError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, BucketFsError>>,
    {
        let mut attempt = 0u32;
        loop {
            let deadline = stall.current_timeout();
            let started = Instant::now();
            let outcome = operation(deadline).await;

            match outcome {
                Ok(value) => {
                    stall.on_success(started.elapsed());
                    if attempt > 0 {
                        info!(op_name, attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    stall.on_stall_if_timeout(&err, started.elapsed(), deadline);

                    if attempt >= self.config.max_retry_attempts {
                        warn!(
                            op_name,
                            attempts = attempt + 1,
                            "retry budget exhausted"
                        );
                        return Err(err);
                    }

                    let sleep_for = self.backoff_for_attempt(attempt);
                    warn!(
                        op_name,
                        attempt,
                        sleep_ms = sleep_for.as_millis(),
                        error = %err,
                        "transient error, backing off"
                    );
                    tokio::time::sleep(sleep_for).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(op_name, error = %err, "non-retryable error");
                    return Err(err);
                }
            }
        }
    }
}

/// Adaptive per-request deadline derived from observed latency at a
/// configured target percentile (§4.1).
pub struct StallTracker {
    config: ReadStallConfig,
    state: Mutex<StallState>,
}

struct StallState {
    current_timeout: Duration,
    samples: VecDeque<Duration>,
}

const MAX_SAMPLES: usize = 128;

impl StallTracker {
    pub fn new(config: ReadStallConfig) -> Self {
        let initial = Duration::from_millis(config.initial_req_timeout_ms);
        Self {
            config,
            state: Mutex::new(StallState {
                current_timeout: initial,
                samples: VecDeque::with_capacity(MAX_SAMPLES),
            }),
        }
    }

    /// The deadline the next request should be cancelled at.
    pub fn current_timeout(&self) -> Duration {
        if !self.config.enable {
            return Duration::from_millis(self.config.max_req_timeout_ms);
        }
        self.state.lock().unwrap().current_timeout
    }

    /// Records a successful request's latency and recomputes the deadline
    /// at the configured target percentile, clamped to [min, max].
    pub fn on_success(&self, elapsed: Duration) {
        if !self.config.enable {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.samples.len() == MAX_SAMPLES {
            state.samples.pop_front();
        }
        state.samples.push_back(elapsed);

        let mut sorted: Vec<Duration> = state.samples.iter().copied().collect();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * self.config.req_target_percentile).round() as usize;
        let percentile_value = sorted[idx.min(sorted.len() - 1)];

        let clamped = percentile_value
            .max(Duration::from_millis(self.config.min_req_timeout_ms))
            .min(Duration::from_millis(self.config.max_req_timeout_ms));
        state.current_timeout = clamped;
    }

    /// Called when a request was cancelled for exceeding its deadline (a
    /// "stall"), as opposed to any other transient error. Inflates the
    /// deadline by `req_increase_rate` percent, clamped to the max.
    pub fn on_stall(&self) {
        if !self.config.enable {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let inflated = state.current_timeout.mul_f64(1.0 + self.config.req_increase_rate / 100.0);
        state.current_timeout = inflated.min(Duration::from_millis(self.config.max_req_timeout_ms));
        warn!(
            new_timeout_ms = state.current_timeout.as_millis() as u64,
            "stall detected, inflating deadline"
        );
    }

    /// Helper used by [`RetryPolicy::execute`]: only treats the error as a
    /// stall (rather than an ordinary transient failure like a 5xx) when
    /// the elapsed time actually reached the deadline that was handed out.
    fn on_stall_if_timeout(&self, err: &BucketFsError, elapsed: Duration, deadline: Duration) {
        if matches!(err, BucketFsError::Transient(msg) if msg.contains("timeout")) || elapsed >= deadline {
            self.on_stall();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_core::config::{ReadStallConfig, RetryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn stall_config() -> ReadStallConfig {
        ReadStallConfig {
            enable: true,
            min_req_timeout_ms: 100,
            max_req_timeout_ms: 5_000,
            initial_req_timeout_ms: 1_000,
            req_target_percentile: 0.99,
            req_increase_rate: 50.0,
        }
    }

    #[test]
    fn stall_tracker_starts_at_initial_timeout() {
        let tracker = StallTracker::new(stall_config());
        assert_eq!(tracker.current_timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn stall_inflates_and_clamps_to_max() {
        let tracker = StallTracker::new(ReadStallConfig {
            max_req_timeout_ms: 1_200,
            ..stall_config()
        });
        tracker.on_stall();
        assert_eq!(tracker.current_timeout(), Duration::from_millis(1_200));
    }

    #[test]
    fn success_converges_timeout_toward_observed_percentile() {
        let tracker = StallTracker::new(stall_config());
        for _ in 0..20 {
            tracker.on_success(Duration::from_millis(200));
        }
        let timeout = tracker.current_timeout();
        assert!(timeout >= Duration::from_millis(100) && timeout <= Duration::from_millis(5_000));
    }

    #[test]
    fn disabled_stall_tracker_always_reports_max() {
        let tracker = StallTracker::new(ReadStallConfig {
            enable: false,
            ..stall_config()
        });
        assert_eq!(tracker.current_timeout(), Duration::from_millis(5_000));
        tracker.on_stall(); // no-op
        assert_eq!(tracker.current_timeout(), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_budget() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retry_sleep_secs: 0,
            multiplier: 1.0,
            max_retry_attempts: 3,
        });
        let stall = StallTracker::new(stall_config());
        let calls = AtomicU32::new(0);

        let result = policy
            .execute("test-op", &stall, |_deadline| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BucketFsError::Transient("boom".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_precondition_failed() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retry_sleep_secs: 0,
            multiplier: 1.0,
            max_retry_attempts: 5,
        });
        let stall = StallTracker::new(stall_config());
        let calls = AtomicU32::new(0);

        let result: Result<(), BucketFsError> = policy
            .execute("test-op", &stall, |_deadline| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BucketFsError::PreconditionFailed("stale".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retry_sleep_secs: 0,
            multiplier: 1.0,
            max_retry_attempts: 2,
        });
        let stall = StallTracker::new(stall_config());
        let calls = AtomicU32::new(0);

        let result: Result<(), BucketFsError> = policy
            .execute("test-op", &stall, |_deadline| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BucketFsError::Transient("still down".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
