//! Retry machinery for storage access.
//!
//! - **BackoffStrategy**: delay calculation between attempts
//! - **RetryPolicy**: backoff plus an optional attempt bound (`None` retries forever)
//! - **RetryLoop**: explicit `Idle -> Attempting -> BackingOff -> ... -> Succeeded`
//!   state machine, cancellable through a [`CancellationToken`]
//! - **IssueTracker**: remembers the storage failure currently blocking progress

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SnaplogError};
use crate::telemetry::metrics as m;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Linear increase in delay (initial + increment * attempt)
    Linear {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
    },
    /// Exponential with random jitter
    ExponentialWithJitter {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::ExponentialWithJitter {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(attempt))
            }
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let delay = initial.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(delay.min(max.as_secs_f64()))
            }
            Self::ExponentialWithJitter {
                initial,
                max,
                multiplier,
                jitter_factor,
            } => {
                let base_delay = initial.as_secs_f64() * multiplier.powi(attempt as i32);
                let capped_delay = base_delay.min(max.as_secs_f64());
                // delay * (1 +/- jitter_factor * random)
                let jitter_range = capped_delay * jitter_factor;
                let jitter = (rand_simple() * 2.0 - 1.0) * jitter_range;
                Duration::from_secs_f64((capped_delay + jitter).max(0.0))
            }
        }
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Create an exponential backoff strategy without jitter.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential {
            initial,
            max,
            multiplier: 2.0,
        }
    }
}

/// Simple pseudo-random number generator for jitter (0.0 to 1.0).
fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry behaviour of the protocol's storage loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff strategy for calculating delays
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Maximum number of attempts; `None` retries until cancelled
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(BackoffStrategy::default())
    }
}

impl RetryPolicy {
    /// Retry until the store recovers or the host cancels.
    pub fn unbounded(backoff: BackoffStrategy) -> Self {
        Self {
            backoff,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` failed attempts.
    pub fn bounded(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            backoff,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry State Machine
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a [`RetryLoop`] currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    BackingOff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Cancelled,
    Exhausted { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Cancelled | Self::Exhausted { .. }
        )
    }
}

/// Drives one retried operation through [`RetryState`].
///
/// ```rust,ignore
/// let mut retry = RetryLoop::new("read", policy, cancel);
/// loop {
///     retry.begin_attempt()?;
///     match op().await {
///         Ok(v) => { retry.succeed(); break v; }
///         Err(_) => retry.back_off().await?,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct RetryLoop {
    operation: &'static str,
    policy: RetryPolicy,
    cancel: CancellationToken,
    state: RetryState,
    attempts: u32,
}

impl RetryLoop {
    pub fn new(operation: &'static str, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            operation,
            policy,
            cancel,
            state: RetryState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Enter `Attempting`. Fails if the loop was cancelled or is finished.
    pub fn begin_attempt(&mut self) -> Result<u32> {
        if self.cancel.is_cancelled() {
            self.state = RetryState::Cancelled;
            return Err(SnaplogError::cancelled(self.operation));
        }
        match self.state {
            RetryState::Idle | RetryState::BackingOff { .. } => {
                self.attempts += 1;
                self.state = RetryState::Attempting {
                    attempt: self.attempts,
                };
                Ok(self.attempts)
            }
            other => Err(SnaplogError::internal(format!(
                "{} cannot start an attempt from {:?}",
                self.operation, other
            ))),
        }
    }

    /// Record success of the current attempt.
    pub fn succeed(&mut self) -> u32 {
        self.state = RetryState::Succeeded {
            attempts: self.attempts,
        };
        self.attempts
    }

    /// Record failure of the current attempt and sleep before the next one.
    ///
    /// Returns `RetriesExhausted` when the policy is bounded and spent, or
    /// `Cancelled` when the token fires during the delay.
    pub async fn back_off(&mut self) -> Result<()> {
        if !self.policy.allows_another(self.attempts) {
            self.state = RetryState::Exhausted {
                attempts: self.attempts,
            };
            return Err(SnaplogError::retries_exhausted(
                self.operation,
                self.attempts,
            ));
        }

        let delay = self
            .policy
            .backoff
            .delay_for_attempt(self.attempts.saturating_sub(1));
        self.state = RetryState::BackingOff {
            attempt: self.attempts,
            delay,
        };
        debug!(
            operation = self.operation,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.state = RetryState::Cancelled;
                Err(SnaplogError::cancelled(self.operation))
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Primary Issues
// ═══════════════════════════════════════════════════════════════════════════════

/// Kinds of storage failure the protocol retries through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ReadFromSnapshotStorageFailed,
    UpdateSnapshotStorageFailed,
    ReadFromEventStorageFailed,
    UpdateEventStorageFailed,
}

impl IssueKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFromSnapshotStorageFailed => "read_from_snapshot_storage_failed",
            Self::UpdateSnapshotStorageFailed => "update_snapshot_storage_failed",
            Self::ReadFromEventStorageFailed => "read_from_event_storage_failed",
            Self::UpdateEventStorageFailed => "update_event_storage_failed",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The storage failure currently blocking a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryIssue {
    pub kind: IssueKind,
    pub message: String,
    /// Consecutive occurrences of this kind.
    pub count: u32,
    pub first_seen: DateTime<Utc>,
}

/// Tracks the latest unresolved [`PrimaryIssue`].
#[derive(Debug, Default)]
pub struct IssueTracker {
    current: Option<PrimaryIssue>,
}

impl IssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Repeats of the same kind bump the counter.
    pub fn record(&mut self, kind: IssueKind, error: &SnaplogError) -> &PrimaryIssue {
        counter!(m::STORAGE_FAILURES_TOTAL, "issue" => kind.as_str()).increment(1);
        error.log();

        let issue = match self.current.take() {
            Some(mut issue) if issue.kind == kind => {
                issue.count += 1;
                issue.message = error.to_string();
                issue
            }
            _ => PrimaryIssue {
                kind,
                message: error.to_string(),
                count: 1,
                first_seen: Utc::now(),
            },
        };
        warn!(
            issue = %issue.kind,
            count = issue.count,
            error = %issue.message,
            "Storage issue"
        );
        self.current.insert(issue)
    }

    /// Clear the current issue after a successful storage round trip.
    pub fn resolve(&mut self) {
        if let Some(issue) = self.current.take() {
            debug!(issue = %issue.kind, count = issue.count, "Storage issue resolved");
        }
    }

    pub fn current(&self) -> Option<&PrimaryIssue> {
        self.current.as_ref()
    }
}
