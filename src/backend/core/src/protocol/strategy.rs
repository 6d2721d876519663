//! Snapshot strategies: when to fold the log into a fresh snapshot.
//!
//! Strategies are pure predicates evaluated on every write attempt, so they
//! must be cheap and side-effect free.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metadata::SnapshotStrategyInfo;
use crate::config::SnapshotConfig;

/// Decides whether a write should also take a snapshot.
pub trait SnapshotStrategy: Send + Sync {
    fn should_snapshot(&self, info: &SnapshotStrategyInfo) -> bool;
}

impl<F> SnapshotStrategy for F
where
    F: Fn(&SnapshotStrategyInfo) -> bool + Send + Sync,
{
    fn should_snapshot(&self, info: &SnapshotStrategyInfo) -> bool {
        self(info)
    }
}

/// Snapshot once at least `every_n_events` entries accumulated since the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdStrategy {
    every_n_events: u64,
}

impl ThresholdStrategy {
    pub fn new(every_n_events: u64) -> Self {
        Self {
            every_n_events: every_n_events.max(1),
        }
    }
}

impl SnapshotStrategy for ThresholdStrategy {
    fn should_snapshot(&self, info: &SnapshotStrategyInfo) -> bool {
        info.entries_since_snapshot() >= self.every_n_events
    }
}

/// Snapshot when the last snapshot is older than `max_age` and new entries exist.
///
/// An entity that never took a snapshot counts as infinitely old.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAgeStrategy {
    max_age: Duration,
}

impl MaxAgeStrategy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn should_snapshot_at(&self, info: &SnapshotStrategyInfo, now: DateTime<Utc>) -> bool {
        if info.entries_since_snapshot() == 0 {
            return false;
        }
        match info.snapshot_updated_time {
            None => true,
            Some(taken) => (now - taken)
                .to_std()
                .map_or(false, |age| age >= self.max_age),
        }
    }
}

impl SnapshotStrategy for MaxAgeStrategy {
    fn should_snapshot(&self, info: &SnapshotStrategyInfo) -> bool {
        self.should_snapshot_at(info, Utc::now())
    }
}

/// Never snapshot; the log is replayed from the beginning.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshot;

impl SnapshotStrategy for NeverSnapshot {
    fn should_snapshot(&self, _info: &SnapshotStrategyInfo) -> bool {
        false
    }
}

/// Fires when any inner strategy fires.
#[derive(Clone, Default)]
pub struct AnyOf {
    strategies: Vec<Arc<dyn SnapshotStrategy>>,
}

impl AnyOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: impl SnapshotStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for AnyOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyOf")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

impl SnapshotStrategy for AnyOf {
    fn should_snapshot(&self, info: &SnapshotStrategyInfo) -> bool {
        self.strategies.iter().any(|s| s.should_snapshot(info))
    }
}

/// Build the strategy described by configuration.
pub fn from_config(config: &SnapshotConfig) -> Arc<dyn SnapshotStrategy> {
    match (config.every_n_events, config.max_age) {
        (None, None) => Arc::new(NeverSnapshot),
        (Some(n), None) => Arc::new(ThresholdStrategy::new(n)),
        (None, Some(age)) => Arc::new(MaxAgeStrategy::new(age)),
        (Some(n), Some(age)) => Arc::new(
            AnyOf::new()
                .with(ThresholdStrategy::new(n))
                .with(MaxAgeStrategy::new(age)),
        ),
    }
}
