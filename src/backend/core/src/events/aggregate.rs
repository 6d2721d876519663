//! Aggregate trait for views rebuilt from a log of entries.
//!
//! Aggregates are the materialized views replicas keep confirmed. Each one
//! starts at its `Default` state and folds entries via `apply`.

use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Apply Error
// =============================================================================

/// A view rejected an entry.
///
/// The protocol never blocks confirmation on this: the entry still counts as
/// applied and the version still advances. See [`crate::protocol::adaptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("apply failed: {message}")]
pub struct ApplyError {
    pub message: String,
}

impl ApplyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Aggregate Trait
// =============================================================================

/// Trait for views that can be reconstructed from a sequence of entries.
///
/// Given the same entry stream the resulting state must be deterministic.
/// `Clone` is used to take snapshots.
pub trait Aggregate<E>: Default + Clone + Send + Sync + 'static {
    /// Apply a single entry to mutate state.
    ///
    /// Implementations must be pure functions of `(self, entry) -> self'`.
    fn apply(&mut self, entry: &E) -> Result<(), ApplyError>;
}

/// Transition function injected into the protocol.
pub type ApplyFn<V, E> = Arc<dyn Fn(&mut V, &E) -> Result<(), ApplyError> + Send + Sync>;

/// Wrap an [`Aggregate`] implementation as an [`ApplyFn`].
pub fn apply_fn<V, E>() -> ApplyFn<V, E>
where
    V: Aggregate<E>,
    E: 'static,
{
    Arc::new(|view: &mut V, entry: &E| view.apply(entry))
}

/// Fold entries into a view, counting rejected entries instead of stopping.
pub fn replay<V, E>(view: &mut V, entries: &[E], apply: &ApplyFn<V, E>) -> usize {
    entries
        .iter()
        .filter(|entry| apply(view, entry).is_err())
        .count()
}
