//! Error handling for Snaplog Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - Error chaining through an optional boxed source
//! - Retryability and severity classification used by the retry loops
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! Storage failures and concurrency conflicts never reach the callers of
//! `read`/`write` on the protocol: they are internal retry triggers. The only
//! errors surfaced there are cancellation and an exhausted (explicitly bounded)
//! retry policy.
//!
//! # Usage
//!
//! ```rust,ignore
//! use snaplog_core::error::{ErrorContext, Result};
//!
//! fn load(path: &std::path::Path) -> Result<String> {
//!     std::fs::read_to_string(path).context("reading record file")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Snaplog operations.
pub type Result<T> = std::result::Result<T, SnaplogError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Concurrency (1000-1099)
    ConcurrencyConflict,
    EventVersionConflict,

    // Storage (2000-2099)
    StorageUnavailable,
    RecordCorrupted,
    SegmentUnavailable,

    // Serialization (2200-2299)
    SerializationError,
    UnknownEventType,

    // Control flow (3000-3099)
    Cancelled,
    RetriesExhausted,

    // Configuration (5000-5099)
    ConfigurationError,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ConcurrencyConflict => 1000,
            Self::EventVersionConflict => 1001,

            Self::StorageUnavailable => 2000,
            Self::RecordCorrupted => 2001,
            Self::SegmentUnavailable => 2002,

            Self::SerializationError => 2200,
            Self::UnknownEventType => 2201,

            Self::Cancelled => 3000,
            Self::RetriesExhausted => 3001,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Whether an operation failing with this code may succeed on a later attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict
                | Self::EventVersionConflict
                | Self::StorageUnavailable
                | Self::SegmentUnavailable
        )
    }

    /// Get the error category for metrics.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::ConcurrencyConflict | Self::EventVersionConflict => "concurrency",
            Self::StorageUnavailable | Self::RecordCorrupted | Self::SegmentUnavailable => {
                "storage"
            }
            Self::SerializationError | Self::UnknownEventType => "serialization",
            Self::Cancelled | Self::RetriesExhausted => "control",
            Self::ConfigurationError => "configuration",
            Self::InternalError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        write!(f, "{}", s.trim_matches('"'))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Error severity levels for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected during normal operation (conflicts, cancellation)
    Low,
    /// Transient infrastructure trouble
    Medium,
    /// Data or configuration problems that need attention
    High,
}

impl ErrorSeverity {
    /// Get severity from error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ConcurrencyConflict
            | ErrorCode::EventVersionConflict
            | ErrorCode::Cancelled => Self::Low,

            ErrorCode::StorageUnavailable
            | ErrorCode::SegmentUnavailable
            | ErrorCode::RetriesExhausted => Self::Medium,

            ErrorCode::RecordCorrupted
            | ErrorCode::SerializationError
            | ErrorCode::UnknownEventType
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Snaplog Core.
#[derive(Error, Debug)]
pub struct SnaplogError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SnaplogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl SnaplogError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// The primary store rejected a write because the expected tag is stale.
    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConcurrencyConflict, message)
    }

    /// The event store's entry count did not match the expected version.
    pub fn event_version_conflict(expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorCode::EventVersionConflict,
            format!("expected event stream version {}, found {}", expected, actual),
        )
    }

    /// A store could not be reached or failed the operation.
    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::StorageUnavailable, message)
    }

    /// A requested log segment cannot be served.
    pub fn segment_unavailable(from: u64, to: u64, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SegmentUnavailable,
            format!("log segment [{}, {}) unavailable: {}", from, to, reason),
        )
    }

    /// The operation was cancelled by the host.
    pub fn cancelled(operation: &'static str) -> Self {
        Self::new(ErrorCode::Cancelled, format!("{} cancelled", operation))
    }

    /// A bounded retry policy ran out of attempts.
    pub fn retries_exhausted(operation: &'static str, attempts: u32) -> Self {
        Self::new(
            ErrorCode::RetriesExhausted,
            format!("{} gave up after {} attempts", operation, attempts),
        )
    }

    /// Invalid or inconsistent configuration.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Whether this is an optimistic-concurrency conflict on the primary store.
    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::ConcurrencyConflict
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    source = ?self.source,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            crate::telemetry::metrics::ERRORS_TOTAL,
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to results.
pub trait ErrorContext<T> {
    /// Wrap the error as a storage failure with a message.
    fn context(self, message: impl Into<Cow<'static, str>>) -> Result<T>;

    /// Wrap the error with a specific code and message.
    fn with_code(self, code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<Cow<'static, str>>) -> Result<T> {
        self.with_code(ErrorCode::StorageUnavailable, message)
    }

    fn with_code(self, code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|e| SnaplogError::new(code, message).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<Cow<'static, str>>) -> Result<T> {
        self.ok_or_else(|| SnaplogError::internal(message))
    }

    fn with_code(self, code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Result<T> {
        self.ok_or_else(|| SnaplogError::new(code, message))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for SnaplogError {
    fn from(err: serde_json::Error) -> Self {
        SnaplogError::new(ErrorCode::SerializationError, "JSON encoding failed").with_source(err)
    }
}

impl From<std::io::Error> for SnaplogError {
    fn from(err: std::io::Error) -> Self {
        SnaplogError::new(ErrorCode::StorageUnavailable, "I/O failure").with_source(err)
    }
}

impl From<config::ConfigError> for SnaplogError {
    fn from(err: config::ConfigError) -> Self {
        SnaplogError::new(ErrorCode::ConfigurationError, "invalid configuration").with_source(err)
    }
}
