//! Metric names and descriptions.
//!
//! Counters are recorded through the `metrics` facade. Installing an exporter
//! is up to the host; without one, recording is a no-op.

use metrics::{describe_counter, describe_gauge, Unit};

pub const READS_TOTAL: &str = "snaplog_reads_total";
pub const WRITES_TOTAL: &str = "snaplog_writes_total";
pub const ENTRIES_COMMITTED_TOTAL: &str = "snaplog_entries_committed_total";
pub const STORAGE_FAILURES_TOTAL: &str = "snaplog_storage_failures_total";
pub const NOTIFICATIONS_TOTAL: &str = "snaplog_notifications_total";
pub const SNAPSHOTS_TOTAL: &str = "snaplog_snapshots_total";
pub const APPLY_FAILURES_TOTAL: &str = "snaplog_apply_failures_total";
pub const CONFIRMED_VERSION: &str = "snaplog_confirmed_version";
pub const ERRORS_TOTAL: &str = "snaplog_errors_total";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(READS_TOTAL, Unit::Count, "Completed protocol reads");
    describe_counter!(
        WRITES_TOTAL,
        Unit::Count,
        "Write batches by outcome (committed, reconciled, failed)"
    );
    describe_counter!(
        ENTRIES_COMMITTED_TOTAL,
        Unit::Count,
        "Entries confirmed through local writes"
    );
    describe_counter!(
        STORAGE_FAILURES_TOTAL,
        Unit::Count,
        "Storage failures by issue kind"
    );
    describe_counter!(
        NOTIFICATIONS_TOTAL,
        Unit::Count,
        "Inbound notifications by outcome (applied, discarded, buffered)"
    );
    describe_counter!(SNAPSHOTS_TOTAL, Unit::Count, "Snapshots taken");
    describe_counter!(
        APPLY_FAILURES_TOTAL,
        Unit::Count,
        "Entries the view rejected while advancing the version"
    );
    describe_gauge!(
        CONFIRMED_VERSION,
        Unit::Count,
        "Confirmed version of the last updated replica"
    );
    describe_counter!(ERRORS_TOTAL, Unit::Count, "Errors by code");
}
