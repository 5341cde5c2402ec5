//! Metric name and label definitions.
//!
//! This module defines all metric names and common label keys used throughout
//! gatekeeper. Centralizing these definitions keeps names consistent between
//! the recording crates and whatever dashboard reads them.

/// Log tailing metrics
pub mod tail {
    /// Total number of non-empty lines emitted by tail readers
    pub const LINES_TOTAL: &str = "gatekeeper_tail_lines_total";
    /// Total bytes consumed from log files
    pub const BYTES_TOTAL: &str = "gatekeeper_tail_bytes_total";
    /// Number of times a reader detected truncation or rotation
    pub const ROTATIONS_TOTAL: &str = "gatekeeper_tail_rotations_total";
    /// Read or stat failures (retried on the next tick)
    pub const ERRORS_TOTAL: &str = "gatekeeper_tail_errors_total";
    /// Number of running reader loops
    pub const READERS_ACTIVE: &str = "gatekeeper_tail_readers_active";
}

/// Event extraction metrics
pub mod events {
    /// Total number of typed events extracted, labelled by `kind`
    pub const EXTRACTED_TOTAL: &str = "gatekeeper_events_extracted_total";
    /// Lines that matched no grammar
    pub const DROPPED_TOTAL: &str = "gatekeeper_events_dropped_total";
}

/// Correlation metrics
pub mod correlation {
    /// Correlation outcomes, labelled by `outcome` and `strategy`
    pub const OUTCOMES_TOTAL: &str = "gatekeeper_correlation_outcomes_total";
    /// Ambiguous sole-candidate lookups that were refused
    pub const ABSTENTIONS_TOTAL: &str = "gatekeeper_correlation_abstentions_total";
    /// Registry failures while correlating
    pub const ERRORS_TOTAL: &str = "gatekeeper_correlation_errors_total";
    /// Transient connection entries expired by the sweep
    pub const CONNECTIONS_EXPIRED_TOTAL: &str = "gatekeeper_connections_expired_total";
    /// Number of tracked live connections
    pub const CONNECTIONS_TRACKED: &str = "gatekeeper_connections_tracked";
}

/// Completion (one-time side effect) metrics
pub mod completion {
    /// Accounts that reached the rewarded state
    pub const COMPLETED_TOTAL: &str = "gatekeeper_completions_total";
    /// Sink failures, labelled by `sink`
    pub const SINK_ERRORS_TOTAL: &str = "gatekeeper_completion_sink_errors_total";
    /// Sink delivery duration in seconds, labelled by `sink`
    pub const SINK_DURATION_SECONDS: &str = "gatekeeper_completion_sink_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const SOURCE: &str = "source";
    pub const KIND: &str = "kind";
    pub const OUTCOME: &str = "outcome";
    pub const STRATEGY: &str = "strategy";
    pub const SINK: &str = "sink";
}
