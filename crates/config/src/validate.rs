//! Configuration validation.
//!
//! Checks a loaded [`GatekeeperConfig`] for values that parse fine but would
//! make the engine misbehave (no sources, zero intervals, inverted windows).

use std::collections::HashSet;

use crate::schema::GatekeeperConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "logs.poll_interval_ms"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a configuration.
pub fn validate(config: &GatekeeperConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.logs.sources.is_empty() {
        result.push(
            Severity::Warning,
            "logs.sources",
            "no log sources configured, nothing will be tailed",
        );
    }

    let mut names = HashSet::new();
    for (i, source) in config.logs.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            result.push(
                Severity::Error,
                format!("logs.sources[{i}].name"),
                "source name must not be empty",
            );
        } else if !names.insert(source.name.as_str()) {
            result.push(
                Severity::Error,
                format!("logs.sources[{i}].name"),
                format!("duplicate source name \"{}\"", source.name),
            );
        }
        if source.prefix.trim().is_empty() {
            result.push(
                Severity::Error,
                format!("logs.sources[{i}].prefix"),
                "file prefix must not be empty",
            );
        }
    }

    if config.logs.poll_interval_ms == 0 {
        result.push(
            Severity::Error,
            "logs.poll_interval_ms",
            "poll interval must be greater than zero",
        );
    }
    if config.logs.probe_interval_ms == 0 {
        result.push(
            Severity::Error,
            "logs.probe_interval_ms",
            "probe interval must be greater than zero",
        );
    }
    if config.connections.sweep_interval_secs == 0 {
        result.push(
            Severity::Error,
            "connections.sweep_interval_secs",
            "sweep interval must be greater than zero",
        );
    }

    if config.correlation.sole_candidate_window_secs < config.correlation.recent_window_secs {
        result.push(
            Severity::Warning,
            "correlation.sole_candidate_window_secs",
            "sole-candidate window is shorter than the recent-IP window",
        );
    }

    if config.metrics.enabled && config.metrics.listen.is_none() {
        result.push(
            Severity::Warning,
            "metrics.listen",
            "metrics enabled without a listen address, nothing will be exported",
        );
    }

    result
}
