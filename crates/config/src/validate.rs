//! Semantic checks on a loaded configuration.

use crate::schema::JobdeckConfig;

/// Upper bound of `scheduler.stale_after_secs` (one year).
pub const MAX_STALE_AFTER_SECS: u64 = 365 * 24 * 60 * 60;

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
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "scheduler.poll_interval_secs"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

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

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &JobdeckConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let s = &config.scheduler;

    if !(1..=3600).contains(&s.poll_interval_secs) {
        result.push(
            Severity::Error,
            "scheduler.poll_interval_secs",
            format!("must be between 1 and 3600, got {}", s.poll_interval_secs),
        );
    }
    if s.max_concurrent_jobs == 0 {
        result.push(
            Severity::Error,
            "scheduler.max_concurrent_jobs",
            "must be greater than 0",
        );
    }
    if s.writeback_attempts == 0 {
        result.push(
            Severity::Error,
            "scheduler.writeback_attempts",
            "must be greater than 0",
        );
    }
    if s.output_summary_chars == 0 {
        result.push(
            Severity::Error,
            "scheduler.output_summary_chars",
            "must be greater than 0",
        );
    }
    if s.stale_after_secs > MAX_STALE_AFTER_SECS {
        result.push(
            Severity::Error,
            "scheduler.stale_after_secs",
            format!(
                "must be at most {MAX_STALE_AFTER_SECS}, got {}",
                s.stale_after_secs
            ),
        );
    } else if s.stale_after_secs < s.poll_interval_secs.saturating_mul(2) {
        result.push(
            Severity::Warning,
            "scheduler.stale_after_secs",
            "shorter than two poll intervals; jobs still running elsewhere may be reset at startup",
        );
    }
    if s.history_limit == 0 {
        result.push(
            Severity::Warning,
            "scheduler.history_limit",
            "0 keeps no run history",
        );
    }

    let db = &config.database;
    if db.url.trim().is_empty() {
        result.push(Severity::Error, "database.url", "must not be empty");
    } else if !db.url.starts_with("sqlite:") {
        result.push(
            Severity::Error,
            "database.url",
            format!("only sqlite URLs are supported, got '{}'", db.url),
        );
    }
    if db.max_connections == 0 {
        result.push(
            Severity::Error,
            "database.max_connections",
            "must be greater than 0",
        );
    }

    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_clean() {
        let result = validate(&JobdeckConfig::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn poll_interval_bounds() {
        for bad in [0, 3601] {
            let mut cfg = JobdeckConfig::default();
            cfg.scheduler.poll_interval_secs = bad;
            let result = validate(&cfg);
            assert!(result.has_errors());
            assert_eq!(
                result.diagnostics[0].path,
                "scheduler.poll_interval_secs"
            );
        }
        let mut cfg = JobdeckConfig::default();
        cfg.scheduler.poll_interval_secs = 3600;
        cfg.scheduler.stale_after_secs = 7200;
        assert!(!validate(&cfg).has_errors());
    }

    #[test]
    fn zero_workers_and_non_sqlite_url_are_errors() {
        let mut cfg = JobdeckConfig::default();
        cfg.scheduler.max_concurrent_jobs = 0;
        cfg.database.url = "postgres://localhost/jobs".into();
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn huge_stale_window_is_an_error() {
        let mut cfg = JobdeckConfig::default();
        cfg.scheduler.stale_after_secs = MAX_STALE_AFTER_SECS;
        assert!(!validate(&cfg).has_errors());

        cfg.scheduler.stale_after_secs = 10_000_000_000_000;
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 1);
        assert_eq!(result.diagnostics[0].path, "scheduler.stale_after_secs");
    }

    #[test]
    fn short_stale_window_is_a_warning() {
        let mut cfg = JobdeckConfig::default();
        cfg.scheduler.stale_after_secs = 5;
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(result.diagnostics[0].to_string().starts_with("warning"));
    }
}
