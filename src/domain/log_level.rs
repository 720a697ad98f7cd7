use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain severity of a forwarded log event.
///
/// This is distinct from the `LogLevel` used to configure the relay's own
/// tracing output. `Severity` is the normalized level carried by events read
/// off the stream. Variants are declared in ascending order of importance so
/// the derived `Ord` matches operator intuition (`Trace < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 6] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Severity {
    fn from(raw: &str) -> Self {
        map_level(raw)
    }
}

/// Map an arbitrary producer-supplied level label onto `Severity`.
///
/// Case-insensitive and whitespace-tolerant. Anything unrecognized, including
/// the empty string, maps to `Severity::Info`. Never fails.
pub fn map_level(raw: &str) -> Severity {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Severity::Trace,
        "DEBUG" => Severity::Debug,
        "INFO" | "INFORMATION" | "NOTICE" => Severity::Info,
        "WARN" | "WARNING" => Severity::Warn,
        "ERROR" | "ERR" => Severity::Error,
        "CRITICAL" | "CRIT" | "FATAL" | "ALERT" | "EMERGENCY" | "PANIC" => Severity::Critical,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_synonyms_are_case_insensitive() {
        for raw in ["warn", "WARNING", "Warn", "  warning "] {
            assert_eq!(map_level(raw), Severity::Warn, "input: {raw:?}");
        }
    }

    #[test]
    fn test_critical_synonyms() {
        assert_eq!(map_level("FATAL"), Severity::Critical);
        assert_eq!(map_level("critical"), Severity::Critical);
        assert_eq!(map_level("panic"), Severity::Critical);
    }

    #[test]
    fn test_unknown_and_empty_map_to_info() {
        assert_eq!(map_level(""), Severity::Info);
        assert_eq!(map_level("verbose"), Severity::Info);
        assert_eq!(map_level("42"), Severity::Info);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::ALL.iter().max(), Some(&Severity::Critical));
    }

    #[test]
    fn test_from_str_round_trips_canonical_names() {
        for severity in Severity::ALL {
            assert_eq!(Severity::from(severity.as_str()), severity);
        }
    }
}
