//! Timestamp recognition for dump start times.
//!
//! Thread dumps are usually embedded in application logs, and the only hint at
//! when a dump was taken is a timestamp somewhere in the preamble (jstack
//! prints one on the line before `Full thread dump`, log frameworks prefix
//! every line). The matcher keeps the format free-form: whatever text matches
//! the pattern is stored verbatim as the dump's start time.

use regex::Regex;

use crate::error::{Result, TdaError};

/// Default pattern: ISO-like `2024-01-31 12:34:56[.123]` / `2024-01-31T12:34:56Z`
/// and `java.util.Date#toString` style `Tue Feb 06 17:27:04 CET 2007`.
pub const DEFAULT_DATE_PATTERN: &str = r"\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?Z?|(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun) (?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) +\d{1,2} \d{2}:\d{2}:\d{2}(?: [A-Z]{2,5})? \d{4}";

#[derive(Debug, Clone)]
pub struct DateMatcher {
    pattern: Regex,
}

impl DateMatcher {
    /// Build a matcher from a user supplied pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| TdaError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { pattern })
    }

    /// Returns the first timestamp found in `line`, if any.
    pub fn find(&self, line: &str) -> Option<String> {
        self.pattern.find(line).map(|m| m.as_str().to_string())
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for DateMatcher {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_DATE_PATTERN).expect("default date pattern compiles"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jstack_preamble_timestamp() {
        let matcher = DateMatcher::default();
        assert_eq!(
            matcher.find("2026-01-20 17:29:40"),
            Some("2026-01-20 17:29:40".to_string())
        );
    }

    #[test]
    fn test_log_prefixed_timestamp_with_millis() {
        let matcher = DateMatcher::default();
        let line = "2010-07-05 11:22:33,123 INFO  [main] dumping threads";
        assert_eq!(matcher.find(line), Some("2010-07-05 11:22:33,123".to_string()));
    }

    #[test]
    fn test_date_to_string_format() {
        let matcher = DateMatcher::default();
        let line = "Full thread dump [Tue Feb 06 17:27:04 CET 2007] (Java HotSpot(TM) Server VM)";
        assert_eq!(
            matcher.find(line),
            Some("Tue Feb 06 17:27:04 CET 2007".to_string())
        );
    }

    #[test]
    fn test_no_timestamp() {
        let matcher = DateMatcher::default();
        assert_eq!(matcher.find("JNI global references: 42"), None);
    }

    #[test]
    fn test_custom_pattern() {
        let matcher = DateMatcher::new(r"\[\d+\]").unwrap();
        assert_eq!(matcher.find("at [1712345678] dump"), Some("[1712345678]".to_string()));
        assert_eq!(matcher.pattern(), r"\[\d+\]");
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = DateMatcher::new("([").unwrap_err();
        assert!(matches!(err, TdaError::InvalidPattern { .. }));
    }
}
