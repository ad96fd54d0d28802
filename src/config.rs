//! Configuration system for the `tda` tool.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Parser settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ParserConfig {
    /// Regex for dump timestamps; `None` uses the built-in pattern
    pub date_pattern: Option<String>,
    /// encoding_rs label used to decode log files
    pub encoding: String,
    /// Number of the first `Dump No. N`
    pub dump_counter_start: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            date_pattern: None,
            encoding: "utf-8".to_string(),
            dump_counter_start: 1,
        }
    }
}

/// Long-running thread detection settings
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LongRunningConfig {
    /// Only thread names matching this regex are reported
    pub name_filter: Option<String>,
    /// Only report threads whose stack did not change between dumps
    pub identical_stacks: bool,
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub parser: ParserConfig,
    pub long_running: LongRunningConfig,
}

impl Config {
    /// Load config from file, returning default config if file doesn't exist
    pub fn load() -> Self {
        let mut config = Self::load_from_path(Self::config_path());
        config.apply_env_overrides();
        config
    }

    /// Load config from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring invalid config {}: {err}", path.display());
                Self::default()
            }),
            Err(err) => {
                log::warn!("cannot read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the config file path (~/.config/tda/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tda").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(pattern) = env::var("TDA_DATE_PATTERN") {
            self.parser.date_pattern = Some(pattern);
        }
        if let Ok(encoding) = env::var("TDA_ENCODING") {
            self.parser.encoding = encoding;
        }
        // TDA_IDENTICAL_STACKS=1 only reports threads with unchanged stacks
        if env::var("TDA_IDENTICAL_STACKS").map(|v| v == "1").unwrap_or(false) {
            self.long_running.identical_stacks = true;
        }
    }
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# tda - thread dump analyzer configuration
# Place this file at ~/.config/tda/config.toml

[parser]
# Regex matching the timestamp printed before a dump. The last match before
# the "Full thread dump" line becomes the dump's start time.
# Default recognises "2024-01-31 12:34:56" and "Tue Feb 06 17:27:04 CET 2007".
# date_pattern = '\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}'

# Encoding of the log files (any WHATWG label, e.g. "windows-1252")
encoding = "utf-8"

# Number of the first dump ("Dump No. 1")
dump_counter_start = 1

[long_running]
# Only consider threads whose name matches this regex
# name_filter = '^http-'

# Only report threads whose stack is identical in every dump
identical_stacks = false

# Environment variable overrides:
# TDA_DATE_PATTERN=<regex>  - Timestamp pattern
# TDA_ENCODING=<label>      - Log file encoding
# TDA_IDENTICAL_STACKS=1    - Identical stacks only
"#
    .to_string()
}

/// Print the default config to stdout
pub fn print_default_config() {
    print!("{}", generate_default_config());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_to_defaults() {
        let config = Config::from_toml(&generate_default_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("[long_running]\nidentical_stacks = true\n").unwrap();
        assert!(config.long_running.identical_stacks);
        assert_eq!(config.parser.encoding, "utf-8");
        assert_eq!(config.parser.dump_counter_start, 1);
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            "[parser]\ndate_pattern = '\\d+'\nencoding = \"latin1\"\ndump_counter_start = 0\n\n[long_running]\nname_filter = \"^http\"\n",
        )
        .unwrap();
        assert_eq!(config.parser.date_pattern.as_deref(), Some("\\d+"));
        assert_eq!(config.parser.encoding, "latin1");
        assert_eq!(config.parser.dump_counter_start, 0);
        assert_eq!(config.long_running.name_filter.as_deref(), Some("^http"));
    }

    #[test]
    fn test_missing_path_gives_defaults() {
        assert_eq!(Config::load_from_path(None), Config::default());
        assert_eq!(
            Config::load_from_path(Some(PathBuf::from("/nonexistent/tda/config.toml"))),
            Config::default()
        );
    }

    #[test]
    fn test_config_path_ends_with_tda() {
        if let Some(path) = Config::config_path() {
            assert!(path.ends_with("tda/config.toml"));
        }
    }
}
