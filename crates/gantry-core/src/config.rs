//! The configuration surface the engine consumes. Defaults can come from an
//! optional `gantry.yaml` in the working directory; explicit settings (CLI
//! flags) always win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::log::Level;

pub const DEFAULT_RESULT_DIR: &str = "testing-results";
pub const CONFIG_FILE: &str = "gantry.yaml";

/// One step of the running suite filter. Steps apply left-to-right in the
/// order they were given on the command line.
#[derive(Debug, Clone)]
pub struct TagFilter {
    pub include: bool,
    pub pattern: Regex,
}

impl TagFilter {
    pub fn include(pattern: &str) -> anyhow::Result<Self> {
        Ok(Self {
            include: true,
            pattern: Regex::new(pattern)
                .with_context(|| format!("invalid include-tags pattern: {pattern}"))?,
        })
    }

    pub fn exclude(pattern: &str) -> anyhow::Result<Self> {
        Ok(Self {
            include: false,
            pattern: Regex::new(pattern)
                .with_context(|| format!("invalid exclude-tags pattern: {pattern}"))?,
        })
    }
}

/// Recognized engine options.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Restrict the schedule to suites defined under this directory.
    pub directory: Option<PathBuf>,
    /// Echo sandboxed stdout/stderr live.
    pub stream: bool,
    /// Repeated `-v` count; raises message visibility above `Info`.
    pub verbose: u8,
    /// Where the result handler persists its tree.
    pub result_path: PathBuf,
    /// Ordered include/exclude tag filters.
    pub tag_filters: Vec<TagFilter>,
    /// Deadline per sandboxed test body; a child still running at the
    /// deadline is killed and the test fails.
    pub timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            directory: None,
            stream: false,
            verbose: 0,
            result_path: PathBuf::from(DEFAULT_RESULT_DIR),
            tag_filters: Vec::new(),
            timeout: None,
        }
    }
}

impl RunConfig {
    pub fn verbosity(&self) -> Level {
        Level::from_verbosity(self.verbose)
    }

    /// Start from file defaults instead of the built-ins.
    pub fn from_defaults(defaults: FileDefaults) -> Self {
        let mut config = Self::default();
        if let Some(result_path) = defaults.result_path {
            config.result_path = result_path;
        }
        if let Some(stream) = defaults.stream {
            config.stream = stream;
        }
        if let Some(verbose) = defaults.verbose {
            config.verbose = verbose;
        }
        if let Some(secs) = defaults.timeout_secs {
            config.timeout = Some(Duration::from_secs(secs));
        }
        config
    }
}

/// Optional defaults loaded from `gantry.yaml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDefaults {
    pub result_path: Option<PathBuf>,
    pub stream: Option<bool>,
    pub verbose: Option<u8>,
    pub timeout_secs: Option<u64>,
}

impl FileDefaults {
    /// Load from `dir/gantry.yaml`; a missing file is an empty default set.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.result_path, PathBuf::from("testing-results"));
        assert!(!config.stream);
        assert_eq!(config.verbosity(), Level::Info);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn file_defaults_feed_the_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "result_path: out\nstream: true\ntimeout_secs: 30\n",
        )
        .unwrap();
        let defaults = FileDefaults::load(dir.path()).unwrap();
        let config = RunConfig::from_defaults(defaults);
        assert_eq!(config.result_path, PathBuf::from("out"));
        assert!(config.stream);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn missing_file_is_empty_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = FileDefaults::load(dir.path()).unwrap();
        assert!(defaults.result_path.is_none());
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "result_dir: typo\n").unwrap();
        assert!(FileDefaults::load(dir.path()).is_err());
    }

    #[test]
    fn bad_tag_pattern_is_an_error() {
        assert!(TagFilter::include("[unclosed").is_err());
        assert!(TagFilter::exclude("ok.*").is_ok());
    }
}
