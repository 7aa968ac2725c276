//! Logging configuration
//!
//! A C host has no way to hand the library a logging configuration, so
//! besides the presets there is [`LogConfig::from_env`], driven by
//! [`LOG_DIR_VAR`] and [`LOG_FORMAT_VAR`].

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Directory for rolling JSONL log files; unset means no file output
pub const LOG_DIR_VAR: &str = "LOGOSDELIVERY_LOG_DIR";

/// Console format: `json`, `pretty`, `color` or `off`
pub const LOG_FORMAT_VAR: &str = "LOGOSDELIVERY_LOG_FORMAT";

/// Where and how log lines are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive applied when `RUST_LOG` is unset
    pub filter: String,

    /// Console (stderr) format, `None` disables console output
    pub console: Option<ConsoleFormat>,

    pub file: Option<FileConfig>,

    /// Shape of JSON lines, on the console and in files
    pub fields: JsonFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::at("info")
    }
}

impl LogConfig {
    /// JSON lines on stderr, filtered at `filter`
    pub fn at(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            console: Some(ConsoleFormat::Json),
            file: None,
            fields: JsonFields::default(),
        }
    }

    /// Colored human-readable console at debug
    pub fn development() -> Self {
        Self {
            console: Some(ConsoleFormat::Color),
            ..Self::at("debug")
        }
    }

    /// Files only, with source locations
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: None,
            file: Some(FileConfig::in_dir(log_dir)),
            fields: JsonFields {
                location: true,
                ..JsonFields::default()
            },
            ..Self::at("info")
        }
    }

    /// Warnings and errors only, readable in test output
    pub fn testing() -> Self {
        Self {
            console: Some(ConsoleFormat::Pretty),
            ..Self::at("warn")
        }
    }

    /// [`LogConfig::at`] adjusted by the process environment
    pub fn from_env(filter: impl Into<String>) -> Self {
        Self::from_lookup(filter, |name| std::env::var(name).ok())
    }

    /// [`LogConfig::at`] adjusted by `lookup`, which resolves variable names
    ///
    /// An unrecognized format keeps the JSON console.
    pub fn from_lookup<F>(filter: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::at(filter);
        if let Some(dir) = lookup(LOG_DIR_VAR).filter(|dir| !dir.trim().is_empty()) {
            config.file = Some(FileConfig::in_dir(PathBuf::from(dir)));
        }
        if let Some(format) = lookup(LOG_FORMAT_VAR) {
            match format.trim().to_ascii_lowercase().as_str() {
                "off" | "none" => config.console = None,
                other => {
                    if let Ok(format) = other.parse() {
                        config.console = Some(format);
                    }
                }
            }
        }
        config
    }
}

/// Console line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable, no escape codes
    Pretty,
    /// Human-readable with ANSI colors
    Color,
}

impl FromStr for ConsoleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ConsoleFormat::Json),
            "pretty" => Ok(ConsoleFormat::Pretty),
            "color" => Ok(ConsoleFormat::Color),
            other => Err(format!("unknown console format {other:?}")),
        }
    }
}

/// Rolling JSONL files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File names are `{prefix}.{date}.log`
    pub prefix: String,
    pub rotation: FileRotation,
    /// Oldest files beyond this count are deleted
    pub keep: Option<usize>,
}

impl FileConfig {
    pub fn in_dir(directory: PathBuf) -> Self {
        Self {
            directory,
            prefix: "logosdelivery".to_string(),
            rotation: FileRotation::Daily,
            keep: Some(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Which fields a JSON line carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFields {
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Every enclosing span, not just the current one
    pub span_list: bool,
    /// Thread name and ID; callbacks run on runtime workers
    pub thread: bool,
    /// Source file and line
    pub location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            span_list: true,
            thread: true,
            location: false,
        }
    }
}
