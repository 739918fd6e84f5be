use std::{env, path::PathBuf, str::FromStr};

use log::Level;
use serde::Deserialize;

/// Serialization format of emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// One JSON object per line.
    Json,
    /// `key=value` pairs, one record per line.
    #[default]
    Text,
}

impl Format {
    /// `"json"` selects [`Format::Json`], anything else falls back to [`Format::Text`].
    pub fn parse(value: &str) -> Format {
        if value.trim().eq_ignore_ascii_case("json") {
            Format::Json
        } else {
            Format::Text
        }
    }
}

/// Resolved minimum level together with the raw value when it had to fall back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedLevel {
    pub(crate) level: Level,
    pub(crate) rejected: Option<String>,
}

pub(crate) fn resolve_level(value: &str) -> ResolvedLevel {
    match Level::from_str(value.trim()) {
        Ok(level) => ResolvedLevel {
            level,
            rejected: None,
        },
        Err(_) => ResolvedLevel {
            level: Level::Info,
            rejected: Some(value.to_string()),
        },
    }
}

/// Logger configuration.
///
/// Every option has a safe default, so a partially filled config never fails
/// to initialize a [`LogSink`](crate::LogSink).
///
/// # Examples
/// ```rust
/// use actix_web_middleware_tracelog::Config;
///
/// let config = Config::default()
///     .format("json")
///     .level("debug")
///     .log_file("/var/log/app/service.log")
///     .max_size(50)
///     .max_backups(5)
///     .max_age(14);
/// assert_eq!(config.max_backups, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// `json` or `text`.
    pub format: String,
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// Empty means standard output.
    pub log_file: String,
    /// Megabytes written before the file is rotated.
    pub max_size: usize,
    /// Rotated files to retain, `0` keeps all of them.
    pub max_backups: usize,
    /// Days a rotated file is retained when `max_backups` is `0`; `0` disables pruning.
    pub max_age: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            format: "text".to_string(),
            level: "info".to_string(),
            log_file: String::new(),
            max_size: 100,
            max_backups: 0,
            max_age: 0,
        }
    }
}

impl Config {
    /// Build a config from `LOG_FORMAT`, `LOG_LEVEL`, `LOG_FILE`, `LOG_MAX_SIZE`,
    /// `LOG_MAX_BACKUPS` and `LOG_MAX_AGE`. Unset or unparsable variables keep
    /// their defaults.
    pub fn from_env() -> Config {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading each variable through `lookup`.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
        let mut config = Config::default();
        let parse = |name: &str| lookup(name).map(|value| value.trim().to_string());

        if let Some(format) = lookup("LOG_FORMAT") {
            config.format = format;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.level = level;
        }
        if let Some(file) = lookup("LOG_FILE") {
            config.log_file = file;
        }
        if let Some(size) = parse("LOG_MAX_SIZE").and_then(|v| v.parse().ok()) {
            config.max_size = size;
        }
        if let Some(backups) = parse("LOG_MAX_BACKUPS").and_then(|v| v.parse().ok()) {
            config.max_backups = backups;
        }
        if let Some(age) = parse("LOG_MAX_AGE").and_then(|v| v.parse().ok()) {
            config.max_age = age;
        }

        config
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn log_file(mut self, path: impl Into<String>) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn max_size(mut self, megabytes: usize) -> Self {
        self.max_size = megabytes;
        self
    }

    pub fn max_backups(mut self, backups: usize) -> Self {
        self.max_backups = backups;
        self
    }

    pub fn max_age(mut self, days: u32) -> Self {
        self.max_age = days;
        self
    }

    pub(crate) fn destination(&self) -> Option<PathBuf> {
        let path = self.log_file.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("json"), Format::Json);
        assert_eq!(Format::parse(" JSON "), Format::Json);
        assert_eq!(Format::parse("text"), Format::Text);
        assert_eq!(Format::parse("yaml"), Format::Text);
        assert_eq!(Format::parse(""), Format::Text);
    }

    #[test]
    fn test_resolve_level() {
        assert_eq!(resolve_level("debug").level, Level::Debug);
        assert_eq!(resolve_level("WARN").level, Level::Warn);
        assert_eq!(resolve_level("error").rejected, None);

        let fallback = resolve_level("verbose");
        assert_eq!(fallback.level, Level::Info);
        assert_eq!(fallback.rejected, Some("verbose".to_string()));

        assert_eq!(resolve_level("").level, Level::Info);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::default()
            .format("json")
            .level("warn")
            .log_file("  ")
            .max_size(10)
            .max_backups(3)
            .max_age(7);

        assert_eq!(config.format, "json");
        assert_eq!(config.level, "warn");
        assert_eq!(config.destination(), None);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.max_backups, 3);
        assert_eq!(config.max_age, 7);

        let config = config.log_file("logs/app.log");
        assert_eq!(config.destination(), Some(PathBuf::from("logs/app.log")));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: Config =
            serde_json::from_str(r#"{"format": "json", "logFile": "app.log", "maxBackups": 2}"#)
                .unwrap();

        assert_eq!(config.format, "json");
        assert_eq!(config.level, "info");
        assert_eq!(config.log_file, "app.log");
        assert_eq!(config.max_size, 100);
        assert_eq!(config.max_backups, 2);
        assert_eq!(config.max_age, 0);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("LOG_FORMAT", "json"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FILE", "/tmp/service.log"),
            ("LOG_MAX_SIZE", "not-a-number"),
            ("LOG_MAX_BACKUPS", " 4 "),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.format, "json");
        assert_eq!(config.level, "debug");
        assert_eq!(config.log_file, "/tmp/service.log");
        assert_eq!(config.max_size, 100);
        assert_eq!(config.max_backups, 4);
        assert_eq!(config.max_age, 0);
    }

    #[test]
    fn test_config_from_empty_lookup_is_default() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }
}
