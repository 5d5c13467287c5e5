//! Layered settings resolution.
//!
//! Precedence, weakest first: built-in defaults, then the YAML config
//! file, then `S3RY_*` environment variables, then command-line flags.
//! The binary hands in its flag values as [`Overrides`]; environment
//! lookup is injected so tests can run hermetically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::messages::Language;

/// Service-imposed floor for multipart part size (5 MiB).
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default multipart part size (8 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Hard ceiling on the worker count.
pub const MAX_WORKERS: usize = 1024;

/// Default worker count, derived from the host's available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

/// Which front-end renders progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMode {
    /// Full-screen TUI (the default).
    Bubbles,
    /// Plain list prompts with line-based progress bars.
    Legacy,
}

impl FromStr for UiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bubbles" => Ok(UiMode::Bubbles),
            "legacy" => Ok(UiMode::Legacy),
            other => Err(format!("unknown ui mode {other:?} (expected bubbles|legacy)")),
        }
    }
}

/// Log verbosity, mirrored into the tracing filter by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The level name as a tracing filter directive.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level {other:?} (expected debug|info|warn|error)"
            )),
        }
    }
}

/// Parse a byte count with optional K/M/G suffixes.
///
/// Bare suffixes and `*iB` forms are binary (`8M` == `8MiB`); `*B` forms
/// are decimal (`8MB` == 8_000_000). A plain number is bytes.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("byte size must not be empty".to_string());
    }

    let lower = s.to_ascii_lowercase();
    let (num, scale) = if let Some(raw) = lower.strip_suffix("kib") {
        (raw, 1024u64)
    } else if let Some(raw) = lower.strip_suffix("mib") {
        (raw, 1024u64 * 1024)
    } else if let Some(raw) = lower.strip_suffix("gib") {
        (raw, 1024u64 * 1024 * 1024)
    } else if let Some(raw) = lower.strip_suffix("kb") {
        (raw, 1000u64)
    } else if let Some(raw) = lower.strip_suffix("mb") {
        (raw, 1000u64 * 1000)
    } else if let Some(raw) = lower.strip_suffix("gb") {
        (raw, 1000u64 * 1000 * 1000)
    } else if let Some(raw) = lower.strip_suffix('k') {
        (raw, 1024u64)
    } else if let Some(raw) = lower.strip_suffix('m') {
        (raw, 1024u64 * 1024)
    } else if let Some(raw) = lower.strip_suffix('g') {
        (raw, 1024u64 * 1024 * 1024)
    } else if let Some(raw) = lower.strip_suffix('b') {
        (raw, 1u64)
    } else {
        (lower.as_str(), 1u64)
    };

    let num = num.trim();
    if num.is_empty() {
        return Err(format!("invalid byte size: {input:?}"));
    }

    let value: u64 = num
        .parse()
        .map_err(|_| format!("invalid byte size number: {input:?}"))?;

    value
        .checked_mul(scale)
        .ok_or_else(|| format!("byte size too large: {input:?}"))
}

// ── Config file schema ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UiSection {
    mode: Option<String>,
    language: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AwsSection {
    region: Option<String>,
    profile: Option<String>,
    endpoint: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PerformanceSection {
    workers: Option<usize>,
    chunk_size: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    level: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

/// Parsed (not yet validated) contents of the YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    ui: UiSection,
    aws: AwsSection,
    performance: PerformanceSection,
    logging: LoggingSection,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl ConfigFile {
    /// Parse YAML text.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Dotted paths of keys the schema does not know about.
    pub fn unknown_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.unknown.keys().cloned().collect();
        keys.extend(self.ui.unknown.keys().map(|k| format!("ui.{k}")));
        keys.extend(self.aws.unknown.keys().map(|k| format!("aws.{k}")));
        keys.extend(
            self.performance
                .unknown
                .keys()
                .map(|k| format!("performance.{k}")),
        );
        keys.extend(self.logging.unknown.keys().map(|k| format!("logging.{k}")));
        keys
    }
}

fn xdg_config_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_CONFIG_HOME is set but empty");
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".config"))
}

/// Default location of the config file.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_home()?.join("s3ry").join("config.yaml"))
}

/// Load the config file.
///
/// An explicitly requested path must exist; the default path is optional.
pub fn load_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<ConfigFile>> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    if !path.exists() {
        if required {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&path)?;
    let file = ConfigFile::parse(&raw)
        .map_err(|err| anyhow::anyhow!("{}: {err:#}", path.display()))?;

    for key in file.unknown_keys() {
        tracing::warn!(key = %key, path = %path.display(), "ignoring unknown config key");
    }

    Ok(Some(file))
}

// ── Resolution ──────────────────────────────────────────────────────────

/// Flag values as given on the command line (`None` = not given).
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub ui_mode: Option<UiMode>,
    pub language: Option<Language>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub workers: Option<usize>,
    pub chunk_size: Option<u64>,
    pub log_level: Option<LogLevel>,
}

/// Fully resolved session settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ui_mode: UiMode,
    pub language: Language,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub endpoint: Option<String>,
    pub workers: usize,
    pub chunk_size: u64,
    pub log_level: LogLevel,
}

impl Settings {
    /// Apply the precedence chain and validate the result.
    ///
    /// `env` is the environment lookup (normally `std::env::var(..).ok()`).
    pub fn resolve(
        file: Option<&ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> anyhow::Result<Self> {
        let mut settings = Settings {
            ui_mode: UiMode::Bubbles,
            language: Language::En,
            region: None,
            profile: None,
            endpoint: None,
            workers: default_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_level: LogLevel::Info,
        };

        if let Some(file) = file {
            if let Some(mode) = &file.ui.mode {
                settings.ui_mode = mode.parse().map_err(anyhow::Error::msg)?;
            }
            if let Some(lang) = &file.ui.language {
                settings.language = lang.parse().map_err(anyhow::Error::msg)?;
            }
            if let Some(region) = &file.aws.region {
                settings.region = Some(region.clone());
            }
            if let Some(profile) = &file.aws.profile {
                settings.profile = Some(profile.clone());
            }
            if let Some(endpoint) = &file.aws.endpoint {
                settings.endpoint = Some(endpoint.clone());
            }
            if let Some(workers) = file.performance.workers {
                settings.workers = workers;
            }
            if let Some(raw) = &file.performance.chunk_size {
                settings.chunk_size = parse_byte_size(raw).map_err(anyhow::Error::msg)?;
            }
            if let Some(level) = &file.logging.level {
                settings.log_level = level.parse().map_err(anyhow::Error::msg)?;
            }
        }

        if let Some(raw) = env("S3RY_UI_MODE") {
            settings.ui_mode = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = env("S3RY_LANGUAGE") {
            settings.language = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = env("S3RY_LOG_LEVEL") {
            settings.log_level = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = env("S3RY_WORKERS") {
            let workers: usize = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("S3RY_WORKERS must be a positive integer, got {raw:?}"))?;
            if workers == 0 {
                anyhow::bail!("S3RY_WORKERS must be a positive integer, got {raw:?}");
            }
            settings.workers = workers;
        }
        if let Some(raw) = env("S3RY_CHUNK_SIZE") {
            settings.chunk_size = parse_byte_size(&raw).map_err(anyhow::Error::msg)?;
        }

        if let Some(mode) = overrides.ui_mode {
            settings.ui_mode = mode;
        }
        if let Some(lang) = overrides.language {
            settings.language = lang;
        }
        if let Some(region) = &overrides.region {
            settings.region = Some(region.clone());
        }
        if let Some(profile) = &overrides.profile {
            settings.profile = Some(profile.clone());
        }
        if let Some(workers) = overrides.workers {
            settings.workers = workers;
        }
        if let Some(chunk) = overrides.chunk_size {
            settings.chunk_size = chunk;
        }
        if let Some(level) = overrides.log_level {
            settings.log_level = level;
        }

        settings.workers = settings.workers.clamp(1, MAX_WORKERS);
        if settings.chunk_size < MIN_CHUNK_SIZE {
            anyhow::bail!(
                "chunk size {} is below the service floor of {} bytes",
                settings.chunk_size,
                MIN_CHUNK_SIZE
            );
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("42").unwrap(), 42);
        assert_eq!(parse_byte_size("8M").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_byte_size("8MiB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_byte_size("8MB").unwrap(), 8_000_000);
        assert_eq!(parse_byte_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size(" 5 k ").unwrap(), 5 * 1024);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("MiB").is_err());
        assert!(parse_byte_size("12x").is_err());
    }

    #[test]
    fn defaults_without_inputs() {
        let settings = Settings::resolve(None, no_env, &Overrides::default()).unwrap();
        assert_eq!(settings.ui_mode, UiMode::Bubbles);
        assert_eq!(settings.language, Language::En);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.log_level, LogLevel::Info);
        assert!(settings.workers >= 1);
    }

    #[test]
    fn file_overrides_defaults() {
        let file = ConfigFile::parse(
            "ui:\n  mode: legacy\n  language: ja\nperformance:\n  workers: 8\n  chunk_size: 16MiB\nlogging:\n  level: warn\n",
        )
        .unwrap();
        let settings = Settings::resolve(Some(&file), no_env, &Overrides::default()).unwrap();
        assert_eq!(settings.ui_mode, UiMode::Legacy);
        assert_eq!(settings.language, Language::Ja);
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.chunk_size, 16 * 1024 * 1024);
        assert_eq!(settings.log_level, LogLevel::Warn);
    }

    #[test]
    fn env_beats_file_and_flags_beat_env() {
        let file = ConfigFile::parse("performance:\n  workers: 8\n").unwrap();
        let env = |name: &str| (name == "S3RY_WORKERS").then(|| "16".to_string());

        let settings = Settings::resolve(Some(&file), env, &Overrides::default()).unwrap();
        assert_eq!(settings.workers, 16);

        let overrides = Overrides {
            workers: Some(4),
            ..Overrides::default()
        };
        let settings = Settings::resolve(Some(&file), env, &overrides).unwrap();
        assert_eq!(settings.workers, 4);
    }

    #[test]
    fn worker_count_is_clamped() {
        let overrides = Overrides {
            workers: Some(100_000),
            ..Overrides::default()
        };
        let settings = Settings::resolve(None, no_env, &overrides).unwrap();
        assert_eq!(settings.workers, MAX_WORKERS);
    }

    #[test]
    fn chunk_size_floor_is_enforced() {
        let overrides = Overrides {
            chunk_size: Some(MIN_CHUNK_SIZE - 1),
            ..Overrides::default()
        };
        assert!(Settings::resolve(None, no_env, &overrides).is_err());
    }

    #[test]
    fn unknown_keys_are_collected_not_fatal() {
        let file = ConfigFile::parse(
            "ui:\n  mode: legacy\n  theme: dark\naws:\n  retries: 7\nextra: true\n",
        )
        .unwrap();
        let mut keys = file.unknown_keys();
        keys.sort();
        assert_eq!(keys, vec!["aws.retries", "extra", "ui.theme"]);

        // Still resolvable.
        assert!(Settings::resolve(Some(&file), no_env, &Overrides::default()).is_ok());
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let env = |name: &str| (name == "S3RY_WORKERS").then(|| "zero".to_string());
        assert!(Settings::resolve(None, env, &Overrides::default()).is_err());
    }
}
