//! Configuration management for the dispatch engine
//!
//! Settings come from a TOML file (optional), then `VMD_*` environment
//! overrides, then validation. Every section has working defaults so an
//! empty file is a valid configuration.

use crate::core::error::{Error, Result};
use crate::dispatch::DispatcherOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default configuration file looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "vmm-dispatch.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool sizing and shutdown
    pub dispatcher: DispatcherConfig,

    /// Command set selection
    pub commands: CommandConfig,

    /// Backend-specific settings for the built-in command sets
    pub backend: BackendConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics and monitoring
    pub metrics: MetricsConfig,
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Workers started by `start()`; the pool never shrinks below this
    pub initial_threads: usize,

    /// Hard ceiling on pool size
    pub max_threads: usize,

    /// Idle-worker count above which elastically added workers are retired
    pub high_water_mark: usize,

    /// How long `stop()` waits for in-flight jobs
    #[serde(with = "duration_str")]
    pub drain_timeout: Duration,
}

/// Command set selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Keyword of the lifecycle command set (`mock`, `xenlocal`, `xenssh`)
    pub command_set: String,

    /// Keyword of the backend query command set
    pub query_command_set: String,

    /// Turn off image propagation and every operation composed with it
    pub disable_propagation: bool,

    /// Turn off ready-for-transport and its cancellations
    pub disable_ready_for_transport: bool,

    /// Directory commands use for scratch files
    pub temp_dir: PathBuf,
}

/// Settings for the process-backed command sets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Path of the workspace-control program on the VMM host
    pub control_path: PathBuf,

    /// `user@host` used by the `xenssh` command set
    pub ssh_target: Option<String>,

    /// Extra arguments passed to `ssh` before the target
    pub ssh_options: Vec<String>,

    /// Simulated backend settings
    pub mock: MockConfig,
}

/// Simulated backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Base time each command takes
    #[serde(with = "duration_str")]
    pub delay: Duration,

    /// Maximum random deviation from `delay`, either way
    #[serde(with = "duration_str")]
    pub jitter: Duration,

    /// Operation names that always fail
    pub fail_operations: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (full, compact, pretty)
    pub format: String,

    /// Emit ANSI colours
    pub ansi: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Print the Prometheus text exposition at shutdown
    pub report_on_shutdown: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let fallback = DispatcherOptions::FALLBACK;
        Self {
            initial_threads: fallback.initial_threads,
            max_threads: fallback.max_threads,
            high_water_mark: fallback.high_water_mark,
            drain_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command_set: "mock".to_string(),
            query_command_set: "mock".to_string(),
            disable_propagation: false,
            disable_ready_for_transport: false,
            temp_dir: std::env::temp_dir().join("vmm-dispatch"),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            control_path: PathBuf::from("/opt/workspace-control/bin/workspace-control"),
            ssh_target: None,
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            mock: MockConfig::default(),
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
            jitter: Duration::ZERO,
            fail_operations: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
            ansi: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_on_shutdown: true,
        }
    }
}

impl DispatcherConfig {
    /// The set-once options handed to the dispatcher
    pub fn options(&self) -> DispatcherOptions {
        DispatcherOptions {
            initial_threads: self.initial_threads,
            max_threads: self.max_threads,
            high_water_mark: self.high_water_mark,
        }
    }
}

impl Config {
    /// Load configuration from the default file (if any) and environment variables
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() {
            config = Self::from_file(DEFAULT_CONFIG_FILE)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(set) = env::var("VMD_COMMAND_SET") {
            self.commands.command_set = set;
        }

        if let Ok(set) = env::var("VMD_QUERY_COMMAND_SET") {
            self.commands.query_command_set = set;
        }

        if let Ok(n) = env::var("VMD_INITIAL_THREADS") {
            self.dispatcher.initial_threads = n
                .parse()
                .map_err(|e| Error::config(format!("Invalid initial threads: {}", e)))?;
        }

        if let Ok(n) = env::var("VMD_MAX_THREADS") {
            self.dispatcher.max_threads = n
                .parse()
                .map_err(|e| Error::config(format!("Invalid max threads: {}", e)))?;
        }

        if let Ok(n) = env::var("VMD_HIGH_WATER_MARK") {
            self.dispatcher.high_water_mark = n
                .parse()
                .map_err(|e| Error::config(format!("Invalid high water mark: {}", e)))?;
        }

        if let Ok(target) = env::var("VMD_SSH_TARGET") {
            self.backend.ssh_target = Some(target);
        }

        if let Ok(level) = env::var("VMD_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.dispatcher.options().validate()?;

        if self.dispatcher.max_threads > 1024 {
            return Err(Error::config("Too many worker threads (maximum 1024)"));
        }

        if self.commands.command_set.trim().is_empty() {
            return Err(Error::config("commands.command_set must not be empty"));
        }

        if self.commands.query_command_set.trim().is_empty() {
            return Err(Error::config("commands.query_command_set must not be empty"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "full" | "compact" | "pretty" => {}
            _ => return Err(Error::config("Invalid log format")),
        }

        Ok(())
    }
}

/// Durations written as `"30s"`, `"5m"`, `"250ms"` or bare seconds
mod duration_str {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.subsec_millis() != 0 || value.as_secs() == 0 {
            serializer.serialize_str(&format!("{}ms", value.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration string like '30s' or '5m'")
            }

            fn visit_str<E>(self, value: &str) -> Result<Duration, E>
            where
                E: de::Error,
            {
                super::parse_duration(value).map_err(E::custom)
            }

            fn visit_i64<E>(self, value: i64) -> Result<Duration, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

// Simple duration parser for common formats
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        let secs = mins.checked_mul(60).ok_or("Invalid minutes")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "Invalid hours")?;
        let secs = hours.checked_mul(3600).ok_or("Invalid hours")?;
        Ok(Duration::from_secs(secs))
    } else {
        // Try parsing as raw seconds
        let secs: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.dispatcher.options(), DispatcherOptions::FALLBACK);
        assert_eq!(config.dispatcher.drain_timeout, Duration::from_secs(120));
    }

    #[test]
    fn parses_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[dispatcher]
initial_threads = 2
max_threads = 10
high_water_mark = 3
drain_timeout = "2m"

[commands]
command_set = "xenssh"
disable_propagation = true

[backend]
ssh_target = "root@vmm1"

[backend.mock]
delay = "250ms"
fail_operations = ["reboot"]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.dispatcher.initial_threads, 2);
        assert_eq!(config.dispatcher.max_threads, 10);
        assert_eq!(config.dispatcher.drain_timeout, Duration::from_secs(120));
        assert_eq!(config.commands.command_set, "xenssh");
        assert_eq!(config.commands.query_command_set, "mock");
        assert!(config.commands.disable_propagation);
        assert_eq!(config.backend.ssh_target.as_deref(), Some("root@vmm1"));
        assert_eq!(config.backend.mock.delay, Duration::from_millis(250));
        assert_eq!(config.backend.mock.fail_operations, vec!["reboot"]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn serialized_config_reads_back() {
        let mut config = Config::default();
        config.backend.mock.delay = Duration::from_millis(1500);
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.backend.mock.delay, Duration::from_millis(1500));
        assert_eq!(back.dispatcher.drain_timeout, Duration::from_secs(120));
    }

    #[test]
    fn rejects_ceiling_below_baseline() {
        let mut config = Config::default();
        config.dispatcher.initial_threads = 8;
        config.dispatcher.max_threads = 4;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let huge = u64::MAX / 60 + 1;
        assert_eq!(parse_duration(&format!("{}m", huge)), Err("Invalid minutes".to_string()));
        assert_eq!(parse_duration(&format!("{}h", huge)), Err("Invalid hours".to_string()));
        assert!(toml::from_str::<DispatcherConfig>(&format!("drain_timeout = \"{}h\"", huge)).is_err());
    }
}
