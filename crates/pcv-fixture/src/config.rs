//! Suite configuration.
//!
//! Loaded from TOML, then overridden from `PCV_*` environment variables.
//! Every field has a default so an empty document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use pcv_core::{NamingConvention, PcvError, PcvResult, Placement, DEFAULT_PREFIX};
use serde::{Deserialize, Serialize};

/// Top-level configuration for one conformance run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Region every suite runs against.
    #[serde(default = "default_region")]
    pub region: String,

    /// Default data center for provisioned fixtures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_region() -> String {
    "default".into()
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            data_center: None,
            poll: PollConfig::default(),
            timeouts: TimeoutConfig::default(),
            naming: NamingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Convergence polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Sleep between observations.
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub interval: Duration,

    /// Consecutive "not found" observations tolerated before a resource is lost.
    #[serde(default = "default_disappearance_tolerance")]
    pub disappearance_tolerance: u32,
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_disappearance_tolerance() -> u32 {
    10
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            disappearance_tolerance: default_disappearance_tolerance(),
        }
    }
}

/// Convergence deadlines, relative to the moment a wait starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Provisioning until the first steady state.
    #[serde(default = "twenty_minutes", with = "duration_secs")]
    pub launch: Duration,

    /// Start, pause, suspend, resume, reboot.
    #[serde(default = "twenty_minutes", with = "duration_secs")]
    pub state_change: Duration,

    #[serde(default = "ten_minutes", with = "duration_secs")]
    pub stop: Duration,

    #[serde(default = "twenty_minutes", with = "duration_secs")]
    pub delete: Duration,
}

const fn twenty_minutes() -> Duration {
    Duration::from_secs(20 * 60)
}

const fn ten_minutes() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            launch: twenty_minutes(),
            state_change: twenty_minutes(),
            stop: ten_minutes(),
            delete: twenty_minutes(),
        }
    }
}

/// Naming of harness-created resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.into()
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl FixtureConfig {
    /// Parse a TOML document and validate it.
    ///
    /// # Errors
    /// Returns [`PcvError::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(input: &str) -> PcvResult<Self> {
        let config: Self = toml::from_str(input).map_err(|err| PcvError::Config {
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    /// Returns [`PcvError::Config`] if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> PcvResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|err| PcvError::Config {
            message: format!("{}: {err}", path.display()),
        })?;
        Self::from_toml_str(&input)
    }

    /// Apply `PCV_*` overrides from the process environment.
    ///
    /// # Errors
    /// Returns [`PcvError::Config`] if an override does not parse.
    pub fn with_env_overrides(self) -> PcvResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `PCV_*` overrides from an arbitrary lookup.
    ///
    /// # Errors
    /// Returns [`PcvError::Config`] if an override does not parse.
    pub fn with_overrides<F>(mut self, lookup: F) -> PcvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(region) = lookup("PCV_REGION") {
            self.region = region;
        }
        if let Some(dc) = lookup("PCV_DATA_CENTER") {
            self.data_center = Some(dc);
        }
        if let Some(secs) = lookup("PCV_POLL_INTERVAL_SECS") {
            self.poll.interval = Duration::from_secs(parse_override("PCV_POLL_INTERVAL_SECS", &secs)?);
        }
        if let Some(count) = lookup("PCV_DISAPPEARANCE_TOLERANCE") {
            self.poll.disappearance_tolerance = parse_override("PCV_DISAPPEARANCE_TOLERANCE", &count)?;
        }
        if let Some(prefix) = lookup("PCV_NAMING_PREFIX") {
            self.naming.prefix = prefix;
        }
        if let Some(level) = lookup("PCV_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("PCV_LOG_JSON") {
            self.logging.json = parse_override("PCV_LOG_JSON", &json)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    /// Returns [`PcvError::Config`] for a zero poll interval or an empty region.
    pub fn validate(&self) -> PcvResult<()> {
        if self.poll.interval.is_zero() {
            return Err(PcvError::Config {
                message: "poll.interval must be positive".into(),
            });
        }
        if self.region.trim().is_empty() {
            return Err(PcvError::Config {
                message: "region must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Default placement derived from region and data center.
    #[must_use]
    pub fn default_placement(&self) -> Placement {
        let placement = Placement::in_region(self.region.clone());
        match &self.data_center {
            Some(dc) => placement.with_data_center(dc.clone()),
            None => placement,
        }
    }

    #[must_use]
    pub fn naming_convention(&self) -> NamingConvention {
        NamingConvention::new(&self.naming.prefix)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> PcvResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|err| PcvError::Config {
        message: format!("{key}={raw}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = FixtureConfig::from_toml_str("").unwrap();
        assert_eq!(config, FixtureConfig::default());
        assert_eq!(config.poll.interval, Duration::from_secs(60));
        assert_eq!(config.poll.disappearance_tolerance, 10);
        assert_eq!(config.timeouts.stop, Duration::from_secs(600));
    }

    #[test]
    fn parses_nested_sections() {
        let config = FixtureConfig::from_toml_str(
            r#"
            region = "eu-west-1"
            data_center = "eu-west-1b"

            [poll]
            interval = 15
            disappearance_tolerance = 3

            [timeouts]
            launch = 900

            [naming]
            prefix = "dsn"
            "#,
        )
        .unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.poll.interval, Duration::from_secs(15));
        assert_eq!(config.poll.disappearance_tolerance, 3);
        assert_eq!(config.timeouts.launch, Duration::from_secs(900));
        assert_eq!(config.timeouts.delete, Duration::from_secs(1200));
        assert_eq!(config.naming_convention().prefix(), "dsn");
        assert_eq!(
            config.default_placement().data_center.as_deref(),
            Some("eu-west-1b")
        );
    }

    #[test]
    fn rejects_zero_interval() {
        let err = FixtureConfig::from_toml_str("[poll]\ninterval = 0").unwrap_err();
        assert!(matches!(err, PcvError::Config { .. }));
    }

    #[test]
    fn overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("PCV_REGION", "ap-south-1"),
            ("PCV_POLL_INTERVAL_SECS", "5"),
            ("PCV_DISAPPEARANCE_TOLERANCE", "2"),
            ("PCV_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        let config = FixtureConfig::default()
            .with_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.region, "ap-south-1");
        assert_eq!(config.poll.interval, Duration::from_secs(5));
        assert_eq!(config.poll.disappearance_tolerance, 2);
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_override_is_a_config_error() {
        let err = FixtureConfig::default()
            .with_overrides(|key| (key == "PCV_DISAPPEARANCE_TOLERANCE").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, PcvError::Config { .. }));
    }

    #[test]
    fn process_environment_overrides_naming_prefix() {
        std::env::set_var("PCV_NAMING_PREFIX", "envtest");
        let config = FixtureConfig::default().with_env_overrides();
        std::env::remove_var("PCV_NAMING_PREFIX");
        assert_eq!(config.unwrap().naming.prefix, "envtest");
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcv.toml");
        std::fs::write(&path, "region = \"us-west-2\"\n").unwrap();
        let config = FixtureConfig::from_path(&path).unwrap();
        assert_eq!(config.region, "us-west-2");
        assert!(FixtureConfig::from_path(dir.path().join("missing.toml")).is_err());
    }
}
