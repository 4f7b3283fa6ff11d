//! Configuration management for Surge
//!
//! Values are layered, lowest priority first:
//! - built-in defaults
//! - the file named by `SURGE_CONFIG`
//! - `./config/surge.{yaml,toml,json}`
//! - `SURGE__SECTION__KEY` environment variables
//!
//! A scenario preset supplies every run setting not given explicitly.

use crate::error::EngineResult;
use crate::mix::{OperationMix, WEIGHT_SUM_TOLERANCE};
use crate::pacing::ThinkTime;
use crate::profile::{parse_duration, LoadProfile, LoadStage};
use crate::scenario::{ScenarioConfig, ScenarioPreset};
use crate::threshold::parse_all;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SurgeConfig {
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub run: RunConfig,

    /// k6-style expressions; empty means the preset's thresholds
    #[serde(default)]
    pub thresholds: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SurgeConfig {
    /// Load configuration from defaults, config files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("SURGE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/surge").required(false));

        // Example: SURGE__TARGET__BASE_URL=http://app:8080
        builder = builder.add_source(
            Environment::with_prefix("SURGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: SurgeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Target
            .set_default("target.base_url", "http://localhost:8080")?
            .set_default("target.timeout_ms", 30_000)?
            .set_default("target.health_path", "/actuator/health")?
            .set_default("target.pool_max_idle_per_host", 64)?
            // Run
            .set_default("run.scenario", ScenarioPreset::ReadHeavy.as_str())?
            .set_default("run.latency_ceiling_ms", 500.0)?
            .set_default("run.entity_id_max", 1000)?
            .set_default("run.step_threshold", "1s")?
            .set_default("run.tick_interval_ms", 250)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: SurgeConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.base_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "target.base_url must not be empty".to_string(),
            ));
        }

        if self.target.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "target.timeout_ms must be > 0".to_string(),
            ));
        }

        if !self.target.health_path.starts_with('/') {
            return Err(ConfigError::Message(
                "target.health_path must start with '/'".to_string(),
            ));
        }

        if self.run.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "run.tick_interval_ms must be > 0".to_string(),
            ));
        }

        // Builds the full scenario so malformed stages, mixes and threshold
        // expressions fail here instead of mid-run.
        self.scenario()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }

    /// Resolve the run settings into a scenario: the preset named by
    /// `run.scenario`, with every explicitly configured field applied on top.
    pub fn scenario(&self) -> EngineResult<ScenarioConfig> {
        let preset: ScenarioPreset = self.run.scenario.parse()?;
        let mut scenario = preset.config();

        let step_threshold = parse_duration(&self.run.step_threshold)?;
        scenario.profile = match &self.run.stages {
            Some(stages) => LoadProfile::new(stages.clone())?,
            None => scenario.profile,
        }
        .with_step_threshold(step_threshold);

        if let Some(mix) = &self.run.mix {
            scenario.mix = mix.to_mix()?;
        }

        if let Some(think) = &self.run.think_time {
            scenario.pacing.think_time = ThinkTime::uniform(think.min_secs, think.max_secs);
        }
        if let Some(jitter) = self.run.jitter_percent {
            scenario.pacing.jitter_percent = jitter;
        }

        if !self.thresholds.is_empty() {
            scenario.thresholds = parse_all(&self.thresholds)?;
        }

        scenario.latency_ceiling_ms = self.run.latency_ceiling_ms;
        scenario.entity_id_max = self.run.entity_id_max;
        scenario.seed = self.run.seed;
        scenario.phase_label = self.run.phase_label.clone();
        scenario.max_duration = self
            .run
            .max_duration
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        scenario.tick_interval = Duration::from_millis(self.run.tick_interval_ms);

        scenario.validate()?;
        Ok(scenario)
    }
}

/// Target service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Base URL of the service under test
    pub base_url: String,

    /// Per-request timeout
    pub timeout_ms: u64,

    /// Path of the health endpoint
    pub health_path: String,

    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30_000,
            health_path: "/actuator/health".to_string(),
            pool_max_idle_per_host: 64,
        }
    }
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Run settings. Optional fields fall back to the scenario preset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Preset name, e.g. `read-heavy`
    pub scenario: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<LoadStage>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix: Option<MixConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think_time: Option<ThinkTimeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_percent: Option<f64>,

    pub latency_ceiling_ms: f64,

    pub entity_id_max: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_label: Option<String>,

    /// Wall-clock budget such as `5m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<String>,

    /// Stages no longer than this jump straight to their target
    pub step_threshold: String,

    pub tick_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioPreset::ReadHeavy.as_str().to_string(),
            stages: None,
            mix: None,
            think_time: None,
            jitter_percent: None,
            latency_ceiling_ms: 500.0,
            entity_id_max: 1000,
            seed: None,
            phase_label: None,
            max_duration: None,
            step_threshold: "1s".to_string(),
            tick_interval_ms: 250,
        }
    }
}

/// Read/Search/Write shares, either as weights summing to 1.0 or as
/// percentages summing to 100.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MixConfig {
    pub read: f64,
    pub search: f64,
    pub write: f64,
}

impl MixConfig {
    pub fn to_mix(&self) -> EngineResult<OperationMix> {
        let sum = self.read + self.search + self.write;
        if sum <= 1.0 + WEIGHT_SUM_TOLERANCE {
            OperationMix::from_percentages(self.read * 100.0, self.search * 100.0, self.write * 100.0)
        } else {
            OperationMix::from_percentages(self.read, self.search, self.write)
        }
    }
}

/// Uniform think-time range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ThinkTimeConfig {
    pub min_secs: f64,
    pub max_secs: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::mix::OperationKind;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_configuration() {
        let config = SurgeConfig::default();

        assert_eq!(config.target.base_url, "http://localhost:8080");
        assert_eq!(config.target.timeout(), Duration::from_secs(30));
        assert_eq!(config.target.health_path, "/actuator/health");
        assert_eq!(config.run.scenario, "read-heavy");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_preset_used_when_nothing_overrides() {
        let scenario = SurgeConfig::default().scenario().unwrap();

        assert_eq!(scenario.name, "Read-Heavy");
        assert_eq!(scenario.profile.peak_target(), 500);
        assert_eq!(scenario.thresholds.len(), 5);
        assert_eq!(scenario.tick_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_overrides_from_file() {
        let file = write_config(
            r#"
target:
  base_url: "http://app:9000"
  timeout_ms: 5000
  health_path: "/health"
  pool_max_idle_per_host: 8
run:
  scenario: warm-start
  stages:
    - { duration: "30s", target: 10, phase: baseline }
    - { duration: "1m", target: 20, phase: deploy }
  mix: { read: 50, search: 30, write: 20 }
  latency_ceiling_ms: 250
  entity_id_max: 50
  seed: 42
  max_duration: "45s"
  step_threshold: "1s"
  tick_interval_ms: 100
thresholds:
  - "p(95)<300"
  - "rate<0.01"
logging:
  level: debug
  format: compact
"#,
        );

        let config = SurgeConfig::from_file(file.path()).unwrap();
        let scenario = config.scenario().unwrap();

        assert_eq!(config.target.base_url, "http://app:9000");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(scenario.name, "Warm-Start");
        assert_eq!(scenario.profile.total_duration(), Duration::from_secs(90));
        assert!((scenario.mix.entries()[0].weight - 0.5).abs() < 1e-12);
        assert_eq!(scenario.mix.entries()[1].kind, OperationKind::Search);
        assert_eq!(scenario.thresholds.len(), 2);
        assert_eq!(scenario.seed, Some(42));
        assert_eq!(scenario.max_duration, Some(Duration::from_secs(45)));
        assert_eq!(scenario.latency_ceiling_ms, 250.0);
        assert_eq!(scenario.entity_id_max, 50);
    }

    #[test]
    fn test_mix_accepts_weights_or_percentages() {
        let weights = MixConfig {
            read: 0.6,
            search: 0.2,
            write: 0.2,
        };
        let percents = MixConfig {
            read: 60.0,
            search: 20.0,
            write: 20.0,
        };

        let a = weights.to_mix().unwrap();
        let b = percents.to_mix().unwrap();
        for (x, y) in a.entries().iter().zip(b.entries()) {
            assert_eq!(x.kind, y.kind);
            assert!((x.weight - y.weight).abs() < 1e-9);
        }

        let bad = MixConfig {
            read: 60.0,
            search: 30.0,
            write: 20.0,
        };
        assert!(matches!(bad.to_mix(), Err(EngineError::InvalidMix(_))));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SurgeConfig::default();

        config.target.timeout_ms = 0;
        assert!(config.validate().is_err());
        config.target.timeout_ms = 1000;
        assert!(config.validate().is_ok());

        config.run.scenario = "soak".to_string();
        assert!(config.validate().is_err());
        config.run.scenario = "balanced".to_string();

        config.thresholds = vec!["p(95)=500".to_string()];
        assert!(config.validate().is_err());
        config.thresholds.clear();

        config.run.jitter_percent = Some(150.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let file = write_config(
            r#"
run:
  scenario: read-heavy
  latency_ceiling_ms: 500
  entity_id_max: 1000
  step_threshold: "1s"
  tick_interval_ms: 250
  mix: { read: 0.7, search: 0.2, write: 0.2 }
"#,
        );

        assert!(SurgeConfig::from_file(file.path()).is_err());
    }
}
