//! Scenario presets and the resolved configuration of one run

use crate::data::DEFAULT_ENTITY_ID_MAX;
use crate::error::{EngineError, EngineResult};
use crate::executor::DEFAULT_LATENCY_CEILING_MS;
use crate::mix::OperationMix;
use crate::pacing::{Pacing, ThinkTime};
use crate::profile::{LoadProfile, LoadStage};
use crate::threshold::{parse_all, Threshold};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How often the scheduler re-reads the profile target by default.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// The shipped traffic scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioPreset {
    ReadHeavy,
    Balanced,
    WriteHeavy,
    RampUp,
    BurstSpike,
    ColdStart,
    WarmStart,
}

impl ScenarioPreset {
    pub fn all() -> &'static [ScenarioPreset] {
        &[
            Self::ReadHeavy,
            Self::Balanced,
            Self::WriteHeavy,
            Self::RampUp,
            Self::BurstSpike,
            Self::ColdStart,
            Self::WarmStart,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadHeavy => "read-heavy",
            Self::Balanced => "balanced",
            Self::WriteHeavy => "write-heavy",
            Self::RampUp => "ramp-up",
            Self::BurstSpike => "burst-spike",
            Self::ColdStart => "cold-start",
            Self::WarmStart => "warm-start",
        }
    }

    /// Name used in logs and reports.
    pub fn test_name(&self) -> &'static str {
        match self {
            Self::ReadHeavy => "Read-Heavy",
            Self::Balanced => "Balanced",
            Self::WriteHeavy => "Write-Heavy",
            Self::RampUp => "Ramp-Up",
            Self::BurstSpike => "Burst/Spike",
            Self::ColdStart => "Cold-Start",
            Self::WarmStart => "Warm-Start",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            Self::ReadHeavy => "2m warm-up to 50 VUs, 10m at up to 500 VUs, 2m cool-down",
            Self::Balanced => "2m warm-up to 50 VUs, 10m at up to 300 VUs, 2m cool-down",
            Self::WriteHeavy => "2m warm-up to 50 VUs, 10m at up to 200 VUs, 2m cool-down",
            Self::RampUp => "10m linear ramp to 1000 VUs, 2m hold, 2m cool-down",
            Self::BurstSpike => "2m at 50 VUs, instant spike to 800 VUs for 3m, recovery to 50",
            Self::ColdStart => "poll health until the target comes up, then warm-up reads",
            Self::WarmStart => "2m baseline at 100 VUs, 3m deploy window at 200, 3m recovery",
        }
    }

    /// Cold-start measures startup with the health probe instead of load.
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::ColdStart)
    }

    /// Full run configuration for this preset.
    pub fn config(&self) -> ScenarioConfig {
        let m = |n: u64| Duration::from_secs(n * 60);
        let s = Duration::from_secs;

        let (stages, pacing, thresholds): (Vec<LoadStage>, Pacing, Vec<&str>) = match self {
            Self::ReadHeavy | Self::Balanced | Self::WriteHeavy => {
                let (peak, think, limits) = match self {
                    Self::ReadHeavy => (
                        500,
                        ThinkTime::uniform(0.5, 2.5),
                        vec!["p(99)<1000", "p(95)<500", "p(50)<100", "rate<0.05", "count>0"],
                    ),
                    Self::Balanced => (
                        300,
                        ThinkTime::uniform(0.5, 2.5),
                        vec!["p(99)<1500", "p(95)<750", "p(50)<150", "rate<0.05", "count>0"],
                    ),
                    _ => (
                        200,
                        ThinkTime::uniform(1.0, 3.5),
                        vec!["p(99)<2000", "p(95)<1000", "p(50)<200", "rate<0.05", "count>0"],
                    ),
                };
                (
                    vec![
                        LoadStage::new(m(2), 50).with_phase("warmup"),
                        LoadStage::new(m(10), peak).with_phase("load"),
                        LoadStage::new(m(2), 0).with_phase("cooldown"),
                    ],
                    Pacing::new(think, 10.0),
                    limits,
                )
            }
            Self::RampUp => (
                vec![
                    // Starts from zero; a first stage holds its own target.
                    LoadStage::new(Duration::ZERO, 0),
                    LoadStage::new(m(10), 1000).with_phase("ramp"),
                    LoadStage::new(m(2), 1000).with_phase("hold"),
                    LoadStage::new(m(2), 0).with_phase("cooldown"),
                ],
                Pacing::new(ThinkTime::fixed(0.5), 0.0),
                vec!["p(99)<3000", "rate<0.10", "count>0"],
            ),
            Self::BurstSpike => (
                vec![
                    LoadStage::new(m(2), 50).with_phase("baseline"),
                    LoadStage::new(s(1), 800).with_phase("spike"),
                    LoadStage::new(m(3), 800).with_phase("spike"),
                    LoadStage::new(m(2), 50).with_phase("recovery"),
                    LoadStage::new(m(2), 50).with_phase("idle"),
                ],
                Pacing::new(ThinkTime::uniform(0.5, 2.0), 10.0),
                vec!["p(99)<2500", "rate<0.15", "count>0"],
            ),
            Self::ColdStart => (
                vec![LoadStage::new(s(30), 1).with_phase("startup")],
                Pacing::new(ThinkTime::fixed(2.0), 0.0),
                vec!["rate<0.05"],
            ),
            Self::WarmStart => (
                vec![
                    LoadStage::new(m(2), 100).with_phase("baseline"),
                    LoadStage::new(m(3), 200).with_phase("deploy"),
                    LoadStage::new(m(3), 100).with_phase("recovery"),
                ],
                Pacing {
                    skip_first_iteration: false,
                    ..Pacing::new(ThinkTime::uniform(0.0003, 0.0013), 0.0)
                },
                vec!["p(99)<2000", "rate<0.05"],
            ),
        };

        ScenarioConfig {
            name: self.test_name().to_string(),
            preset: Some(*self),
            profile: LoadProfile::from_stages_unchecked(stages),
            mix: OperationMix::standard(),
            pacing,
            thresholds: parse_all(&thresholds).unwrap_or_default(),
            ..ScenarioConfig::default()
        }
    }
}

impl fmt::Display for ScenarioPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioPreset {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == key)
            .ok_or_else(|| EngineError::UnknownScenario(s.to_string()))
    }
}

/// Everything needed to drive one run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Test name reported in the summary
    pub name: String,

    /// Preset the configuration started from
    pub preset: Option<ScenarioPreset>,

    /// Virtual-user ramp
    pub profile: LoadProfile,

    /// Weighted operation kinds
    pub mix: OperationMix,

    /// Think time between iterations
    pub pacing: Pacing,

    /// Ceiling for the per-call latency check
    pub latency_ceiling_ms: f64,

    /// Upper bound for random entity ids
    pub entity_id_max: u64,

    /// Run-level pass/fail bounds
    pub thresholds: Vec<Threshold>,

    /// Seed for reproducible runs; random when unset
    pub seed: Option<u64>,

    /// Phase for instants no stage label covers
    pub phase_label: Option<String>,

    /// Wall-clock budget that cuts the run short
    pub max_duration: Option<Duration>,

    /// How often the scheduler adjusts the virtual-user count
    pub tick_interval: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: "Default Scenario".to_string(),
            preset: None,
            profile: LoadProfile::from_stages_unchecked(vec![LoadStage::new(
                Duration::from_secs(60),
                10,
            )]),
            mix: OperationMix::standard(),
            pacing: Pacing::default(),
            latency_ceiling_ms: DEFAULT_LATENCY_CEILING_MS,
            entity_id_max: DEFAULT_ENTITY_ID_MAX,
            thresholds: Vec::new(),
            seed: None,
            phase_label: None,
            max_duration: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.pacing.validate()?;

        if !(self.latency_ceiling_ms.is_finite() && self.latency_ceiling_ms > 0.0) {
            return Err(EngineError::InvalidPacing(format!(
                "latency ceiling {}ms must be positive",
                self.latency_ceiling_ms
            )));
        }
        if self.entity_id_max == 0 {
            return Err(EngineError::InvalidProfile(
                "entity_id_max must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(EngineError::InvalidProfile(
                "tick interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Time the run may take: the profile length, capped by `max_duration`.
    pub fn run_budget(&self) -> Duration {
        let total = self.profile.total_duration();
        match self.max_duration {
            Some(max) => total.min(max),
            None => total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::OperationKind;
    use crate::phase::PhaseClassifier;

    #[test]
    fn test_every_preset_is_valid() {
        for preset in ScenarioPreset::all() {
            let config = preset.config();
            assert!(config.validate().is_ok(), "{}", preset);
            assert!(!config.thresholds.is_empty(), "{}", preset);
            assert_eq!(config.preset, Some(*preset));
            assert_eq!(preset.as_str().parse::<ScenarioPreset>().unwrap(), *preset);
        }
    }

    #[test]
    fn test_preset_names_parse_loosely() {
        assert_eq!(
            "Burst_Spike".parse::<ScenarioPreset>().unwrap(),
            ScenarioPreset::BurstSpike
        );
        assert!(matches!(
            "soak".parse::<ScenarioPreset>(),
            Err(EngineError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_read_heavy_shape() {
        let config = ScenarioPreset::ReadHeavy.config();

        assert_eq!(config.name, "Read-Heavy");
        assert_eq!(config.profile.total_duration(), Duration::from_secs(14 * 60));
        assert_eq!(config.profile.peak_target(), 500);
        assert_eq!(config.thresholds.len(), 5);
        assert_eq!(config.mix.entries()[0].kind, OperationKind::Read);
        assert!((config.mix.entries()[0].weight - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_burst_spike_steps_to_peak() {
        let profile = ScenarioPreset::BurstSpike.config().profile;

        assert_eq!(profile.target_at(Duration::from_secs(120)), 800);
        assert_eq!(profile.total_duration(), Duration::from_secs(9 * 60 + 1));
    }

    #[test]
    fn test_ramp_up_climbs_linearly_from_zero() {
        let config = ScenarioPreset::RampUp.config();
        let profile = &config.profile;

        assert_eq!(profile.target_at(Duration::ZERO), 0);
        assert_eq!(profile.target_at(Duration::from_secs(60)), 100);
        assert_eq!(profile.target_at(Duration::from_secs(5 * 60)), 500);
        assert_eq!(profile.target_at(Duration::from_secs(10 * 60)), 1000);
        assert_eq!(profile.total_duration(), Duration::from_secs(14 * 60));

        let phases = PhaseClassifier::from_profile(profile);
        assert_eq!(phases.phase_names(), vec!["ramp", "hold", "cooldown"]);
        assert_eq!(phases.classify(Duration::ZERO), "ramp");
    }

    #[test]
    fn test_warm_start_paces_every_iteration() {
        let config = ScenarioPreset::WarmStart.config();

        assert!(!config.pacing.skip_first_iteration);
        assert_eq!(config.pacing.jitter_percent, 0.0);
    }

    #[test]
    fn test_run_budget_honours_max_duration() {
        let mut config = ScenarioPreset::RampUp.config();
        assert_eq!(config.run_budget(), Duration::from_secs(14 * 60));

        config.max_duration = Some(Duration::from_secs(90));
        assert_eq!(config.run_budget(), Duration::from_secs(90));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ScenarioConfig::default();
        config.latency_ceiling_ms = 0.0;
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
