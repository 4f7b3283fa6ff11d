//! Load profiles: staged virtual-user ramps over wall-clock time

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Stages at or below this duration jump straight to their target.
pub const DEFAULT_STEP_THRESHOLD: Duration = Duration::from_secs(1);

/// One segment of a load profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStage {
    /// How long the stage lasts
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub duration: Duration,

    /// Virtual-user concurrency reached at the end of the stage
    pub target: u32,

    /// Phase the stage belongs to, used to partition metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl LoadStage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self {
            duration,
            target,
            phase: None,
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

/// Ordered stage sequence interpreted as a piecewise-linear ramp.
///
/// Within a stage the target is interpolated from the previous stage's
/// target to this stage's target. The first stage starts at its own target.
/// Stages no longer than the step threshold jump immediately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadProfile {
    stages: Vec<LoadStage>,
    #[serde(serialize_with = "serialize_duration")]
    step_threshold: Duration,
}

impl LoadProfile {
    pub fn new(stages: Vec<LoadStage>) -> EngineResult<Self> {
        if stages.is_empty() {
            return Err(EngineError::InvalidProfile(
                "profile has no stages".to_string(),
            ));
        }
        if stages.iter().all(|s| s.duration.is_zero()) {
            return Err(EngineError::InvalidProfile(
                "profile has zero total duration".to_string(),
            ));
        }

        Ok(Self {
            stages,
            step_threshold: DEFAULT_STEP_THRESHOLD,
        })
    }

    /// For built-in stage lists that are known to be valid.
    pub(crate) fn from_stages_unchecked(stages: Vec<LoadStage>) -> Self {
        Self {
            stages,
            step_threshold: DEFAULT_STEP_THRESHOLD,
        }
    }

    /// Override which stage durations count as instantaneous.
    pub fn with_step_threshold(mut self, threshold: Duration) -> Self {
        self.step_threshold = threshold;
        self
    }

    pub fn stages(&self) -> &[LoadStage] {
        &self.stages
    }

    pub fn step_threshold(&self) -> Duration {
        self.step_threshold
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest target any stage reaches.
    pub fn peak_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Stage active at `elapsed` with its index and start offset.
    /// `None` once the profile has finished.
    pub fn stage_at(&self, elapsed: Duration) -> Option<(usize, &LoadStage, Duration)> {
        let mut start = Duration::ZERO;
        for (idx, stage) in self.stages.iter().enumerate() {
            let end = start + stage.duration;
            if elapsed < end {
                return Some((idx, stage, start));
            }
            start = end;
        }
        None
    }

    /// Whether `elapsed` is past the end of the last stage.
    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Target virtual-user concurrency at `elapsed` since run start.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let Some((idx, stage, start)) = self.stage_at(elapsed) else {
            return self.stages.last().map(|s| s.target).unwrap_or(0);
        };

        if stage.duration <= self.step_threshold {
            return stage.target;
        }

        let from = if idx == 0 {
            stage.target
        } else {
            self.stages[idx - 1].target
        };

        let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
        let delta = (stage.target as f64 - from as f64) * progress;
        (from as f64 + delta).round().max(0.0) as u32
    }

    /// Short description such as `3 stages, 14m0s, peak 500 VUs`.
    pub fn description(&self) -> String {
        format!(
            "{} stages, {}, peak {} VUs",
            self.stages.len(),
            format_duration(self.total_duration()),
            self.peak_target()
        )
    }
}

/// Parse `500ms`, `30s`, `2m`, `1h` or a combination such as `1m30s`.
pub fn parse_duration(input: &str) -> EngineResult<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(EngineError::InvalidProfile(
            "duration string cannot be empty".to_string(),
        ));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| {
                EngineError::InvalidProfile(format!("duration `{}` is missing a unit", input))
            })?;
        if digits == 0 {
            return Err(EngineError::InvalidProfile(format!(
                "invalid duration `{}`",
                input
            )));
        }
        let value: f64 = rest[..digits].parse().map_err(|_| {
            EngineError::InvalidProfile(format!("invalid number in duration `{}`", input))
        })?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let secs = match &rest[..unit_len] {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            other => {
                return Err(EngineError::InvalidProfile(format!(
                    "unknown duration unit `{}` in `{}`",
                    other, input
                )))
            }
        };
        total = Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|d| total.checked_add(d))
            .ok_or_else(|| {
                EngineError::InvalidProfile(format!("duration `{}` is out of range", input))
            })?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

/// Render a duration the way [`parse_duration`] reads it.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m{}s", m, s),
        _ => format!("{}h{}m{}s", h, m, s),
    }
}

pub(crate) fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_duration(*d))
}

pub(crate) fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(d)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
