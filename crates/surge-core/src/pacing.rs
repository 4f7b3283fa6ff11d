//! Think-time pacing between iterations

use crate::error::{EngineError, EngineResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest delay ever returned, in seconds.
pub const MIN_DELAY_SECS: f64 = 0.01;

/// Symmetric jitter around `base_secs`, floored at [`MIN_DELAY_SECS`].
///
/// `delay = base + U(-1, 1) * base * jitter_percent / 100`. A jitter of zero
/// returns `base` unchanged (subject to the floor).
pub fn compute_delay<R: Rng + ?Sized>(base_secs: f64, jitter_percent: f64, rng: &mut R) -> f64 {
    if jitter_percent <= 0.0 {
        return base_secs.max(MIN_DELAY_SECS);
    }

    let unit: f64 = rng.gen_range(-1.0..1.0);
    jittered(base_secs, jitter_percent, unit)
}

/// [`compute_delay`] for a given draw `unit` in `[-1, 1)`.
pub fn jittered(base_secs: f64, jitter_percent: f64, unit: f64) -> f64 {
    let spread = base_secs * jitter_percent / 100.0;
    (base_secs + unit * spread).max(MIN_DELAY_SECS)
}

/// Base think time of one iteration, before jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThinkTime {
    /// Same base every iteration
    Fixed { secs: f64 },
    /// Base drawn uniformly from `[min_secs, max_secs)` every iteration
    Uniform { min_secs: f64, max_secs: f64 },
}

impl ThinkTime {
    pub fn fixed(secs: f64) -> Self {
        Self::Fixed { secs }
    }

    pub fn uniform(min_secs: f64, max_secs: f64) -> Self {
        Self::Uniform { min_secs, max_secs }
    }

    fn base<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Self::Fixed { secs } => secs,
            Self::Uniform { min_secs, max_secs } if max_secs > min_secs => {
                rng.gen_range(min_secs..max_secs)
            }
            Self::Uniform { min_secs, .. } => min_secs,
        }
    }
}

/// Pacing parameters for one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pacing {
    pub think_time: ThinkTime,
    /// Jitter as a percentage of the base (0-100)
    pub jitter_percent: f64,
    /// Skip the delay after a virtual user's first iteration
    #[serde(default = "default_true")]
    pub skip_first_iteration: bool,
}

fn default_true() -> bool {
    true
}

impl Pacing {
    pub fn new(think_time: ThinkTime, jitter_percent: f64) -> Self {
        Self {
            think_time,
            jitter_percent,
            skip_first_iteration: true,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=100.0).contains(&self.jitter_percent) {
            return Err(EngineError::InvalidPacing(format!(
                "jitter_percent {} is outside [0, 100]",
                self.jitter_percent
            )));
        }

        let (lo, hi) = match self.think_time {
            ThinkTime::Fixed { secs } => (secs, secs),
            ThinkTime::Uniform { min_secs, max_secs } => (min_secs, max_secs),
        };
        if !lo.is_finite() || !hi.is_finite() || lo < 0.0 {
            return Err(EngineError::InvalidPacing(
                "think time must be finite and non-negative".to_string(),
            ));
        }
        if hi < lo {
            return Err(EngineError::InvalidPacing(format!(
                "think time max {} is below min {}",
                hi, lo
            )));
        }

        Ok(())
    }

    /// Delay to wait after `iteration` (0-based) of a virtual user, or
    /// `None` when no delay applies.
    pub fn delay_after<R: Rng + ?Sized>(&self, iteration: u64, rng: &mut R) -> Option<Duration> {
        if iteration == 0 && self.skip_first_iteration {
            return None;
        }

        let base = self.think_time.base(rng);
        Some(Duration::from_secs_f64(compute_delay(
            base,
            self.jitter_percent,
            rng,
        )))
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(ThinkTime::fixed(1.0), 10.0)
    }
}
