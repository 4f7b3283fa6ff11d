use thiserror::Error;

/// Canonical error type for engine configuration and run setup.
///
/// Per-call failures are not represented here: they are folded into
/// [`crate::Outcome`] values and check counters so the run keeps going.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pre-run health gate did not see a healthy target.
    #[error("setup failed: health check returned status {status}")]
    SetupFailure {
        /// HTTP status observed by the health check (0 when the call failed).
        status: u16,
    },

    /// Operation mix is malformed (weights out of range or not summing to 1.0).
    #[error("invalid operation mix: {0}")]
    InvalidMix(String),

    /// Load profile is malformed.
    #[error("invalid load profile: {0}")]
    InvalidProfile(String),

    /// Pacing parameters are malformed.
    #[error("invalid pacing: {0}")]
    InvalidPacing(String),

    /// Threshold expression could not be parsed.
    #[error("invalid threshold `{expression}`: {reason}")]
    InvalidThreshold {
        /// Expression as written in the configuration.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Scenario preset name is not known.
    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),

    /// Run state machine was asked for a transition it does not allow.
    #[error("invalid run state transition from {from} to {to}")]
    InvalidTransition {
        from: crate::run::RunState,
        to: crate::run::RunState,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error while writing reports.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates an `InvalidThreshold` variant.
    #[must_use]
    pub fn invalid_threshold(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidThreshold {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error came from the pre-run health gate.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::SetupFailure { .. })
    }
}

/// Convenient result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
