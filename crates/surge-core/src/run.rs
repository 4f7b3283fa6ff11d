//! Run lifecycle types and the single-iteration cycle every virtual user runs

use crate::aggregator::MetricsAggregator;
use crate::data::{CustomerDataFactory, DataFactory};
use crate::error::{EngineError, EngineResult};
use crate::executor::{CheckCounters, OperationExecutor, Outcome};
use crate::mix::OperationMix;
use crate::pacing::Pacing;
use crate::phase::PhaseClassifier;
use crate::scenario::ScenarioConfig;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of one scenario run.
///
/// `Idle → Setup → Running → Teardown → Done`. A failed setup ends in
/// `Failed` and never reaches `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Setup,
    Running,
    Teardown,
    Done,
    Failed,
}

impl RunState {
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Setup) | (Setup, Running) | (Setup, Failed) | (Running, Teardown) | (Teardown, Done)
        )
    }

    pub fn advance(&mut self, next: RunState) -> EngineResult<()> {
        if !self.can_advance_to(next) {
            return Err(EngineError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Setup => "setup",
            Self::Running => "running",
            Self::Teardown => "teardown",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Identity and wall-clock bounds of a run. Created at setup, closed at
/// teardown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub test_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RunContext {
    pub fn begin(test_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            test_name: test_name.into(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// Seconds between start and end, or up to now while still open.
    pub fn duration_secs(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub phase: String,
    pub outcome: Outcome,
    /// Pause before the virtual user's next iteration
    pub delay: Option<Duration>,
}

/// Select, execute, record, pace: the cycle each virtual user repeats.
///
/// Shared by all virtual users of a run. The only mutable state it touches
/// is the aggregator and check counters, both safe under concurrent use.
pub struct IterationEngine {
    mix: OperationMix,
    pacing: Pacing,
    executor: OperationExecutor,
    classifier: PhaseClassifier,
    aggregator: Arc<MetricsAggregator>,
}

impl IterationEngine {
    pub fn new(
        mix: OperationMix,
        pacing: Pacing,
        executor: OperationExecutor,
        classifier: PhaseClassifier,
        aggregator: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            mix,
            pacing,
            executor,
            classifier,
            aggregator,
        }
    }

    /// Wire an engine for `config` over `transport` with the customer data
    /// factory.
    pub fn for_scenario(config: &ScenarioConfig, transport: Arc<dyn Transport>) -> Self {
        let factory: Arc<dyn DataFactory> = Arc::new(CustomerDataFactory::new(config.entity_id_max));
        let checks = Arc::new(CheckCounters::new(config.latency_ceiling_ms));
        let classifier = PhaseClassifier::from_profile(&config.profile)
            .with_external_label(config.phase_label.clone());
        let aggregator = Arc::new(MetricsAggregator::with_phases(classifier.phase_names()));

        Self::new(
            config.mix.clone(),
            config.pacing,
            OperationExecutor::new(transport, factory, checks),
            classifier,
            aggregator,
        )
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn checks(&self) -> &Arc<CheckCounters> {
        self.executor.checks()
    }

    pub fn classifier(&self) -> &PhaseClassifier {
        &self.classifier
    }

    /// Run iteration number `iteration` of one virtual user, `elapsed` after
    /// run start. The sample is attributed to the phase active when the call
    /// was issued.
    pub async fn run_once<R: RngCore>(
        &self,
        elapsed: Duration,
        iteration: u64,
        rng: &mut R,
    ) -> IterationReport {
        let kind = self.mix.select(rng);
        let call = self.executor.prepare(kind, rng);
        let outcome = self.executor.dispatch(call).await;

        let phase = self.classifier.classify(elapsed);
        self.aggregator.record(phase, &outcome);

        IterationReport {
            phase: phase.to_string(),
            outcome,
            delay: self.pacing.delay_after(iteration, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::OperationKind;
    use crate::pacing::ThinkTime;
    use crate::profile::{LoadProfile, LoadStage};
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::Value;

    struct SlowerEachPhase;

    #[async_trait]
    impl Transport for SlowerEachPhase {
        async fn get_entity(&self, _id: u64) -> TransportResponse {
            TransportResponse::new(404, 20.0, None)
        }

        async fn search(&self, _term: &str) -> TransportResponse {
            TransportResponse::new(200, 20.0, Some("[]".to_string()))
        }

        async fn create(&self, _payload: &Value) -> TransportResponse {
            TransportResponse::new(500, 20.0, None)
        }

        async fn health(&self) -> TransportResponse {
            TransportResponse::new(200, 1.0, None)
        }
    }

    fn scenario() -> ScenarioConfig {
        ScenarioConfig {
            profile: LoadProfile::new(vec![
                LoadStage::new(Duration::from_secs(60), 5).with_phase("baseline"),
                LoadStage::new(Duration::from_secs(60), 5).with_phase("deploy"),
            ])
            .unwrap(),
            pacing: Pacing::new(ThinkTime::fixed(0.25), 0.0),
            ..ScenarioConfig::default()
        }
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut state = RunState::Idle;
        state.advance(RunState::Setup).unwrap();
        state.advance(RunState::Running).unwrap();
        state.advance(RunState::Teardown).unwrap();
        state.advance(RunState::Done).unwrap();
        assert!(state.is_terminal());

        let mut state = RunState::Setup;
        state.advance(RunState::Failed).unwrap();
        assert!(matches!(
            state.advance(RunState::Running),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(!RunState::Idle.can_advance_to(RunState::Running));
    }

    #[test]
    fn test_run_context_closes() {
        let mut ctx = RunContext::begin("Warm-Start");
        assert!(ctx.end_time.is_none());

        ctx.finish();

        assert!(ctx.end_time.unwrap() >= ctx.start_time);
        assert!(ctx.duration_secs() >= 0.0);
    }

    #[tokio::test]
    async fn test_iteration_records_into_active_phase() {
        let engine = IterationEngine::for_scenario(&scenario(), Arc::new(SlowerEachPhase));
        let mut rng = StdRng::seed_from_u64(11);

        let first = engine.run_once(Duration::from_secs(5), 0, &mut rng).await;
        let second = engine.run_once(Duration::from_secs(65), 1, &mut rng).await;

        assert_eq!(first.phase, "baseline");
        assert_eq!(first.delay, None);
        assert_eq!(second.phase, "deploy");
        assert_eq!(second.delay, Some(Duration::from_millis(250)));

        let aggregator = engine.aggregator();
        assert_eq!(aggregator.phase_metrics("baseline").unwrap().count, 1);
        assert_eq!(aggregator.phase_metrics("deploy").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_iteration_errors_follow_kind() {
        let engine = IterationEngine::for_scenario(&scenario(), Arc::new(SlowerEachPhase));
        let mut rng = StdRng::seed_from_u64(12);

        let mut writes = 0;
        let mut errors = 0;
        for i in 0..200 {
            let report = engine.run_once(Duration::from_secs(1), i, &mut rng).await;
            if report.outcome.kind == OperationKind::Write {
                writes += 1;
            }
            if report.outcome.is_error() {
                errors += 1;
            }
        }

        assert!(writes > 0);
        assert_eq!(errors, writes);
        let baseline = engine.aggregator().phase_metrics("baseline").unwrap();
        assert_eq!(baseline.count, 200);
        assert_eq!(baseline.error_count, writes);
    }
}
