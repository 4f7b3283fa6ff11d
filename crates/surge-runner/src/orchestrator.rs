//! Scenario orchestrator
//!
//! Drives one run through `Idle → Setup → Running → Teardown → Done`:
//! pre-run health gate, scheduled load, post-run recovery check, then the
//! summary and threshold verdict.

use crate::scheduler::{Progress, SchedulerReport, VuScheduler};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use surge_core::threshold;
use surge_core::{
    EngineResult, HealthGate, IterationEngine, RunContext, RunState, RunSummary, ScenarioConfig,
    ThresholdInputs, Transport,
};
use tokio::sync::watch;
use tracing::{info, warn};

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub scheduler: SchedulerReport,
}

/// Runs one scenario against one transport. Single use.
pub struct RunOrchestrator {
    scenario: ScenarioConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<RunState>,
    progress: Option<watch::Sender<Progress>>,
}

impl RunOrchestrator {
    pub fn new(scenario: ScenarioConfig, transport: Arc<dyn Transport>) -> EngineResult<Self> {
        scenario.validate()?;
        Ok(Self {
            scenario,
            transport,
            state: Mutex::new(RunState::Idle),
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: watch::Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn advance(&self, next: RunState) -> EngineResult<()> {
        self.state.lock().advance(next)
    }

    /// Run the full profile.
    pub async fn run(&self) -> EngineResult<RunOutcome> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the profile ends, the budget is spent, or `shutdown`
    /// resolves. A failed pre-run health check returns
    /// [`surge_core::EngineError::SetupFailure`] without issuing any load.
    pub async fn run_until<F>(&self, shutdown: F) -> EngineResult<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        self.advance(RunState::Setup)?;
        let mut context = RunContext::begin(&self.scenario.name);
        info!(
            run_id = %context.run_id,
            scenario = %self.scenario.name,
            profile = %self.scenario.profile.description(),
            "Starting run"
        );

        let gate = HealthGate::new(Arc::clone(&self.transport));
        let pre_health = match gate.pre_run().await {
            Ok(status) => status,
            Err(e) => {
                self.advance(RunState::Failed)?;
                return Err(e);
            }
        };

        self.advance(RunState::Running)?;
        let engine = Arc::new(IterationEngine::for_scenario(
            &self.scenario,
            Arc::clone(&self.transport),
        ));
        let mut scheduler = VuScheduler::new(Arc::clone(&engine), &self.scenario);
        if let Some(progress) = &self.progress {
            scheduler = scheduler.with_progress(progress.clone());
        }
        let scheduler_report = scheduler.run(shutdown).await;

        self.advance(RunState::Teardown)?;
        let post_recovery = gate.post_run().await;
        context.finish();

        let aggregator = engine.aggregator();
        let baseline = engine.classifier().baseline_name();
        let metrics = aggregator.summarize(baseline.as_deref());
        let inputs = ThresholdInputs::collect(aggregator, &metrics.overall, &self.scenario.thresholds);
        let verdict = threshold::evaluate(&self.scenario.thresholds, &inputs);
        for violation in verdict.violations() {
            warn!(%violation, "Threshold failed");
        }

        let summary = RunSummary::new(
            &context,
            metrics,
            engine.checks().snapshot(),
            self.scenario.thresholds.iter().map(|t| t.to_string()).collect(),
            pre_health,
            post_recovery,
            verdict,
        );

        self.advance(RunState::Done)?;
        info!(
            run_id = %summary.run_id,
            total_requests = summary.total_requests,
            error_rate = summary.overall.error_rate,
            passed = summary.passed(),
            "Run complete"
        );

        Ok(RunOutcome {
            summary,
            scheduler: scheduler_report,
        })
    }
}
