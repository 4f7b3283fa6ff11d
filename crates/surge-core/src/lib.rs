//! Load-generation and traffic-shaping engine for Surge.

pub mod aggregator;
pub mod config;
pub mod data;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod mix;
pub mod pacing;
pub mod phase;
pub mod profile;
pub mod report;
pub mod run;
pub mod scenario;
pub mod threshold;
pub mod transport;

pub use aggregator::{latency_delta, LatencyStats, MetricsAggregator, MetricsSummary, OverallMetrics, PhaseMetrics, PhaseSummary};
pub use config::{LogFormat, LoggingConfig, RunConfig, SurgeConfig, TargetConfig};
pub use data::{CustomerDataFactory, CustomerRecord, DataFactory};
pub use error::{EngineError, EngineResult};
pub use executor::{CheckCounters, CheckResult, OperationExecutor, Outcome};
pub use health::{ColdStartConfig, ColdStartProbe, ColdStartReport, HealthGate, HealthStatus, RecoveryState};
pub use mix::{OperationKind, OperationMix, WeightedOperation};
pub use pacing::{compute_delay, Pacing, ThinkTime};
pub use phase::{PhaseClassifier, BASELINE_PHASE, UNCLASSIFIED_PHASE};
pub use profile::{LoadProfile, LoadStage};
pub use report::{ReportFormat, RunSummary};
pub use run::{IterationEngine, IterationReport, RunContext, RunState};
pub use scenario::{ScenarioConfig, ScenarioPreset};
pub use threshold::{Threshold, ThresholdInputs, ThresholdViolation, Verdict};
pub use transport::{Transport, TransportResponse};
