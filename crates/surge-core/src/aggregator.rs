//! Per-phase metrics aggregation
//!
//! One [`MetricsAggregator`] is shared by every virtual user of a run.
//! Counters are atomics, so concurrent `record` calls never lose an
//! increment, and latency totals are kept in integer nanoseconds so the
//! totals do not depend on the order outcomes arrive in.

use crate::executor::Outcome;
use crate::phase::UNCLASSIFIED_PHASE;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct PhaseCounters {
    count: AtomicU64,
    error_count: AtomicU64,
    total_latency_nanos: AtomicU64,
}

impl PhaseCounters {
    fn record(&self, outcome: &Outcome) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if outcome.is_error() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_nanos
            .fetch_add(millis_to_nanos(outcome.duration_millis), Ordering::Relaxed);
    }

    fn snapshot(&self) -> PhaseMetrics {
        PhaseMetrics {
            count: self.count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            total_latency_millis: self.total_latency_nanos.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }
}

fn millis_to_nanos(millis: f64) -> u64 {
    if !millis.is_finite() || millis <= 0.0 {
        return 0;
    }
    (millis * 1e6).round() as u64
}

/// Point-in-time totals of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PhaseMetrics {
    pub count: u64,
    pub error_count: u64,
    pub total_latency_millis: f64,
}

impl PhaseMetrics {
    /// Mean latency, `None` when the phase saw no samples.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.total_latency_millis / self.count as f64)
    }

    /// Error rate (0.0-1.0)
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.count as f64
    }
}

/// Relative latency change of a phase against the baseline:
/// `(phase - baseline) / baseline`.
///
/// `None` when either average is missing or the baseline average is zero.
pub fn latency_delta(phase_avg_ms: Option<f64>, baseline_avg_ms: Option<f64>) -> Option<f64> {
    let phase = phase_avg_ms?;
    let baseline = baseline_avg_ms?;
    if baseline == 0.0 || !baseline.is_finite() {
        return None;
    }
    Some((phase - baseline) / baseline)
}

/// Latency distribution over a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    fn from_micros(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let sum: u128 = sorted.iter().map(|v| *v as u128).sum();
        let to_ms = |us: u64| us as f64 / 1000.0;

        Self {
            avg_ms: sum as f64 / sorted.len() as f64 / 1000.0,
            p50_ms: to_ms(percentile(&sorted, 50.0)),
            p90_ms: to_ms(percentile(&sorted, 90.0)),
            p95_ms: to_ms(percentile(&sorted, 95.0)),
            p99_ms: to_ms(percentile(&sorted, 99.0)),
            max_ms: to_ms(sorted[sorted.len() - 1]),
        }
    }

    /// Percentile `p` (0-100) for one of the tracked ranks.
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        match p {
            p if p == 50.0 => Some(self.p50_ms),
            p if p == 90.0 => Some(self.p90_ms),
            p if p == 95.0 => Some(self.p95_ms),
            p if p == 99.0 => Some(self.p99_ms),
            p if p == 100.0 => Some(self.max_ms),
            _ => None,
        }
    }
}

/// Nearest-rank index of percentile `p` (0-100) in a sorted, non-empty
/// sample set.
pub(crate) fn nearest_rank(len: usize, p: f64) -> usize {
    ((p * len as f64 / 100.0).ceil() as usize)
        .saturating_sub(1)
        .min(len - 1)
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    sorted[nearest_rank(sorted.len(), p)]
}

/// Aggregate totals across every phase.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OverallMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub latency: LatencyStats,
}

/// Summary of one phase at teardown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub name: String,
    pub count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_latency_ms: Option<f64>,
    /// Signed relative change against the baseline average
    pub latency_delta_vs_baseline: Option<f64>,
    /// Absolute relative distance from the baseline average
    pub distance_to_baseline: Option<f64>,
}

/// Everything the aggregator knows at teardown.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricsSummary {
    pub baseline: Option<String>,
    pub overall: OverallMetrics,
    pub per_phase: Vec<PhaseSummary>,
}

impl MetricsSummary {
    pub fn phase(&self, name: &str) -> Option<&PhaseSummary> {
        self.per_phase.iter().find(|p| p.name == name)
    }
}

/// Concurrent accumulator of outcomes, partitioned by phase.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    phases: RwLock<Vec<(String, Arc<PhaseCounters>)>>,
    latencies_us: Mutex<Vec<u64>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregator with `phases` pre-registered so they appear in run order
    /// even when they see no traffic.
    pub fn with_phases<I, S>(phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let aggregator = Self::new();
        {
            let mut guard = aggregator.phases.write();
            for name in phases {
                let name = name.into();
                if !guard.iter().any(|(n, _)| *n == name) {
                    guard.push((name, Arc::new(PhaseCounters::default())));
                }
            }
        }
        aggregator
    }

    fn counters(&self, phase: &str) -> Arc<PhaseCounters> {
        if let Some((_, counters)) = self.phases.read().iter().find(|(n, _)| n == phase) {
            return Arc::clone(counters);
        }

        let mut guard = self.phases.write();
        if let Some((_, counters)) = guard.iter().find(|(n, _)| n == phase) {
            return Arc::clone(counters);
        }
        let counters = Arc::new(PhaseCounters::default());
        guard.push((phase.to_string(), Arc::clone(&counters)));
        counters
    }

    /// Fold one outcome into exactly one phase.
    pub fn record(&self, phase: &str, outcome: &Outcome) {
        self.counters(phase).record(outcome);
        self.latencies_us
            .lock()
            .push(millis_to_nanos(outcome.duration_millis) / 1000);
    }

    /// Totals of one phase, if it exists.
    pub fn phase_metrics(&self, phase: &str) -> Option<PhaseMetrics> {
        self.phases
            .read()
            .iter()
            .find(|(n, _)| n == phase)
            .map(|(_, c)| c.snapshot())
    }

    /// Total samples recorded across all phases.
    pub fn total_count(&self) -> u64 {
        self.phases
            .read()
            .iter()
            .map(|(_, c)| c.count.load(Ordering::Relaxed))
            .sum()
    }

    /// Latency percentile `p` (0-100] over every recorded outcome.
    pub fn latency_percentile_ms(&self, p: f64) -> Option<f64> {
        let mut sorted = self.latencies_us.lock().clone();
        if sorted.is_empty() || !(p > 0.0 && p <= 100.0) {
            return None;
        }
        sorted.sort_unstable();
        Some(percentile(&sorted, p) as f64 / 1000.0)
    }

    /// Derive per-phase averages, error rates and latency deltas.
    ///
    /// Deltas are measured against `baseline`. The unclassified bucket never
    /// gets a delta.
    pub fn summarize(&self, baseline: Option<&str>) -> MetricsSummary {
        let phases: Vec<(String, PhaseMetrics)> = self
            .phases
            .read()
            .iter()
            .map(|(n, c)| (n.clone(), c.snapshot()))
            .collect();

        let baseline_avg = baseline.and_then(|b| {
            phases
                .iter()
                .find(|(n, _)| n == b)
                .and_then(|(_, m)| m.avg_latency_ms())
        });

        let per_phase: Vec<PhaseSummary> = phases
            .iter()
            .filter(|(name, m)| name != UNCLASSIFIED_PHASE || m.count > 0)
            .map(|(name, m)| {
                let avg = m.avg_latency_ms();
                let delta = if name == UNCLASSIFIED_PHASE {
                    None
                } else {
                    latency_delta(avg, baseline_avg)
                };
                PhaseSummary {
                    name: name.clone(),
                    count: m.count,
                    error_count: m.error_count,
                    error_rate: m.error_rate(),
                    avg_latency_ms: avg,
                    latency_delta_vs_baseline: delta,
                    distance_to_baseline: delta.map(f64::abs),
                }
            })
            .collect();

        let total_requests: u64 = phases.iter().map(|(_, m)| m.count).sum();
        let failed_requests: u64 = phases.iter().map(|(_, m)| m.error_count).sum();
        let latency = LatencyStats::from_micros(&self.latencies_us.lock());

        MetricsSummary {
            baseline: baseline.map(str::to_string),
            overall: OverallMetrics {
                total_requests,
                failed_requests,
                error_rate: if total_requests == 0 {
                    0.0
                } else {
                    failed_requests as f64 / total_requests as f64
                },
                latency,
            },
            per_phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::OperationKind;
    use proptest::prelude::*;

    fn ok(ms: f64) -> Outcome {
        Outcome::new(OperationKind::Search, 200, ms, true)
    }

    fn failed(ms: f64) -> Outcome {
        Outcome::new(OperationKind::Search, 503, ms, false)
    }

    #[test]
    fn test_record_updates_one_phase() {
        let aggregator = MetricsAggregator::with_phases(["baseline", "deploy"]);

        aggregator.record("baseline", &ok(10.0));
        aggregator.record("baseline", &failed(30.0));

        let baseline = aggregator.phase_metrics("baseline").unwrap();
        assert_eq!(baseline.count, 2);
        assert_eq!(baseline.error_count, 1);
        assert_eq!(baseline.total_latency_millis, 40.0);
        assert_eq!(baseline.avg_latency_ms(), Some(20.0));
        assert_eq!(baseline.error_rate(), 0.5);

        let deploy = aggregator.phase_metrics("deploy").unwrap();
        assert_eq!(deploy, PhaseMetrics::default());
    }

    #[test]
    fn test_latency_delta_and_distance() {
        let aggregator = MetricsAggregator::with_phases(["baseline", "deploy", "recovery"]);
        aggregator.record("baseline", &ok(100.0));
        aggregator.record("deploy", &ok(150.0));
        aggregator.record("recovery", &ok(105.0));

        let summary = aggregator.summarize(Some("baseline"));

        let deploy = summary.phase("deploy").unwrap();
        assert!((deploy.latency_delta_vs_baseline.unwrap() - 0.5).abs() < 1e-12);

        let recovery = summary.phase("recovery").unwrap();
        assert!((recovery.distance_to_baseline.unwrap() - 0.05).abs() < 1e-12);

        let baseline = summary.phase("baseline").unwrap();
        assert_eq!(baseline.latency_delta_vs_baseline, Some(0.0));
    }

    #[test]
    fn test_delta_undefined_without_baseline_samples() {
        let aggregator = MetricsAggregator::with_phases(["baseline", "deploy"]);
        aggregator.record("deploy", &ok(150.0));

        let summary = aggregator.summarize(Some("baseline"));

        assert_eq!(summary.phase("baseline").unwrap().avg_latency_ms, None);
        assert_eq!(summary.phase("deploy").unwrap().latency_delta_vs_baseline, None);
    }

    #[test]
    fn test_delta_undefined_for_zero_baseline() {
        assert_eq!(latency_delta(Some(10.0), Some(0.0)), None);
        assert_eq!(latency_delta(None, Some(10.0)), None);
        assert_eq!(latency_delta(Some(10.0), None), None);
        assert_eq!(latency_delta(Some(15.0), Some(10.0)), Some(0.5));
    }

    #[test]
    fn test_unclassified_samples_are_counted_without_delta() {
        let aggregator = MetricsAggregator::with_phases(["baseline"]);
        aggregator.record("baseline", &ok(10.0));
        aggregator.record(UNCLASSIFIED_PHASE, &ok(20.0));

        let summary = aggregator.summarize(Some("baseline"));

        assert_eq!(summary.overall.total_requests, 2);
        let unclassified = summary.phase(UNCLASSIFIED_PHASE).unwrap();
        assert_eq!(unclassified.count, 1);
        assert_eq!(unclassified.latency_delta_vs_baseline, None);
    }

    #[test]
    fn test_overall_percentiles() {
        let aggregator = MetricsAggregator::new();
        for i in 0..100 {
            aggregator.record("load", &ok(i as f64));
        }

        let latency = aggregator.summarize(None).overall.latency;

        assert_eq!(latency.p50_ms, 49.0);
        assert_eq!(latency.p95_ms, 94.0);
        assert_eq!(latency.p99_ms, 98.0);
        assert_eq!(latency.max_ms, 99.0);
        assert!((latency.avg_ms - 49.5).abs() < 1e-9);
        assert_eq!(aggregator.latency_percentile_ms(75.0), Some(74.0));
        assert_eq!(aggregator.latency_percentile_ms(0.0), None);
    }

    #[test]
    fn test_percentiles_use_nearest_rank() {
        let aggregator = MetricsAggregator::new();
        for i in 1..=100 {
            aggregator.record("load", &ok(i as f64));
        }
        let latency = aggregator.summarize(None).overall.latency;
        assert_eq!(latency.p50_ms, 50.0);
        assert_eq!(latency.p95_ms, 95.0);
        assert_eq!(latency.p99_ms, 99.0);

        let pair = MetricsAggregator::new();
        pair.record("load", &ok(10.0));
        pair.record("load", &ok(20.0));
        assert_eq!(pair.latency_percentile_ms(50.0), Some(10.0));
        assert_eq!(pair.latency_percentile_ms(51.0), Some(20.0));
        assert_eq!(pair.summarize(None).overall.latency.p50_ms, 10.0);

        assert_eq!(nearest_rank(1, 99.0), 0);
        assert_eq!(nearest_rank(3, 0.0), 0);
        assert_eq!(nearest_rank(100, 90.0), 89);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let aggregator = Arc::new(MetricsAggregator::with_phases(["load"]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        let outcome = if i % 10 == 0 { failed(2.0) } else { ok(1.0) };
                        aggregator.record("load", &outcome);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let load = aggregator.phase_metrics("load").unwrap();
        assert_eq!(load.count, 8_000);
        assert_eq!(load.error_count, 800);
        assert_eq!(load.total_latency_millis, 8_800.0);
        assert_eq!(aggregator.total_count(), 8_000);
    }

    proptest! {
        #[test]
        fn prop_summary_is_order_independent(
            samples in proptest::collection::vec((0.0f64..5_000.0, prop::bool::ANY), 1..200),
            seed in any::<u64>(),
        ) {
            let forward = MetricsAggregator::new();
            for (ms, is_ok) in &samples {
                forward.record("load", &if *is_ok { ok(*ms) } else { failed(*ms) });
            }

            let mut shuffled = samples.clone();
            let len = shuffled.len();
            for i in 0..len {
                let j = (seed.wrapping_mul(i as u64 + 1) % len as u64) as usize;
                shuffled.swap(i, j);
            }
            let backward = MetricsAggregator::new();
            for (ms, is_ok) in shuffled.iter().rev() {
                backward.record("load", &if *is_ok { ok(*ms) } else { failed(*ms) });
            }

            prop_assert_eq!(forward.summarize(None), backward.summarize(None));
        }
    }
}
