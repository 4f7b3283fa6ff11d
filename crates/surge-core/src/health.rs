//! Health gating around a run, and cold-start probing

use crate::aggregator::nearest_rank;
use crate::error::{EngineError, EngineResult};
use crate::metrics::HEALTH_CHECKS_TOTAL;
use crate::threshold::ThresholdInputs;
use crate::transport::Transport;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Result of one health call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub http_status: u16,
    pub healthy: bool,
}

impl HealthStatus {
    pub fn from_status(http_status: u16) -> Self {
        Self {
            http_status,
            healthy: http_status == 200,
        }
    }
}

/// Target state observed after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecoveryState {
    Recovered,
    /// Target was unhealthy after the run. The run's data still stands.
    Degraded { http_status: u16 },
}

impl RecoveryState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Single-shot health checks before and after a run.
#[derive(Clone)]
pub struct HealthGate {
    transport: Arc<dyn Transport>,
}

impl HealthGate {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Issue one health call.
    pub async fn check_health(&self) -> HealthStatus {
        let response = self.transport.health().await;
        let status = HealthStatus::from_status(response.status);
        HEALTH_CHECKS_TOTAL
            .with_label_values(&[if status.healthy { "healthy" } else { "unhealthy" }])
            .inc();
        status
    }

    /// Fail closed: an unhealthy target aborts the run before any load.
    pub async fn pre_run(&self) -> EngineResult<HealthStatus> {
        let status = self.check_health().await;
        if !status.healthy {
            error!(
                status = status.http_status,
                "Application health check failed before run"
            );
            return Err(EngineError::SetupFailure {
                status: status.http_status,
            });
        }

        info!(status = status.http_status, "Application healthy, starting run");
        Ok(status)
    }

    /// Report whether the target recovered. Never fails the run.
    pub async fn post_run(&self) -> RecoveryState {
        let status = self.check_health().await;
        if status.healthy {
            info!("Application successfully recovered to healthy state");
            RecoveryState::Recovered
        } else {
            warn!(
                status = status.http_status,
                "Application did NOT recover after run"
            );
            RecoveryState::Degraded {
                http_status: status.http_status,
            }
        }
    }
}

/// Cold-start probe settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColdStartConfig {
    /// Delay between health polls
    pub poll_interval: Duration,
    /// Give up after this long without a healthy response
    pub timeout: Duration,
    /// Reads issued once the target is healthy
    pub warmup_requests: u32,
    /// Pause between warm-up reads
    pub warmup_pause: Duration,
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            warmup_requests: 5,
            warmup_pause: Duration::from_millis(500),
        }
    }
}

/// What the cold-start probe observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColdStartReport {
    pub healthy: bool,
    /// Seconds from probe start to the first healthy response
    pub time_to_healthy_secs: Option<f64>,
    pub health_polls: u32,
    pub warmup_latencies_ms: Vec<f64>,
    /// Warm-up reads answered with 200 or 404
    pub warmup_accepted: u32,
    pub total_secs: f64,
}

impl ColdStartReport {
    /// Threshold inputs over the warm-up reads. A probe that never saw a
    /// healthy target has no reads and reports an error rate of 1.
    pub fn threshold_inputs(&self) -> ThresholdInputs {
        let count = self.warmup_latencies_ms.len() as u64;
        if count == 0 {
            return ThresholdInputs {
                error_rate: if self.healthy { 0.0 } else { 1.0 },
                ..Default::default()
            };
        }

        let mut sorted = self.warmup_latencies_ms.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let nearest = |p: f64| sorted[nearest_rank(sorted.len(), p)];

        let mut inputs = ThresholdInputs {
            avg_ms: Some(sorted.iter().sum::<f64>() / sorted.len() as f64),
            med_ms: Some(nearest(50.0)),
            max_ms: sorted.last().copied(),
            error_rate: (count - u64::from(self.warmup_accepted)) as f64 / count as f64,
            request_count: count,
            ..Default::default()
        };
        for p in [50.0, 90.0, 95.0, 99.0] {
            inputs = inputs.with_percentile(p, nearest(p));
        }
        inputs
    }
}

/// Polls the health endpoint until the target comes up, then measures the
/// first-request penalty with a few reads.
pub struct ColdStartProbe {
    transport: Arc<dyn Transport>,
    config: ColdStartConfig,
}

impl ColdStartProbe {
    pub fn new(transport: Arc<dyn Transport>, config: ColdStartConfig) -> Self {
        Self { transport, config }
    }

    pub async fn run(&self) -> ColdStartReport {
        let gate = HealthGate::new(Arc::clone(&self.transport));
        let start = Instant::now();
        let mut polls = 0u32;
        let mut time_to_healthy = None;

        loop {
            polls += 1;
            let status = gate.check_health().await;
            if status.healthy {
                let secs = start.elapsed().as_secs_f64();
                info!("Cold start complete in {:.2} seconds", secs);
                time_to_healthy = Some(secs);
                break;
            }
            if start.elapsed() + self.config.poll_interval > self.config.timeout {
                warn!(
                    polls,
                    "Application did not become healthy within {:?}", self.config.timeout
                );
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let mut latencies = Vec::new();
        let mut accepted = 0;
        if time_to_healthy.is_some() {
            for i in 0..self.config.warmup_requests {
                let response = self.transport.get_entity(1).await;
                if matches!(response.status, 200 | 404) {
                    accepted += 1;
                }
                info!(
                    "Warmup request {}: {:.3}s (status {})",
                    i + 1,
                    response.duration_ms / 1000.0,
                    response.status
                );
                latencies.push(response.duration_ms);
                if i + 1 < self.config.warmup_requests {
                    tokio::time::sleep(self.config.warmup_pause).await;
                }
            }
        }

        ColdStartReport {
            healthy: time_to_healthy.is_some(),
            time_to_healthy_secs: time_to_healthy,
            health_polls: polls,
            warmup_latencies_ms: latencies,
            warmup_accepted: accepted,
            total_secs: start.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Unhealthy for the first `unhealthy_polls` health calls.
    struct BootingTransport {
        unhealthy_polls: u32,
        health_calls: AtomicU32,
        reads: AtomicU32,
    }

    impl BootingTransport {
        fn new(unhealthy_polls: u32) -> Self {
            Self {
                unhealthy_polls,
                health_calls: AtomicU32::new(0),
                reads: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for BootingTransport {
        async fn get_entity(&self, _id: u64) -> TransportResponse {
            self.reads.fetch_add(1, Ordering::SeqCst);
            TransportResponse::new(404, 3.0, None)
        }

        async fn search(&self, _term: &str) -> TransportResponse {
            TransportResponse::new(200, 1.0, None)
        }

        async fn create(&self, _payload: &Value) -> TransportResponse {
            TransportResponse::new(201, 1.0, None)
        }

        async fn health(&self) -> TransportResponse {
            let n = self.health_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.unhealthy_polls {
                TransportResponse::failed(1.0)
            } else {
                TransportResponse::new(200, 1.0, Some(r#"{"status":"UP"}"#.to_string()))
            }
        }
    }

    #[test]
    fn test_health_status_from_code() {
        assert!(HealthStatus::from_status(200).healthy);
        assert!(!HealthStatus::from_status(204).healthy);
        assert!(!HealthStatus::from_status(0).healthy);
    }

    #[tokio::test]
    async fn test_pre_run_fails_closed() {
        let gate = HealthGate::new(Arc::new(BootingTransport::new(1)));

        let err = gate.pre_run().await.unwrap_err();

        assert!(err.is_setup_failure());
        assert!(gate.pre_run().await.is_ok());
    }

    #[tokio::test]
    async fn test_post_run_reports_degraded() {
        let gate = HealthGate::new(Arc::new(BootingTransport::new(1)));

        assert_eq!(
            gate.post_run().await,
            RecoveryState::Degraded { http_status: 0 }
        );
        assert_eq!(gate.post_run().await, RecoveryState::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_probe_waits_then_warms_up() {
        let transport = Arc::new(BootingTransport::new(3));
        let probe = ColdStartProbe::new(transport.clone(), ColdStartConfig::default());

        let report = probe.run().await;

        assert!(report.healthy);
        assert_eq!(report.health_polls, 4);
        assert_eq!(report.warmup_latencies_ms.len(), 5);
        assert_eq!(report.warmup_accepted, 5);
        assert_eq!(transport.reads.load(Ordering::SeqCst), 5);

        let inputs = report.threshold_inputs();
        assert_eq!(inputs.request_count, 5);
        assert_eq!(inputs.error_rate, 0.0);
        assert_eq!(inputs.percentile(99.0), Some(3.0));
    }

    #[test]
    fn test_warmup_percentiles_use_nearest_rank() {
        let report = ColdStartReport {
            healthy: true,
            time_to_healthy_secs: Some(1.0),
            health_polls: 1,
            warmup_latencies_ms: vec![20.0, 10.0],
            warmup_accepted: 2,
            total_secs: 2.0,
        };

        let inputs = report.threshold_inputs();

        assert_eq!(inputs.med_ms, Some(10.0));
        assert_eq!(inputs.percentile(50.0), Some(10.0));
        assert_eq!(inputs.percentile(99.0), Some(20.0));
        assert_eq!(inputs.max_ms, Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_probe_times_out() {
        let transport = Arc::new(BootingTransport::new(u32::MAX));
        let config = ColdStartConfig {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
            ..Default::default()
        };

        let report = ColdStartProbe::new(transport.clone(), config).run().await;

        assert!(!report.healthy);
        assert_eq!(report.time_to_healthy_secs, None);
        assert!(report.warmup_latencies_ms.is_empty());
        assert_eq!(transport.reads.load(Ordering::SeqCst), 0);
        assert_eq!(report.threshold_inputs().error_rate, 1.0);
    }
}
