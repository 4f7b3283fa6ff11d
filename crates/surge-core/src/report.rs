//! Run summary and report generation

use crate::aggregator::{MetricsSummary, OverallMetrics, PhaseSummary};
use crate::error::EngineResult;
use crate::executor::CheckResult;
use crate::health::{HealthStatus, RecoveryState};
use crate::run::RunContext;
use crate::threshold::Verdict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format `{}`", other)),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub test_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub avg_rps: f64,
    pub baseline: Option<String>,
    pub overall: OverallMetrics,
    pub per_phase: Vec<PhaseSummary>,
    pub checks: Vec<CheckResult>,
    pub thresholds: Vec<String>,
    pub pre_health: HealthStatus,
    pub post_recovery: RecoveryState,
    pub verdict: Verdict,
}

impl RunSummary {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: &RunContext,
        metrics: MetricsSummary,
        checks: Vec<CheckResult>,
        thresholds: Vec<String>,
        pre_health: HealthStatus,
        post_recovery: RecoveryState,
        verdict: Verdict,
    ) -> Self {
        let end_time = context.end_time.unwrap_or_else(Utc::now);
        let duration_secs =
            (end_time - context.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let total_requests = metrics.overall.total_requests;

        Self {
            run_id: context.run_id,
            test_name: context.test_name.clone(),
            start_time: context.start_time,
            end_time,
            duration_secs,
            total_requests,
            avg_rps: if duration_secs > 0.0 {
                total_requests as f64 / duration_secs
            } else {
                0.0
            },
            baseline: metrics.baseline,
            overall: metrics.overall,
            per_phase: metrics.per_phase,
            checks,
            thresholds,
            pre_health,
            post_recovery,
            verdict,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    pub fn render(&self, format: ReportFormat) -> EngineResult<String> {
        Ok(match format {
            ReportFormat::Text => self.to_text(),
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json => self.to_json()?,
        })
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> EngineResult<()> {
        let content = self.render(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Console block printed at teardown.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "========== {} Results ==========", self.test_name);
        let _ = writeln!(out, "Run id: {}", self.run_id);
        let _ = writeln!(out, "Start time: {}", self.start_time.to_rfc3339());
        let _ = writeln!(out, "End time: {}", self.end_time.to_rfc3339());
        let _ = writeln!(out, "Total test duration: {:.2} seconds", self.duration_secs);
        let _ = writeln!(out, "Total requests: {}", self.total_requests);
        let _ = writeln!(out, "Avg RPS: {:.2}", self.avg_rps);
        let _ = writeln!(
            out,
            "Error rate: {:.2}% ({} failed)",
            self.overall.error_rate * 100.0,
            self.overall.failed_requests
        );
        let l = &self.overall.latency;
        let _ = writeln!(
            out,
            "Latency: avg {:.1}ms, p50 {:.1}ms, p90 {:.1}ms, p95 {:.1}ms, p99 {:.1}ms, max {:.1}ms",
            l.avg_ms, l.p50_ms, l.p90_ms, l.p95_ms, l.p99_ms, l.max_ms
        );

        for phase in &self.per_phase {
            let _ = writeln!(out);
            let _ = writeln!(out, "Phase {}:", phase.name);
            if phase.count == 0 {
                let _ = writeln!(out, "  No requests");
                continue;
            }
            let _ = writeln!(out, "  Requests: {}", phase.count);
            let _ = writeln!(out, "  Avg latency: {}", fmt_ms(phase.avg_latency_ms));
            if self.baseline.as_deref() != Some(phase.name.as_str()) {
                let _ = writeln!(
                    out,
                    "  Latency change vs baseline: {}",
                    fmt_pct(phase.latency_delta_vs_baseline)
                );
                let _ = writeln!(
                    out,
                    "  Distance to baseline: {}",
                    fmt_pct(phase.distance_to_baseline)
                );
            }
            let _ = writeln!(out, "  Error rate: {:.2}%", phase.error_rate * 100.0);
        }

        if !self.checks.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Checks:");
            for check in &self.checks {
                let _ = writeln!(
                    out,
                    "  {} {}: {} passed, {} failed",
                    if check.fails == 0 { "✓" } else { "✗" },
                    check.name,
                    check.passes,
                    check.fails
                );
            }
        }

        let _ = writeln!(out);
        match self.post_recovery {
            RecoveryState::Recovered => {
                let _ = writeln!(out, "Application successfully recovered to healthy state");
            }
            RecoveryState::Degraded { http_status } => {
                let _ = writeln!(
                    out,
                    "WARNING: application did NOT recover (health status {})",
                    http_status
                );
            }
        }

        match &self.verdict {
            Verdict::Passed => {
                let _ = writeln!(out, "Thresholds: PASSED");
            }
            Verdict::Failed { violations } => {
                let _ = writeln!(out, "Thresholds: FAILED");
                for v in violations {
                    let _ = writeln!(out, "  {}", v);
                }
            }
        }
        out
    }

    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let pass_emoji = if self.passed() { "✅" } else { "❌" };
        let l = &self.overall.latency;

        let mut phases = String::new();
        for phase in &self.per_phase {
            let _ = writeln!(
                phases,
                "| {} | {} | {:.2}% | {} | {} |",
                phase.name,
                phase.count,
                phase.error_rate * 100.0,
                fmt_ms(phase.avg_latency_ms),
                fmt_pct(phase.latency_delta_vs_baseline),
            );
        }

        let mut checks = String::new();
        for check in &self.checks {
            let _ = writeln!(
                checks,
                "| {} | {} | {} | {:.2}% |",
                check.name,
                check.passes,
                check.fails,
                check.pass_rate() * 100.0
            );
        }

        let thresholds = match &self.verdict {
            Verdict::Passed => "✅ **All thresholds passed**".to_string(),
            Verdict::Failed { violations } => {
                let lines: Vec<String> = violations.iter().map(|v| format!("- {}", v)).collect();
                format!("❌ **Failed thresholds**:\n\n{}", lines.join("\n"))
            }
        };

        format!(
            r#"# Load Test Report: {}

**Status**: {} {}

---

## Summary

- **Run**: {}
- **Start**: {}
- **End**: {}
- **Duration**: {:.1} seconds
- **Total Requests**: {}
- **Failed**: {}
- **Error Rate**: {:.4}%
- **Average RPS**: {:.2}

---

## Latency

| Percentile | Latency |
|------------|---------|
| Avg | {:.2}ms |
| P50 | {:.2}ms |
| P90 | {:.2}ms |
| P95 | {:.2}ms |
| P99 | {:.2}ms |
| Max | {:.2}ms |

---

## Phases

Baseline: {}

| Phase | Requests | Error Rate | Avg Latency | Delta vs Baseline |
|-------|----------|------------|-------------|-------------------|
{}
---

## Checks

| Check | Passed | Failed | Pass Rate |
|-------|--------|--------|-----------|
{}
---

## Health

- **Before run**: {}
- **After run**: {}

---

## Thresholds

{}
"#,
            self.test_name,
            pass_emoji,
            if self.passed() { "PASSED" } else { "FAILED" },
            self.run_id,
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            self.end_time.format("%Y-%m-%d %H:%M:%S UTC"),
            self.duration_secs,
            self.total_requests,
            self.overall.failed_requests,
            self.overall.error_rate * 100.0,
            self.avg_rps,
            l.avg_ms,
            l.p50_ms,
            l.p90_ms,
            l.p95_ms,
            l.p99_ms,
            l.max_ms,
            self.baseline.as_deref().unwrap_or("n/a"),
            phases,
            checks,
            self.pre_health.http_status,
            match self.post_recovery {
                RecoveryState::Recovered => "recovered".to_string(),
                RecoveryState::Degraded { http_status } => format!("degraded ({})", http_status),
            },
            thresholds,
        )
    }
}

fn fmt_ms(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.0}ms", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn fmt_pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:+.1}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}
