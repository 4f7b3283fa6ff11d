use crate::{ColdStartArgs, Exit, TargetArgs};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use surge_core::profile::parse_duration;
use surge_core::threshold::{self, parse_all};
use surge_core::{
    ColdStartConfig, ColdStartProbe, ColdStartReport, HealthGate, ReportFormat, ScenarioPreset,
    SurgeConfig,
};
use surge_http::HttpTransport;

pub(crate) async fn cold_start(args: ColdStartArgs, mut config: SurgeConfig) -> anyhow::Result<Exit> {
    args.target.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let probe = ColdStartConfig {
        poll_interval: parse_duration(&args.poll_interval).context("invalid --poll-interval")?,
        timeout: parse_duration(&args.timeout).context("invalid --timeout")?,
        warmup_requests: args.warmup_requests,
        ..ColdStartConfig::default()
    };

    run_probe(&config, probe, args.output, args.format).await
}

pub(crate) async fn run_probe(
    config: &SurgeConfig,
    probe: ColdStartConfig,
    output: Option<PathBuf>,
    format: ReportFormat,
) -> anyhow::Result<Exit> {
    let thresholds = if config.thresholds.is_empty() {
        ScenarioPreset::ColdStart.config().thresholds
    } else {
        parse_all(&config.thresholds)?
    };
    let transport = Arc::new(
        HttpTransport::new(&config.target).context("failed to build HTTP transport")?,
    );

    println!("🔍 Waiting for {} to become healthy...", transport.base_url());
    let report = ColdStartProbe::new(transport, probe).run().await;

    let rendered = render(&report, format)?;
    println!("{}", rendered);
    if let Some(path) = &output {
        std::fs::write(path, &rendered)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    if !report.healthy {
        eprintln!("❌ Target never became healthy");
        return Ok(Exit::SetupFailed);
    }

    let verdict = threshold::evaluate(&thresholds, &report.threshold_inputs());
    if verdict.passed() {
        Ok(Exit::Passed)
    } else {
        for violation in verdict.violations() {
            println!("  - {}", violation);
        }
        Ok(Exit::ThresholdsFailed)
    }
}

fn render(report: &ColdStartReport, format: ReportFormat) -> anyhow::Result<String> {
    if format == ReportFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let mut out = String::from("=== Cold Start Report ===\n");
    match report.time_to_healthy_secs {
        Some(secs) => out.push_str(&format!(
            "Healthy after {:.2}s ({} polls)\n",
            secs, report.health_polls
        )),
        None => out.push_str(&format!(
            "Not healthy after {:.2}s ({} polls)\n",
            report.total_secs, report.health_polls
        )),
    }
    for (i, ms) in report.warmup_latencies_ms.iter().enumerate() {
        out.push_str(&format!("Warm-up request {}: {:.1}ms\n", i + 1, ms));
    }
    if !report.warmup_latencies_ms.is_empty() {
        out.push_str(&format!(
            "Accepted: {}/{}\n",
            report.warmup_accepted,
            report.warmup_latencies_ms.len()
        ));
    }
    Ok(out)
}

pub(crate) async fn health(args: TargetArgs, mut config: SurgeConfig) -> anyhow::Result<Exit> {
    args.apply(&mut config);
    let transport = Arc::new(
        HttpTransport::new(&config.target).context("failed to build HTTP transport")?,
    );
    let url = format!("{}{}", transport.base_url(), config.target.health_path);

    let status = HealthGate::new(transport).check_health().await;
    if status.healthy {
        println!("✅ {} is healthy (status {})", url, status.http_status);
        Ok(Exit::Passed)
    } else {
        println!("❌ {} is unhealthy (status {})", url, status.http_status);
        Ok(Exit::SetupFailed)
    }
}
