use crate::{Exit, RunArgs};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use surge_core::{metrics, SurgeConfig};
use surge_http::HttpTransport;
use surge_runner::{shutdown_signal, Progress, RunOrchestrator, StopReason};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub(crate) async fn run_scenario(args: RunArgs, mut config: SurgeConfig) -> anyhow::Result<Exit> {
    args.target.apply(&mut config);
    if let Some(preset) = args.scenario {
        config.run.scenario = preset.as_str().to_string();
    }
    if let Some(seed) = args.seed {
        config.run.seed = Some(seed);
    }
    if let Some(max_duration) = &args.max_duration {
        config.run.max_duration = Some(max_duration.clone());
    }
    config.validate().context("invalid configuration")?;

    let scenario = config.scenario()?;
    if scenario.preset.is_some_and(|p| p.is_probe()) {
        info!("Scenario {} is a startup probe, running cold-start", scenario.name);
        return crate::probe::run_probe(&config, Default::default(), args.output, args.format)
            .await;
    }

    let transport = Arc::new(
        HttpTransport::new(&config.target).context("failed to build HTTP transport")?,
    );

    println!("🚀 Starting {} against {}", scenario.name, transport.base_url());
    println!("   Profile: {}", scenario.profile.description());
    println!("   Mix: {}", scenario.mix);
    println!();

    let (progress_tx, progress_rx) = watch::channel(Progress::default());
    let orchestrator = RunOrchestrator::new(scenario, transport)?.with_progress(progress_tx);
    let progress = (!args.no_progress).then(|| spawn_progress_bar(progress_rx));

    let result = orchestrator.run_until(shutdown_signal()).await;
    drop(orchestrator);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_setup_failure() => {
            error!("{}", e);
            eprintln!("❌ {}", e);
            return Ok(Exit::SetupFailed);
        }
        Err(e) => return Err(e.into()),
    };

    if outcome.scheduler.stop_reason == StopReason::Shutdown {
        warn!("Run was interrupted, summary covers the completed part only");
    }

    let summary = outcome.summary;
    println!("{}", summary.render(args.format)?);

    if let Some(path) = &args.output {
        summary
            .write_report(path, args.format)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("📝 Report written to {}", path.display());
    }

    if let Some(path) = &args.prometheus_out {
        std::fs::write(path, metrics::gather_text())
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }

    if summary.post_recovery.is_degraded() {
        warn!("Target did not recover after the run");
    }

    if summary.passed() {
        println!("✅ All thresholds passed");
        Ok(Exit::Passed)
    } else {
        println!("❌ Thresholds failed:");
        for violation in summary.verdict.violations() {
            println!("  - {}", violation);
        }
        Ok(Exit::ThresholdsFailed)
    }
}

/// Mirrors scheduler progress on a progress bar until the sender is dropped.
fn spawn_progress_bar(mut rx: watch::Receiver<Progress>) -> JoinHandle<()> {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = *rx.borrow();
            bar.set_length(progress.budget.as_secs());
            bar.set_position(progress.elapsed.as_secs());
            bar.set_message(format!(
                "{} VUs (target {}), {} iterations",
                progress.active_vus, progress.target_vus, progress.iterations
            ));
        }
        bar.finish_and_clear();
    })
}
