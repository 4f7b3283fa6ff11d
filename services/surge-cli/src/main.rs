use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use surge_core::{LogFormat, LoggingConfig, ReportFormat, ScenarioPreset, SurgeConfig};
use tracing_subscriber::{fmt, EnvFilter};

mod probe;
mod run;

#[derive(Parser, Debug)]
#[command(name = "surge")]
#[command(about = "Load generation and traffic shaping against a customer REST service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON); replaces SURGE_CONFIG
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a load scenario
    Run(RunArgs),

    /// Poll the health endpoint until the target is up, then time warm-up reads
    ColdStart(ColdStartArgs),

    /// Issue one health check
    Health(TargetArgs),

    /// List the built-in scenarios
    Scenarios,

    /// Print the resolved configuration
    PrintConfig {
        #[command(flatten)]
        target: TargetArgs,

        /// Scenario preset to resolve
        #[arg(long, short)]
        scenario: Option<ScenarioPreset>,
    },
}

#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Base URL of the service under test
    #[arg(long, env = "SURGE_BASE_URL")]
    base_url: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Scenario preset
    #[arg(long, short)]
    scenario: Option<ScenarioPreset>,

    /// Seed for reproducible operation selection, data and pacing
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this long even if the profile has stages left (e.g. 5m)
    #[arg(long)]
    max_duration: Option<String>,

    /// Write the summary report to this file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Report format: text, markdown or json
    #[arg(long, short, default_value = "text")]
    format: ReportFormat,

    /// Write Prometheus metrics to this file after the run
    #[arg(long)]
    prometheus_out: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ColdStartArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Delay between health polls
    #[arg(long, default_value = "2s")]
    poll_interval: String,

    /// Give up if the target is not healthy after this long
    #[arg(long, default_value = "30s")]
    timeout: String,

    /// Reads issued once the target is healthy
    #[arg(long, default_value_t = 5)]
    warmup_requests: u32,

    /// Write the probe report to this file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Report format: text or json
    #[arg(long, short, default_value = "text")]
    format: ReportFormat,
}

/// Process exit status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    Passed,
    /// Pre-run health gate or configuration failure
    SetupFailed,
    /// At least one threshold was crossed
    ThresholdsFailed,
}

impl Exit {
    fn code(self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::SetupFailed => 1,
            Self::ThresholdsFailed => 99,
        }
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit.code())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            return Exit::SetupFailed.into();
        }
    };

    init_logging(&config.logging);

    let result = match cli.command {
        Commands::Run(args) => run::run_scenario(args, config).await,
        Commands::ColdStart(args) => probe::cold_start(args, config).await,
        Commands::Health(args) => probe::health(args, config).await,
        Commands::Scenarios => {
            list_scenarios();
            Ok(Exit::Passed)
        }
        Commands::PrintConfig { target, scenario } => print_config(target, scenario, config),
    };

    match result {
        Ok(exit) => exit.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            Exit::SetupFailed.into()
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SurgeConfig> {
    match path {
        Some(path) => SurgeConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => SurgeConfig::load().context("failed to load configuration"),
    }
}

fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

impl TargetArgs {
    fn apply(&self, config: &mut SurgeConfig) {
        if let Some(base_url) = &self.base_url {
            config.target.base_url = base_url.clone();
        }
    }
}

fn list_scenarios() {
    println!("Available scenarios:\n");
    for preset in ScenarioPreset::all() {
        println!("  {:<12} {}", preset.as_str(), preset.summary());
        if !preset.is_probe() {
            let config = preset.config();
            let thresholds: Vec<String> = config.thresholds.iter().map(|t| t.to_string()).collect();
            println!("  {:<12} {}", "", config.profile.description());
            println!("  {:<12} thresholds: {}", "", thresholds.join(", "));
        }
        println!();
    }
}

fn print_config(
    target: TargetArgs,
    scenario: Option<ScenarioPreset>,
    mut config: SurgeConfig,
) -> anyhow::Result<Exit> {
    target.apply(&mut config);
    if let Some(preset) = scenario {
        config.run.scenario = preset.as_str().to_string();
    }
    config.validate().context("invalid configuration")?;
    let resolved = config.scenario()?;

    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();
    println!("Scenario: {}", resolved.name);
    println!("Profile:  {}", resolved.profile.description());
    for stage in resolved.profile.stages() {
        println!(
            "  {:>8} -> {:>4} VUs  {}",
            surge_core::profile::format_duration(stage.duration),
            stage.target,
            stage.phase.as_deref().unwrap_or("-")
        );
    }
    println!("Mix:      {}", resolved.mix);
    let thresholds: Vec<String> = resolved.thresholds.iter().map(|t| t.to_string()).collect();
    println!("Thresholds: {}", thresholds.join(", "));

    Ok(Exit::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "surge",
            "run",
            "--scenario",
            "burst_spike",
            "--base-url",
            "http://app:8080",
            "--seed",
            "7",
            "--max-duration",
            "90s",
            "--format",
            "json",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.scenario, Some(ScenarioPreset::BurstSpike));
        assert_eq!(args.target.base_url.as_deref(), Some("http://app:8080"));
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.max_duration.as_deref(), Some("90s"));
        assert_eq!(args.format, ReportFormat::Json);
    }

    #[test]
    fn test_unknown_scenario_is_rejected() {
        assert!(Cli::try_parse_from(["surge", "run", "--scenario", "soak"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Exit::Passed.code(), 0);
        assert_eq!(Exit::SetupFailed.code(), 1);
        assert_eq!(Exit::ThresholdsFailed.code(), 99);
    }

    #[test]
    fn test_config_file_flag() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "target:\n  base_url: http://staging:9000\nrun:\n  scenario: balanced").unwrap();

        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.target.base_url, "http://staging:9000");
        assert_eq!(config.run.scenario, "balanced");
    }
}
