//! Guild Sim CLI.
//!
//! Commands:
//! - scenarios: Run the scripted relation and confirmation scenarios
//! - stress: Fire concurrent relation proposals and check pair uniqueness
//! - config: Print the effective kernel configuration as TOML

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acton_reactive::prelude::*;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use guild_kernel::{HostLayout, KernelConfig, LayoutKind};
use guild_sim::report::timestamped_path;
use guild_sim::scenario::{self, ScenarioEnv};
use guild_sim::{stress, LogPresenter, RunReport, StressConfig};

#[derive(Parser)]
#[command(name = "guild-sim")]
#[command(version)]
#[command(about = "Scenario and stress harness for the guild kernel")]
struct Cli {
    /// Kernel configuration file (TOML). Defaults apply when omitted
    #[arg(long, env = "GUILD_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Host layout override: single, partitioned or opaque
    #[arg(long)]
    layout: Option<String>,

    /// Region owner threads for the partitioned layout
    #[arg(long)]
    regions: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every scripted scenario
    Scenarios {
        /// Write a JSON report (a timestamp is added to the file name)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Concurrent proposer stress run
    Stress {
        /// Number of guilds
        #[arg(long, default_value = "6")]
        guilds: usize,

        /// Concurrent proposer lanes
        #[arg(long, default_value = "8")]
        proposers: usize,

        /// Proposals per lane
        #[arg(long, default_value = "20")]
        rounds: usize,

        /// Artificial store latency in milliseconds
        #[arg(long, default_value = "5")]
        latency_ms: u64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Write a JSON report (a timestamp is added to the file name)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

fn parse_layout(name: &str) -> Result<LayoutKind> {
    match name.to_lowercase().as_str() {
        "single" | "single_authority" => Ok(LayoutKind::Single),
        "partitioned" | "regions" => Ok(LayoutKind::Partitioned),
        "opaque" | "unknown" => Ok(LayoutKind::Opaque),
        other => bail!("unknown layout '{}': expected single, partitioned or opaque", other),
    }
}

fn load_config(cli: &Cli) -> Result<KernelConfig> {
    let mut config = match &cli.config {
        Some(path) => KernelConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KernelConfig::default(),
    };
    if let Some(layout) = &cli.layout {
        config.scheduler.layout = parse_layout(layout)?;
    }
    if let Some(regions) = cli.regions {
        config.scheduler.region_threads = regions;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&cli)?;
    let layout = HostLayout::from_config(&config.scheduler);

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }

        Commands::Scenarios { output } => {
            let presenter = Arc::new(LogPresenter::new());
            let mut runtime = ActonApp::launch_async().await;
            let mut report = RunReport::new(format!("{:?}", layout));

            let env = ScenarioEnv {
                config,
                layout: Some(layout),
                presenter: presenter.clone(),
            };
            report.scenarios = scenario::run_all(&mut runtime, &env).await;

            finish(&mut report, &presenter);
            let _ = runtime.shutdown_all().await;
            report.print_summary();
            save(&report, output)?;
            if !report.passed() {
                bail!("one or more scenarios failed");
            }
        }

        Commands::Stress {
            guilds,
            proposers,
            rounds,
            latency_ms,
            seed,
            output,
        } => {
            let presenter = Arc::new(LogPresenter::new());
            let mut runtime = ActonApp::launch_async().await;
            let mut report = RunReport::new(format!("{:?}", layout));

            let stress_config = StressConfig {
                guilds,
                proposers,
                rounds,
                latency: Duration::from_millis(latency_ms),
                seed,
            };
            let stats = stress::run(
                &mut runtime,
                &config,
                Some(layout),
                presenter.clone(),
                &stress_config,
            )
            .await?;
            report.stress = Some(stats);

            finish(&mut report, &presenter);
            let _ = runtime.shutdown_all().await;
            report.print_summary();
            save(&report, output)?;
            if !report.passed() {
                bail!("pair uniqueness was violated");
            }
        }
    }

    Ok(())
}

fn finish(report: &mut RunReport, presenter: &LogPresenter) {
    report.ended_at = Utc::now();
    report.notices = presenter.tally();
    report.off_owner_notices = presenter.off_owner();
}

fn save(report: &RunReport, output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = output {
        let path = timestamped_path(&path);
        report.save(&path)?;
        info!(path = %path.display(), "Report written");
    }
    Ok(())
}
