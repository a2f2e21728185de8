use std::path::PathBuf;

use cartsync_config::MutationPolicy;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::scenario::ScenarioName;

#[derive(Parser)]
#[command(name = "cartsync", version, about = "Optimistic cart mutations, scripted and simulated")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the config's log_level (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted scenario against the in-memory service
    Scenario {
        /// Scenario to run
        #[arg(value_enum, default_value = "all")]
        name: ScenarioName,
    },
    /// Run the deterministic simulation harness
    Sim {
        /// RNG seed
        #[arg(short, long, default_value = "0")]
        seed: u64,
        /// Number of steps
        #[arg(short = 'n', long, default_value = "500")]
        steps: usize,
        /// Probability that a mutation call fails (defaults to the config's failure_rate)
        #[arg(short, long)]
        error_rate: Option<f64>,
        /// Probability that a cart refresh fails
        #[arg(long, default_value = "0")]
        fetch_error_rate: f64,
        /// Share of steps that issue several mutations at once
        #[arg(long, default_value = "0.2")]
        burst_ratio: f64,
        /// Mutation policy (defaults to the config's policy)
        #[arg(long)]
        policy: Option<MutationPolicy>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show effective configuration
    Config,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = commands::config::load(cli.config)?;
    let level = cli
        .log_level
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| cartsync_config::DEFAULT_LOG_LEVEL.to_string());
    init_tracing(&level);

    match cli.command {
        Commands::Scenario { name } => {
            commands::scenario::run(&config, name).await?;
        }
        Commands::Sim {
            seed,
            steps,
            error_rate,
            fetch_error_rate,
            burst_ratio,
            policy,
            json,
        } => {
            let args = commands::sim::SimArgs {
                seed,
                steps,
                error_rate,
                fetch_error_rate,
                burst_ratio,
                policy,
                json,
            };
            commands::sim::run(&config, args).await?;
        }
        Commands::Config => {
            commands::config::run(&config)?;
        }
    }

    Ok(())
}
