use clap::{Parser, Subcommand};
use infra_core::{AgentConfig, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod commands;

use commands::{FaultArg, Seed};

#[derive(Parser, Debug)]
#[command(name = "infra-agent", version, about = "Intent-driven infrastructure action agent")]
struct Cli {
    /// Configuration file (YAML). Defaults to ./infra-agent.yaml when present.
    #[arg(long, short, global = true, env = "INFRA_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and Grafana webhook
    Serve {
        /// Seed the simulated cluster, e.g. `cache-cluster-1:scaled_to=3`
        #[arg(long = "seed", value_parser = commands::parse_seed)]
        seeds: Vec<Seed>,
    },

    /// Print the plan for an intent without executing it
    Plan {
        /// Intent file (YAML or JSON)
        file: PathBuf,

        /// Current state of the target, e.g. `--initial scaled_to=3`
        #[arg(long = "initial", value_parser = commands::parse_assignment)]
        initial: Vec<(String, serde_json::Value)>,
    },

    /// Plan, execute and report an intent against the simulated cluster
    Run {
        /// Intent file (YAML or JSON)
        file: PathBuf,

        /// Current state of the target, e.g. `--initial scaled_to=3`
        #[arg(long = "initial", value_parser = commands::parse_assignment)]
        initial: Vec<(String, serde_json::Value)>,

        /// Inject a fault, e.g. `add_node:2` or `add_node:2:permanent`
        #[arg(long = "fault", value_parser = commands::parse_fault)]
        faults: Vec<FaultArg>,
    },

    /// Show the execution record of a plan from the configured store
    Status {
        plan_id: Uuid,

        /// Print the raw record as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List the registered actions
    Actions {
        /// Print full definitions as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.cmd {
        Command::Serve { seeds } => commands::serve::run(&config, &seeds).await?,
        Command::Plan { file, initial } => commands::plan::run(&config, &file, &initial).await?,
        Command::Run {
            file,
            initial,
            faults,
        } => commands::run::run(&config, &file, &initial, &faults).await?,
        Command::Status { plan_id, json } => commands::status::run(&config, plan_id, json).await?,
        Command::Actions { json } => commands::actions::run(json)?,
    }

    Ok(())
}

/// `RUST_LOG` wins over `logging.level`. Logs go to stderr so command
/// output on stdout stays machine-readable.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}
