//! cirun CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod local_build;

#[derive(Parser)]
#[command(name = "cirun")]
#[command(about = "CI build runner", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, env = "CIRUN_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands as a build on a configured runner
    Exec {
        /// Path to the runner configuration
        #[arg(short, long, default_value = "config.kdl")]
        config: String,
        /// Runner to use
        #[arg(short, long)]
        runner: String,
        /// Build timeout in seconds (0 uses the default)
        #[arg(long, default_value = "0")]
        timeout: i64,
        /// Build id to report
        #[arg(long, default_value = "1")]
        build_id: u64,
        /// Commands to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        commands: Vec<String>,
    },
    /// Validate a runner configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "config.kdl")]
        path: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Exec {
            config,
            runner,
            timeout,
            build_id,
            commands,
        } => {
            let outcome =
                commands::exec::exec(&config, &runner, commands, timeout, build_id).await?;
            println!("Build {}: {}", build_id, outcome.state);
            if !outcome.state.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
