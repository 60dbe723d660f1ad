mod commands;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Procfile;
use start::OutputMux;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Mango - run a Procfile-declared application
#[derive(Parser, Debug)]
#[command(name = "mango", author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every process in the Procfile, or just one
    Start(StartArgs),

    /// Validate a Procfile
    Check {
        /// Procfile path
        #[arg(short = 'f', long)]
        procfile: Option<PathBuf>,
    },

    /// Show the version
    Version,
}

/// Flags for `mango start`. Anything left unset falls back to `.mango`.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Only run the process with this name
    pub name: Option<String>,

    /// Procfile path
    #[arg(short = 'f', long)]
    pub procfile: Option<PathBuf>,

    /// Environment file; may be repeated, later files win
    #[arg(short = 'e', long = "env")]
    pub env: Vec<PathBuf>,

    /// Base port for the first process
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Instance counts, e.g. web=2,worker=1
    #[arg(short = 'c', long)]
    pub concurrency: Option<String>,

    /// Restart processes that exit instead of stopping everything
    #[arg(short = 'r', long)]
    pub restart: bool,

    /// Seconds between SIGTERM and SIGKILL during shutdown
    #[arg(short = 't', long = "shutdown-grace-time")]
    pub shutdown_grace_time: Option<u64>,

    /// Ship output lines to this Loki endpoint
    #[arg(long)]
    pub loki_url: Option<String>,

    /// Job label for shipped lines
    #[arg(long)]
    pub loki_job: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputMux::stdout().error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start(args) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(commands::start(args))
        }

        Commands::Check { procfile } => {
            let path = procfile.unwrap_or_else(|| PathBuf::from(config::procfile::DEFAULT_PROCFILE));
            let procfile = Procfile::read(&path)
                .with_context(|| format!("invalid procfile {}", path.display()))?;
            println!("valid procfile detected ({})", procfile.names().join(", "));
            Ok(())
        }

        Commands::Version => {
            println!("mango {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
