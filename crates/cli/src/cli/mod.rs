use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod imports;
mod inspect;
mod run;
mod version;

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Host wasm guests against the bridge import table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a module, run its start export and drive its event loop
    Run(run::RunArgs),
    /// Print the host import table
    Imports {
        /// Only show one capability group
        #[arg(name = "GROUP")]
        group: Option<String>,
    },
    /// List a module's imports and exports against the import table
    Inspect {
        #[arg(name = "MODULE")]
        module: PathBuf,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Print version and build details
    Version {
        #[arg(short, long)]
        verbose: bool,
    },
}

pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Run(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(run::run(args))
        }
        Command::Imports { group } => imports::print(group.as_deref()),
        Command::Inspect { module, json } => inspect::inspect(&module, json),
        Command::Version { verbose } => {
            version::print(verbose);
            Ok(())
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge=info,runtime=info,guest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
