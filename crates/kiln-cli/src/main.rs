//! Kiln CLI - compile, load and hot-reload Rust code in a live process.

mod callback;
mod colors;
mod options;
mod repl;
mod run;
mod watch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use options::BuildArgs;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Compile, load and hot-reload Rust code in a live process")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and show toolchain output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and execute a source file once
    Run {
        /// Path to the source (.rs file)
        file: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Execute a source file and re-execute it on every change
    Watch {
        /// Path to the source (.rs file)
        file: PathBuf,

        /// Wait for the first change instead of executing right away
        #[arg(long)]
        no_run_now: bool,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Type statements and execute them as modules
    Repl {
        #[command(flatten)]
        build: BuildArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Helper to format kiln-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(kiln_err) = err.downcast_ref::<kiln_core::Error>() {
            anyhow::anyhow!("{}", kiln_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run { file, build } => {
            run::execute(&file, &build, cli.verbose).map_err(format_error)?;
        }

        Commands::Watch {
            file,
            no_run_now,
            build,
        } => {
            watch::execute(&file, &build, !no_run_now, cli.verbose)
                .await
                .map_err(format_error)?;
        }

        Commands::Repl { build } => {
            repl::execute(&build, cli.verbose).map_err(format_error)?;
        }
    }

    Ok(())
}
