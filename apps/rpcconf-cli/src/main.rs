#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod commands;
mod config;
mod plan;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::plan::Plan;

/// rpcconf - resolve, validate and announce service/reference configuration
#[derive(Parser)]
#[command(name = "rpcconf")]
#[command(about = "rpcconf - resolve, validate and announce service/reference configuration")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "rpcconf.yaml")]
    config: PathBuf,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every resolved descriptor as JSON
    Resolve {
        /// Only print explicitly set fields
        #[arg(long)]
        explicit_only: bool,
    },
    /// Print announcement URLs
    Urls {
        /// Host announced for protocols without an explicit binding
        #[arg(long)]
        host: Option<String>,
    },
    /// Validate configuration and exit
    Check {
        /// Require the `application` section
        #[arg(long)]
        strict: bool,
    },
    /// Export services and bind references in-process until Ctrl-C
    Run {
        /// Host announced for protocols without an explicit binding
        #[arg(long)]
        host: Option<String>,
        /// Tear down right after everything is up
        #[arg(long)]
        once: bool,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    } else {
        EnvFilter::new(default_level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::load(&cli.config)?;
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Resolve { explicit_only } => {
            let plan = Plan::build(&config, None, false)?;
            commands::resolve(&plan, explicit_only, &mut stdout)
        }
        Commands::Urls { host } => {
            let plan = Plan::build(&config, host.as_deref(), false)?;
            commands::urls(&plan, &mut stdout)
        }
        Commands::Check { strict } => {
            let plan = Plan::build(&config, None, strict)?;
            commands::check(&plan, &mut stdout)
        }
        Commands::Run { host, once } => {
            drop(stdout);
            let plan = Plan::build(&config, host.as_deref(), false)?;
            tracing::info!(
                services = plan.services.len(),
                references = plan.references.len(),
                "rpcconf starting"
            );
            commands::run(&plan, async move {
                if once {
                    return;
                }
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl-C");
                }
            })
            .await
        }
    }
}
