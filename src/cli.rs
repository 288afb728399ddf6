//! Command line interface for `quip-mirror`.
//!
//! Parsing lives in [`Cli`]; [`run`] is the async entrypoint used by both
//! `main()` and the integration tests. It resolves the configuration, wires
//! the rate limiter, client and filesystem store together and maps the run's
//! report onto a process exit code.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::QuipClient;
use crate::export::FsStore;
use crate::load_config::{load_config, ConfigOverrides};
use crate::rate_limit::RateLimiter;
use crate::synchronise::synchronise;

/// Exit code when the run finished but something was not mirrored and `--strict` was given.
pub const EXIT_INCOMPLETE: u8 = 2;

/// CLI for quip-mirror: copy a Quip folder tree to local disk.
#[derive(Parser)]
#[clap(
    name = "quip-mirror",
    version,
    about = "Mirror a Quip folder tree to local HTML, Markdown and office exports"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror the root folder and everything below it
    Sync {
        /// Path to an optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,

        /// API token; falls back to QUIP_API_TOKEN
        #[clap(long)]
        token: Option<String>,

        /// Id of the folder to mirror
        #[clap(long)]
        root_folder: Option<String>,

        /// Directory that receives the mirror
        #[clap(long)]
        output_dir: Option<PathBuf>,

        /// Base URL of the API
        #[clap(long)]
        base_url: Option<String>,

        /// Exit with status 2 if any folder or file could not be mirrored
        #[clap(long)]
        strict: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Sync {
            config,
            token,
            root_folder,
            output_dir,
            base_url,
            strict,
        } => {
            let overrides = ConfigOverrides {
                token,
                root_folder_id: root_folder,
                output_dir,
                base_url,
            };
            let config = load_config(config.as_deref(), overrides)?;
            tracing::info!(command = "sync", "Starting synchronisation process");

            let limiter = Arc::new(RateLimiter::new(
                config.rate_limit.max_requests,
                config.rate_limit.window(),
            ));
            let client = QuipClient::new(&config.api, limiter, config.retry)?;

            let report = match synchronise(&config.mirror, &client, &FsStore).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    return Err(e.into());
                }
            };

            println!("Mirror complete: {report}");
            for failure in &report.branch_failures {
                eprintln!(
                    "failed: folder {} ({}): {}",
                    failure.folder_id,
                    failure.dir.display(),
                    failure.kind
                );
            }
            for document in &report.documents {
                for artifact in document.failures() {
                    if let Err(e) = &artifact.result {
                        eprintln!("failed: {}: {e}", artifact.path.display());
                    }
                }
            }

            if report.is_clean() {
                tracing::info!(command = "sync", "Synchronisation complete");
                Ok(ExitCode::SUCCESS)
            } else if strict {
                tracing::warn!(command = "sync", "Synchronisation incomplete, exiting with failure");
                Ok(ExitCode::from(EXIT_INCOMPLETE))
            } else {
                tracing::warn!(command = "sync", "Synchronisation complete with failures");
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
