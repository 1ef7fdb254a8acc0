//! CLI for the xfer upload engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xfer_core::config;

use commands::{run_config, run_upload, UploadOverrides};

/// Top-level CLI for xfer.
#[derive(Debug, Parser)]
#[command(name = "xfer")]
#[command(about = "xfer: resumable uploads with retry, backoff and admission control", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload one or more files to an endpoint and wait for them to finish.
    Upload {
        /// Upload endpoint URL (each file gets its own upload id).
        url: String,

        /// Files to upload.
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Maximum concurrent in-flight uploads.
        #[arg(long, value_name = "N")]
        capacity: Option<usize>,

        /// Backoff delay after the first failure, in seconds.
        #[arg(long, value_name = "SECS")]
        base_delay: Option<f64>,

        /// Ceiling on the backoff delay, in seconds.
        #[arg(long, value_name = "SECS")]
        max_delay: Option<f64>,

        /// Give up on anything unfinished after this many seconds.
        #[arg(long, value_name = "SECS")]
        deadline: Option<f64>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

impl CliCommand {
    /// Run the parsed command. `Ok(false)` means it ran but some upload failed.
    pub async fn run_from_args() -> Result<bool> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Upload {
                url,
                files,
                capacity,
                base_delay,
                max_delay,
                deadline,
            } => {
                let overrides = UploadOverrides {
                    capacity,
                    base_delay,
                    max_delay,
                    deadline,
                };
                run_upload(cfg, overrides, &url, &files).await
            }
            CliCommand::Config => {
                run_config(&cfg)?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests;
