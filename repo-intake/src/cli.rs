/// # repo-intake CLI Interface (Module)
///
/// Command parsing and user-visible invocations for repo-intake.
///
/// All pipeline logic (staging, extraction, cloning, notification) lives in
/// the [`repo-intake-core`] crate. This module is CLI glue: it loads config,
/// builds requests, drives the coordinator and prints one JSON response per
/// ingestion on stdout.
///
/// ## How To Use
/// - Command-line users: run the `repo-intake` binary with `--help`.
/// - Programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`repo-intake-core`]: ../../repo-intake-core/
use crate::load_config::load_config;
use crate::manifest::{load_manifest, RequestEntry};
use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use repo_intake_core::coordinator::{Ingested, IngestionCoordinator};
use repo_intake_core::error::IngestError;
use repo_intake_core::request::IntakeResponse;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for repo-intake: stage repositories for scanning.
#[derive(Parser)]
#[clap(
    name = "repo-intake",
    version,
    about = "Stage uploaded or remote git repositories for static analysis and secrets scanning"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a single repository
    Ingest {
        /// Either "upload" or "url"
        #[clap(long)]
        repo_type: String,
        /// Alphanumeric repository name; also the staging directory name
        #[clap(long)]
        repo_name: String,
        /// File to upload (repo_type=upload)
        #[clap(long)]
        repo_file: Option<PathBuf>,
        /// Remote to shallow-clone (repo_type=url)
        #[clap(long)]
        repo_url: Option<String>,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Ingest every entry of a YAML manifest concurrently
    Batch {
        /// YAML list of {repo_type, repo_name, repo_file?, repo_url?}
        #[clap(long)]
        manifest: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// One line of output.
#[derive(Serialize)]
struct ResponseLine<'a> {
    repo_name: &'a str,
    #[serde(flatten)]
    response: &'a IntakeResponse,
}

fn print_response(repo_name: &str, result: &Result<Ingested, IngestError>) -> Result<bool> {
    let response = IntakeResponse::from(result);
    let line = serde_json::to_string(&ResponseLine {
        repo_name,
        response: &response,
    })?;
    println!("{line}");
    Ok(response.is_success())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Ingest {
            repo_type,
            repo_name,
            repo_file,
            repo_url,
            config,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "ingest", repo_name = %repo_name, "Starting ingestion");
            let coordinator = IngestionCoordinator::from_config(&config).await;

            let entry = RequestEntry {
                repo_type,
                repo_name: repo_name.clone(),
                repo_file,
                repo_url,
            };
            let result = match entry.into_request().await {
                Ok(request) => coordinator.process(request).await,
                Err(e) => Err(e),
            };
            coordinator.publisher().shutdown().await;

            if print_response(&repo_name, &result)? {
                tracing::info!(command = "ingest", "Ingestion complete");
                Ok(())
            } else {
                tracing::error!(command = "ingest", "Ingestion failed");
                Err(anyhow::anyhow!("ingestion of {repo_name} failed"))
            }
        }
        Commands::Batch { manifest, config } => {
            let config = load_config(config)?;
            let entries = load_manifest(&manifest)?;
            tracing::info!(command = "batch", entries = entries.len(), "Starting batch ingestion");
            let coordinator = Arc::new(IngestionCoordinator::from_config(&config).await);

            let runs = entries.into_iter().map(|entry| {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    let name = entry.repo_name.clone();
                    let result = match entry.into_request().await {
                        Ok(request) => coordinator.submit(request).join().await,
                        Err(e) => Err(e),
                    };
                    (name, result)
                }
            });
            let outcomes = join_all(runs).await;
            coordinator.publisher().shutdown().await;

            let total = outcomes.len();
            let mut failed = 0;
            for (name, result) in &outcomes {
                if !print_response(name, result)? {
                    failed += 1;
                }
            }

            if failed == 0 {
                tracing::info!(command = "batch", total, "Batch complete");
                Ok(())
            } else {
                tracing::error!(command = "batch", total, failed, "Batch finished with failures");
                Err(anyhow::anyhow!("{failed} of {total} ingestions failed"))
            }
        }
    }
}
