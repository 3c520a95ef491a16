//! CLI entry point for taskhub.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use taskhub_core::config::EngineSettings;
use taskhub_core::db::Database;
use taskhub_core::engine;
use taskhub_core::task::{Task, TaskStatus};
use tracing::{debug, info};

mod cli;
mod commands;
mod output;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?cli, "CLI arguments parsed");

    let settings = engine_settings(&cli);
    let db = Database::new(&cli.db)
        .await
        .with_context(|| format!("cannot open task database {}", cli.db.display()))?;
    let manager = engine::assemble(db, settings)?;
    info!(db = %cli.db.display(), "taskhub starting");

    let finished = match &cli.command {
        Command::Crawl(args) => {
            Some(commands::run_crawl_command(&manager, args, cli.quiet).await?)
        }
        Command::Generate(args) => {
            Some(commands::run_generate_command(&manager, args, cli.quiet).await?)
        }
        Command::Restart { id } => {
            Some(commands::run_restart_command(&manager, id, cli.quiet).await?)
        }
        Command::List(args) => {
            commands::run_list_command(&manager, args).await?;
            None
        }
        Command::Show { id } => {
            commands::run_show_command(&manager, id).await?;
            None
        }
        Command::Delete { id } => {
            commands::run_delete_command(&manager, id).await?;
            None
        }
        Command::Cleanup { scope } => {
            commands::run_cleanup_command(&manager, *scope).await?;
            None
        }
    };

    Ok(exit_code(finished.as_ref()))
}

fn engine_settings(cli: &Cli) -> EngineSettings {
    let mut settings = EngineSettings {
        download_root: cli.output_dir.clone(),
        retry_count: u32::from(cli.retries),
        max_file_size: cli.max_file_size,
        max_concurrent_tasks: usize::from(cli.concurrency),
        ..EngineSettings::default()
    };
    if let Some(url) = &cli.catalog_url {
        settings.catalog_base_url.clone_from(url);
    }
    if let Some(url) = &cli.generation_url {
        settings.generation_base_url.clone_from(url);
    }
    settings
}

/// Followed tasks that did not complete exit non-zero.
fn exit_code(finished: Option<&Task>) -> ExitCode {
    match finished.map(Task::status) {
        None | Some(TaskStatus::Completed) => ExitCode::SUCCESS,
        Some(TaskStatus::Cancelled) => ExitCode::from(130),
        Some(_) => ExitCode::FAILURE,
    }
}
