//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use taskhub_core::config::{DEFAULT_CONCURRENT_TASKS, MAX_RETRY_COUNT};
use taskhub_core::download::constants::DEFAULT_RETRY_COUNT;

/// Run and inspect long-running crawl and image-generation tasks.
#[derive(Parser, Debug)]
#[command(name = "taskhub")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Task database file
    #[arg(long, default_value = "taskhub.db", global = true)]
    pub db: PathBuf,

    /// Root directory for task output
    #[arg(short = 'o', long, default_value = "downloads", global = true)]
    pub output_dir: PathBuf,

    /// Maximum tasks executing at once (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENT_TASKS as u8, value_parser = clap::value_parser!(u8).range(1..=100), global = true)]
    pub concurrency: u8,

    /// Retry attempts after the first for requests and downloads (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RETRY_COUNT as u8, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_RETRY_COUNT)), global = true)]
    pub retries: u8,

    /// Reject downloads larger than this many bytes
    #[arg(long, global = true)]
    pub max_file_size: Option<u64>,

    /// Catalog API base URL
    #[arg(long, global = true)]
    pub catalog_url: Option<String>,

    /// Generation backend base URL
    #[arg(long, global = true)]
    pub generation_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl the catalog and download every page of the items found
    Crawl(CrawlArgs),
    /// Generate images with the generation backend
    Generate(GenerateArgs),
    /// Restart a finished task and follow it
    Restart {
        /// Task id
        id: String,
    },
    /// List tasks, newest first
    List(ListArgs),
    /// Show one task and its discovered items
    Show {
        /// Task id
        id: String,
    },
    /// Delete one task that is not running
    Delete {
        /// Task id
        id: String,
    },
    /// Delete finished tasks
    Cleanup {
        /// Which finished tasks to delete
        #[arg(value_enum, default_value_t = CleanupArg::All)]
        scope: CleanupArg,
    },
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("target").required(true).args(["tag", "user", "illust"])))]
pub struct CrawlArgs {
    /// Search by tag or keyword
    #[arg(long)]
    pub tag: Option<String>,

    /// List an author's works
    #[arg(long)]
    pub user: Option<String>,

    /// Fetch a single work
    #[arg(long)]
    pub illust: Option<String>,

    /// Sort order for tag search (date_d, date, popular_d)
    #[arg(long)]
    pub order: Option<String>,

    /// Content mode for tag search (all, safe, r18)
    #[arg(long)]
    pub mode: Option<String>,

    /// Maximum items to collect
    #[arg(short = 'n', long)]
    pub limit: Option<u32>,

    /// Delay before each request in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub delay: Option<u64>,

    /// Send requests through this proxy
    #[arg(long)]
    pub proxy: Option<String>,

    /// Raw Cookie header for the catalog session
    #[arg(long)]
    pub cookie: Option<String>,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Positive prompt
    pub prompt: String,

    #[arg(long, default_value = "")]
    pub negative: String,

    #[arg(long, default_value_t = 20)]
    pub steps: u32,

    #[arg(long, default_value_t = 7.0)]
    pub cfg_scale: f64,

    #[arg(long, default_value_t = 512)]
    pub width: u32,

    #[arg(long, default_value_t = 512)]
    pub height: u32,

    /// -1 for a random seed
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub seed: i64,

    #[arg(long, default_value = "Euler a")]
    pub sampler: String,

    #[arg(short = 'b', long, default_value_t = 1)]
    pub batch_size: u32,

    /// Checkpoint to load (backend default when omitted)
    #[arg(long, default_value = "")]
    pub model: String,

    /// Enable the hires fix pass
    #[arg(long)]
    pub hires: bool,

    /// LoRA overlay as NAME or NAME:WEIGHT (repeatable)
    #[arg(long = "lora", value_parser = parse_lora)]
    pub loras: Vec<(String, f64)>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Task type (crawl, generate, train, tag, classify)
    #[arg(long = "type")]
    pub task_type: Option<String>,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,

    /// Tasks per page (1-100)
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub page_size: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CleanupArg {
    Completed,
    Failed,
    All,
}

fn parse_lora(value: &str) -> Result<(String, f64), String> {
    let (name, weight) = match value.rsplit_once(':') {
        Some((name, weight)) => {
            let weight = weight
                .parse::<f64>()
                .map_err(|_| format!("invalid LoRA weight '{weight}'"))?;
            (name, weight)
        }
        None => (value, 1.0),
    };
    if name.trim().is_empty() {
        return Err("LoRA name must not be empty".to_string());
    }
    Ok((name.trim().to_string(), weight))
}
