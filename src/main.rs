use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "papersnipe")]
#[command(version, about = "Turn daily research papers into runnable Gradio Spaces")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline over the daily paper listing
    Process {
        /// Listing date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Run the pipeline for one manually supplied URL
    Url {
        url: String,

        /// Title to record (defaults to "Manual Entry: <url>")
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Retry stages that failed on earlier runs
    Retry,
    /// Show database statistics
    Stats,
    /// Show everything recorded for one paper
    Show { id: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default papersnipe.toml
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // A missing .env is fine; variables may come from the shell.
    dotenvy::from_path(project_dir.join(".env")).ok();
    init_tracing(cli.verbose, cli.log_json);

    match &cli.command {
        Commands::Process { date } => {
            cmd::cmd_process(&project_dir, cli.verbose, date.as_deref()).await?
        }
        Commands::Url { url, title } => {
            cmd::cmd_url(&project_dir, cli.verbose, url, title.as_deref()).await?
        }
        Commands::Retry => cmd::cmd_retry(&project_dir, cli.verbose).await?,
        Commands::Stats => cmd::cmd_stats(&project_dir)?,
        Commands::Show { id } => cmd::cmd_show(&project_dir, id)?,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.verbose, command.clone())?
        }
    }

    Ok(())
}
