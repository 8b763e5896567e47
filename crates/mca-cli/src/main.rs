//! mca CLI - extension host front end.
//!
//! Loads layered configuration, sets up logging, and drives the extension
//! registry, task executor, and leader coordinator from the command line.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod config_bridge;
mod theme;

use commands::{HostContext, OutputFormat, config, extensions, leader};

/// mca - trusted WASM extension host
#[derive(Parser)]
#[command(name = "mca")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    /// Path to an explicit configuration file
    #[arg(short, long, global = true, env = "MCA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, verify, and run extensions
    Extensions {
        #[command(subcommand)]
        command: ExtensionCommands,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Leader election
    Leader {
        #[command(subcommand)]
        command: LeaderCommands,
    },
}

#[derive(Subcommand)]
enum ExtensionCommands {
    /// Load every extension in a directory and report the outcome
    List {
        /// Extension directory (defaults to `extensions.dir`)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Only show extensions whose name matches this regex
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Check the digest and signature of one module
    Verify {
        /// Module path
        file: PathBuf,
    },

    /// Scan one module's imports against the allow-list
    Scan {
        /// Module path
        file: PathBuf,
    },

    /// Load extensions and run an analysis pass over text
    Analyze {
        /// Text to analyze
        text: String,

        /// Extension directory (defaults to `extensions.dir`)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration
    Show,

    /// List the configuration files that were applied
    Paths,
}

#[derive(Subcommand)]
enum LeaderCommands {
    /// Join the election once, report the outcome, and step down
    Probe {
        /// Holder identity (defaults to a generated one)
        #[arg(long)]
        holder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = mca_config::Config::load(cli.config.as_deref());

    // Set up logging from config, with --verbose override.
    let log_config = if let Ok(resolved) = &resolved {
        let mut lc = config_bridge::to_log_config(&resolved.config);
        if cli.verbose {
            "debug".clone_into(&mut lc.level);
        }
        lc
    } else {
        // Fallback if config loading fails.
        let level = if cli.verbose { "debug" } else { "info" };
        mca_telemetry::LogConfig::new(level).with_format(mca_telemetry::LogFormat::Compact)
    };
    if let Err(e) = mca_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let resolved = resolved.context("failed to load configuration")?;
    let base = std::env::current_dir().context("failed to get current directory")?;

    let output_format = match cli.format.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Pretty,
    };
    let host = HostContext::new(resolved, base, output_format);

    match cli.command {
        Commands::Extensions { command } => match command {
            ExtensionCommands::List { dir, name } => {
                extensions::list(&host, dir.as_deref(), name.as_deref())?;
            },
            ExtensionCommands::Verify { file } => extensions::verify(&host, &file)?,
            ExtensionCommands::Scan { file } => extensions::scan(&host, &file)?,
            ExtensionCommands::Analyze { text, dir } => {
                extensions::analyze(&host, text, dir.as_deref()).await?;
            },
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => config::show(&host)?,
            ConfigCommands::Paths => config::paths(&host),
        },
        Commands::Leader { command } => match command {
            LeaderCommands::Probe { holder } => leader::probe(&host, holder.as_deref()).await?,
        },
    }

    Ok(())
}
