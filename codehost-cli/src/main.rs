//! Codehost CLI - operate repositories, pull requests and the SSH transport

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use codehost_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{KeyArgs, PrArgs, RepoArgs, ServeArgs};

/// Codehost: repository hosting core
#[derive(Parser, Debug)]
#[command(name = "codehost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.config/codehost/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root of the bare repositories (overrides config and env)
    #[arg(long, global = true)]
    repo_root: Option<PathBuf>,

    /// Root of the merge workspaces (overrides config and env)
    #[arg(long, global = true)]
    merge_root: Option<PathBuf>,

    /// SSH port (overrides config and env)
    #[arg(long, global = true)]
    ssh_port: Option<u32>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Create, browse and manage repositories
    Repo(RepoArgs),

    /// Check, inspect and merge pull requests
    Pr(PrArgs),

    /// Manage registered SSH keys
    Key(KeyArgs),

    /// Run the SSH transport
    Serve(ServeArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = Config::load_with_overrides(
        cli.config.as_deref(),
        cli.repo_root.clone(),
        cli.merge_root.clone(),
        cli.ssh_port,
    )?;

    tracing::debug!(
        repo_root = %config.storage.repo_root.display(),
        merge_root = %config.storage.merge_root.display(),
        "Configuration loaded"
    );

    match cli.command {
        Some(Commands::Version) => {
            println!("codehost {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Repo(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Pr(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Key(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Serve(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Config) => {
            println!("Codehost Configuration");
            println!("======================");
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            println!();
            let path = cli.config.clone().or_else(Config::default_config_path);
            if let Some(path) = path {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("Codehost - repository hosting core");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
