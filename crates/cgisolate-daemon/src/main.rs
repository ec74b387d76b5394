use anyhow::{Context, Result};
use cgisolate_core::{resolve, ChainBuilder, HandlerRegistry, VERSION};
use cgisolate_daemon::{ChainReport, Config, ConfigSource, LogConfig, MountReport};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cgisolate - per-container resource isolation for node agents
#[derive(Parser, Debug)]
#[command(name = "cgisolate-daemon")]
#[command(version = VERSION)]
#[command(about = "cgisolate Daemon - cgroup resource isolation", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/cgisolate/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List usable cgroup hierarchies under a mount root as JSON
    Resolve {
        /// Root holding `controller[,controller...]` directories
        mount_path: PathBuf,
    },

    /// Build the resource handler chain and report its handlers
    Chain,

    /// Generate default configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only `chain` acts on the settings; the others must survive a broken file
    let (config, source) = match cli.command {
        Commands::Chain => Config::load_checked(&cli.config).map_err(|e| anyhow::anyhow!(e))?,
        _ => Config::load_lenient(&cli.config),
    };
    init_logging(&config.logging)?;

    info!("cgisolate Daemon v{} starting...", VERSION);
    match &source {
        ConfigSource::File => info!("Configuration loaded from {:?}", cli.config),
        ConfigSource::Defaults => {
            warn!("Configuration file not found: {:?}, using defaults", cli.config)
        }
        ConfigSource::Rejected(reason) => {
            warn!("Ignoring configuration file: {}, using defaults", reason)
        }
    }

    match cli.command {
        Commands::Resolve { mount_path } => run_resolve(&mount_path)?,
        Commands::Chain => run_chain(&config)?,
        Commands::GenerateConfig { output } => generate_config(&output)?,
    }

    Ok(())
}

fn run_resolve(mount_path: &Path) -> Result<()> {
    let mapping = resolve(mount_path)?;
    info!("Resolved {} cgroup hierarchies under {:?}", mapping.len(), mount_path);

    println!("{}", serde_json::to_string_pretty(&MountReport::from(&mapping))?);
    Ok(())
}

fn run_chain(config: &Config) -> Result<()> {
    let builder = ChainBuilder::new(Arc::new(HandlerRegistry::linux()));
    let chain = builder
        .chain(&config.isolation)
        .context("Failed to build resource handler chain")?;

    match &chain {
        Some(chain) => info!("Resource handler chain: {:?}", chain.kinds()),
        None => info!("No resource isolation enabled"),
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&ChainReport::new(chain.as_deref()))?
    );
    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &Path) -> Result<()> {
    info!("Generating default configuration file: {:?}", output);

    Config::default()
        .save_to_file(output)
        .map_err(|e| anyhow::anyhow!("Failed to save configuration file: {}", e))?;

    info!("Configuration file generated successfully");
    Ok(())
}

/// Initialize logging with file and stdout output
fn init_logging(logging: &LogConfig) -> Result<()> {
    std::fs::create_dir_all(&logging.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", logging.log_dir))?;

    let file_appender = tracing_appender::rolling::daily(&logging.log_dir, &logging.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // stdout carries command output, so console logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Keep the writer thread alive for the whole process
    std::mem::forget(guard);

    Ok(())
}
