//! Ballast Node - big-file store server.

use anyhow::Context;
use ballast_node::config::{ConfigOverrides, NodeConfig};
use ballast_node::observability::{init_logging, LogFormat};
use ballast_node::server;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Ballast Node - serves big-file content to Ballast clients
#[derive(Parser, Debug)]
#[command(name = "ballast-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding served content
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Shared cache directory
    #[arg(long, global = true)]
    system_cache: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and wire protocol
    Serve {
        /// API listen address
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Largest accepted upload in bytes
        #[arg(long)]
        max_upload_bytes: Option<u64>,
    },
    /// Answer wire protocol requests on stdin/stdout
    Stdio,
    /// Print the effective configuration as YAML
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut overrides = ConfigOverrides {
        cache_dir: args.cache_dir,
        system_cache: args.system_cache,
        log_level: args.log_level,
        log_format: args.log_format,
        ..ConfigOverrides::default()
    };
    if let Command::Serve {
        listen,
        max_upload_bytes,
    } = &args.command
    {
        overrides.listen_addr = *listen;
        overrides.max_upload_bytes = *max_upload_bytes;
    }

    let mut config =
        NodeConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    overrides.apply(&mut config)?;

    if let Command::PrintConfig = args.command {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    init_logging(
        &config.log_level,
        LogFormat::parse(&config.log_format) == LogFormat::Json,
    );
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Ballast node");

    std::fs::create_dir_all(&config.cache_dir).with_context(|| {
        format!(
            "failed to create cache directory {}",
            config.cache_dir.display()
        )
    })?;

    match args.command {
        Command::Serve { .. } => server::run_http(&config).await,
        Command::Stdio => server::run_stdio(&config).await,
        Command::PrintConfig => Ok(()),
    }
}
