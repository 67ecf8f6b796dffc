//! Server Faker - CLI Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use server_faker::builder::builder_for;
use server_faker::transformer::transform_file;
use server_faker::{FakerConfig, FakerServer, HttpDispatcher};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "server-faker",
    about = "Creates a fake server from an endpoint file",
    version
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the fake server
    Run {
        /// Path to the endpoint file (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Timeout of a proxied upstream request, in milliseconds
        #[arg(long, default_value_t = 30_000)]
        proxy_timeout_ms: u64,
    },

    /// Validate and compile an endpoint file, then exit
    Validate {
        /// Path to the endpoint file (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print an endpoint file generated from an example JSON document
    Parse {
        /// Path to the example JSON document
        #[arg(short, long)]
        file: PathBuf,

        /// Url of the generated endpoint
        #[arg(short, long)]
        url: Option<String>,

        /// How values are generated: static or dynamic
        #[arg(short = 't', long = "type", default_value = "dynamic")]
        response_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run {
            file,
            port,
            host,
            proxy_timeout_ms,
        } => run(file, &host, port, proxy_timeout_ms).await,
        Command::Validate { file } => {
            info!(path = ?file, "Validating endpoint file");
            let config = FakerConfig::from_file(&file)?;
            let endpoints = builder_for(&file).build_all(&config)?;
            println!("Configuration is valid ({} endpoints defined)", endpoints.len());
            Ok(())
        }
        Command::Parse {
            file,
            url,
            response_type,
        } => {
            let output = transform_file(&file, url.as_deref(), &response_type)?;
            println!("{}", output);
            Ok(())
        }
    }
}

async fn run(file: PathBuf, host: &str, port: u16, proxy_timeout_ms: u64) -> Result<()> {
    info!(path = ?file, "Loading endpoint file");
    let dispatcher = HttpDispatcher::new(Duration::from_millis(proxy_timeout_ms))
        .context("failed to build upstream client")?;
    let server = FakerServer::from_file(&file, Arc::new(dispatcher))?;

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        address = %addr,
        endpoints = server.endpoints().len(),
        "Starting fake server"
    );

    axum::serve(listener, Arc::new(server).router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Fake server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}
