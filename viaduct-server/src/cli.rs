//! Command-line surface for building and serving a viaduct container.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "viaduct-server")]
#[command(about = "Loads a viaduct container and serves the routing HTTP API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP query server against a container file.
    Serve {
        /// Path to the `.viaduct` container produced by a build step.
        container: PathBuf,

        /// Address to bind, e.g. `0.0.0.0:5000`.
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        bind: SocketAddr,
    },
    /// Validate a container's fingerprint and block layout without serving.
    Check {
        /// Path to the `.viaduct` container to validate.
        container: PathBuf,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Serve { container, bind } => serve(container, bind).await,
            Commands::Check { container } => check(container),
        }
    }
}

fn open_reader(path: &PathBuf) -> Result<viaduct_engine::container::ContainerReader> {
    let file = std::fs::File::open(path).with_context(|| format!("opening container {}", path.display()))?;
    viaduct_engine::container::ContainerReader::open(file).map_err(|e| anyhow::anyhow!("{e}"))
}

fn check(container: PathBuf) -> Result<()> {
    let reader = open_reader(&container)?;
    let fingerprint = reader.read_and_check_fingerprint().map_err(|e| anyhow::anyhow!("{e}"))?;
    println!(
        "ok: {} ({}.{}.{}), {} blocks",
        container.display(),
        fingerprint.major,
        fingerprint.minor,
        fingerprint.patch,
        reader.list().len()
    );
    Ok(())
}

async fn serve(container: PathBuf, bind: SocketAddr) -> Result<()> {
    let reader = open_reader(&container)?;
    reader.read_and_check_fingerprint().map_err(|e| anyhow::anyhow!("{e}"))?;

    tracing::info!(container = %container.display(), "loading modes");
    let state = viaduct_engine::http::ServerState::load(&reader).map_err(|e| anyhow::anyhow!("{e}"))?;

    viaduct_engine::http::serve(std::sync::Arc::new(state), bind)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}
