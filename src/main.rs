mod config;
mod downloader;
mod errors;
mod metadata;
mod server;
mod utils;

use std::path::PathBuf;

use clap::Parser;
use log::info;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "spotdl-bulk")]
#[command(version)]
#[command(about = "Batch Spotify downloads through spotdl, driven from a local web page")]
struct Cli {
    /// Port for the local web UI
    #[arg(long)]
    port: Option<u16>,

    /// Directory downloaded tracks are written to
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Path to the spotdl executable
    #[arg(long)]
    spotdl_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.dev {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Starting spotdl-bulk");

    let mut config = match AppConfig::load() {
        Ok(config) => {
            info!("Configuration loaded");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(download_dir) = cli.download_dir {
        config.download_dir = download_dir;
    }
    if let Some(spotdl_path) = cli.spotdl_path {
        config.spotdl_path = spotdl_path;
    }

    utils::ensure_dir_exists(&config.download_dir).await?;
    info!("Saving downloads to {}", config.download_dir.display());

    server::Server::new(config).start().await
}
