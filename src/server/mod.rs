use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;

use crate::config::{AppConfig, DownloadSettings};
use crate::downloader::manager::DownloadManager;
use crate::downloader::LinkState;
use crate::errors::{AppError, Result};
use crate::metadata::{MetadataClient, TrackMeta};

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// State shared across handlers.
pub struct AppState {
    pub manager: DownloadManager,
    pub metadata: MetadataClient,
    pub config: AppConfig,
}

/// The local web server: a single embedded page plus the JSON/SSE API the
/// page talks to. Binds to localhost only; this is a single-user tool.
pub struct Server {
    config: AppConfig,
}

impl Server {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            manager: DownloadManager::new(self.config.clone()),
            metadata: MetadataClient::new(),
            config: self.config.clone(),
        });

        Router::new()
            .route("/", get(index_handler))
            .route("/meta", post(meta_handler))
            .route("/download", post(download_handler))
            .route("/status", get(status_handler))
            .route("/cancel", post(cancel_handler))
            .route("/progress/:link", get(progress_handler))
            .with_state(state)
    }

    /// Serves until ctrl-c (or SIGTERM), then shuts down gracefully.
    pub async fn start(&self) -> anyhow::Result<()> {
        let router = self.build_router();
        let addr = format!("127.0.0.1:{}", self.config.port);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Another instance may be running; \
                    pick a different port with --port",
                    self.config.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, err)
            }
        })?;

        log::info!("Listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    #[serde(default)]
    link: String,
}

/// What the settings panel posts alongside a link. Every option is
/// optional; holes are filled from the configured defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest {
    #[serde(default)]
    link: String,
    quality: Option<String>,
    format: Option<String>,
    output: Option<String>,
    playlist_numbering: Option<bool>,
    skip_explicit: Option<bool>,
    generate_lrc: Option<bool>,
}

impl DownloadRequest {
    fn settings(&self, defaults: &DownloadSettings) -> DownloadSettings {
        DownloadSettings {
            quality: self
                .quality
                .clone()
                .unwrap_or_else(|| defaults.quality.clone()),
            format: self
                .format
                .clone()
                .unwrap_or_else(|| defaults.format.clone()),
            output: self
                .output
                .clone()
                .unwrap_or_else(|| defaults.output.clone()),
            playlist_numbering: self.playlist_numbering.unwrap_or(defaults.playlist_numbering),
            skip_explicit: self.skip_explicit.unwrap_or(defaults.skip_explicit),
            generate_lrc: self.generate_lrc.unwrap_or(defaults.generate_lrc),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    links: String,
}

fn require_link(link: &str) -> Result<&str> {
    let link = link.trim();
    if link.is_empty() {
        return Err(AppError::Validation("Missing link".to_string()));
    }
    Ok(link)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn meta_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<TrackMeta>> {
    let link = require_link(&request.link)?;
    Ok(Json(state.metadata.lookup(link).await))
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DownloadRequest>,
) -> Result<StatusCode> {
    let link = require_link(&request.link)?;
    let settings = request.settings(&state.config.defaults);

    if state.manager.start(link, settings) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::CONFLICT)
    }
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Json<HashMap<String, LinkState>> {
    let links: Vec<String> = query
        .links
        .split(',')
        .map(str::trim)
        .filter(|link| !link.is_empty())
        .map(str::to_string)
        .collect();

    Json(state.manager.status(&links))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LinkRequest>,
) -> Result<StatusCode> {
    let link = require_link(&request.link)?;
    state.manager.cancel(link);
    Ok(StatusCode::NO_CONTENT)
}

/// Streams progress events for one link. The first event is the current
/// snapshot; the stream ends on its own after a terminal event, and
/// dropping the connection detaches the listener.
async fn progress_handler(
    State(state): State<Arc<AppState>>,
    Path(link): Path<String>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let subscription = state.manager.subscribe(&link);

    let stream = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let payload = Event::default().json_data(&event).ok()?;
        Some((Ok(payload), subscription))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Waits for a shutdown request from the terminal or the service manager.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => log::info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => log::info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, shutting down");
        }
    }
}
