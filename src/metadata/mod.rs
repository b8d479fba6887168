use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use crate::errors::{AppError, Result};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const CACHE_TTL_SECONDS: u64 = 3600;

/// What the UI shows for one pasted link before anything is downloaded.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackMeta {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover: String,
}

impl TrackMeta {
    /// Placeholder used whenever a lookup cannot be answered.
    pub fn unknown() -> Self {
        Self {
            title: "(unknown)".to_string(),
            artist: String::new(),
            album: String::new(),
            cover: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    meta: TrackMeta,
    expires_at: u64,
}

impl CacheEntry {
    fn new(meta: TrackMeta, ttl_seconds: u64) -> Self {
        Self {
            meta,
            expires_at: now_seconds() + ttl_seconds,
        }
    }

    fn is_expired(&self) -> bool {
        now_seconds() > self.expires_at
    }
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Resolves a link to display metadata through the public oEmbed endpoints.
/// Lookups never fail outward: anything that goes wrong degrades to the
/// `(unknown)` placeholder so the UI can always render a row.
pub struct MetadataClient {
    client: Client,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl MetadataClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(LOOKUP_TIMEOUT)
                .user_agent("spotdl-bulk/1.0")
                .build()
                .unwrap_or_else(|_| Client::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, link: &str) -> TrackMeta {
        if let Some(meta) = self.cached(link).await {
            return meta;
        }

        match self.fetch(link).await {
            Ok(meta) => {
                self.remember(link, meta.clone()).await;
                meta
            }
            Err(err) => {
                log::warn!("Metadata lookup failed for {}: {}", link, err);
                TrackMeta::unknown()
            }
        }
    }

    async fn fetch(&self, link: &str) -> Result<TrackMeta> {
        let endpoint = oembed_endpoint(link)?;

        let response = self.client.get(&endpoint).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Metadata(format!(
                "oEmbed lookup returned {}",
                response.status()
            )));
        }

        let json: Value = response.json().await?;
        Ok(TrackMeta {
            title: json["title"].as_str().unwrap_or("(unknown)").to_string(),
            artist: json["author_name"].as_str().unwrap_or("").to_string(),
            album: String::new(),
            cover: json["thumbnail_url"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn cached(&self, link: &str) -> Option<TrackMeta> {
        let cache = self.cache.read().await;
        match cache.get(link) {
            Some(entry) if !entry.is_expired() => Some(entry.meta.clone()),
            _ => None,
        }
    }

    async fn remember(&self, link: &str, meta: TrackMeta) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| !entry.is_expired());
        cache.insert(link.to_string(), CacheEntry::new(meta, CACHE_TTL_SECONDS));
    }
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

fn oembed_endpoint(link: &str) -> Result<String> {
    let url =
        Url::parse(link).map_err(|err| AppError::Metadata(format!("invalid link: {}", err)))?;
    let host = url.host_str().unwrap_or_default();

    if host == "open.spotify.com" {
        Ok(format!(
            "https://open.spotify.com/oembed?url={}",
            urlencoding::encode(link)
        ))
    } else if host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com") {
        Ok(format!(
            "https://www.youtube.com/oembed?url={}&format=json",
            urlencoding::encode(link)
        ))
    } else {
        Err(AppError::Metadata(format!("unsupported host: {}", host)))
    }
}
