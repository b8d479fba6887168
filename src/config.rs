use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{AppError, Result};

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{artists} - {title}.{output-ext}";
pub const DEFAULT_FORMAT: &str = "mp3";

/// Formats spotdl can emit; anything else falls back to the default.
pub const FORMAT_OPTIONS: [&str; 6] = ["mp3", "flac", "m4a", "opus", "ogg", "wav"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub download_dir: PathBuf,
    pub port: u16,
    pub spotdl_path: String,
    pub defaults: DownloadSettings,
}

/// Per-download options as sent by the UI. Field names match the JSON the
/// settings panel posts; unknown keys in a request are ignored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadSettings {
    pub quality: String,
    pub format: String,
    pub output: String,
    pub playlist_numbering: bool,
    pub skip_explicit: bool,
    pub generate_lrc: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            port: DEFAULT_PORT,
            spotdl_path: "spotdl".to_string(),
            defaults: DownloadSettings::default(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            quality: "best".to_string(),
            format: DEFAULT_FORMAT.to_string(),
            output: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            playlist_numbering: false,
            skip_explicit: false,
            generate_lrc: false,
        }
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("./downloads"))
        .join("spotdl")
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        let config_dir = config_path.parent().unwrap();

        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("spotdl-bulk").join("config.json"))
    }
}

impl DownloadSettings {
    /// Bitrate argument for the selected quality tier. "best" and unknown
    /// tiers omit the flag so spotdl picks for itself.
    pub fn bitrate(&self) -> Option<&'static str> {
        match self.quality.as_str() {
            "320k" => Some("320k"),
            "256k" => Some("256k"),
            "192k" => Some("192k"),
            "128k" => Some("128k"),
            "disable" => Some("disable"),
            _ => None,
        }
    }

    /// Format argument, present only when the format is recognized and
    /// differs from the implicit mp3 default.
    pub fn format_flag(&self) -> Option<&str> {
        let format = self.format.as_str();
        if format != DEFAULT_FORMAT && FORMAT_OPTIONS.contains(&format) {
            Some(format)
        } else {
            None
        }
    }

    pub fn output_template(&self) -> &str {
        if self.output.is_empty() {
            DEFAULT_OUTPUT_TEMPLATE
        } else {
            &self.output
        }
    }
}
