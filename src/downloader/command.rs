use crate::config::{AppConfig, DownloadSettings};
use crate::errors::Result;

/// Builds the spotdl invocation for one link.
///
/// The only side effect is making sure the download directory exists, since
/// spotdl expects to write into it. Missing or unknown settings fall back to
/// defaults instead of failing.
pub fn build_command(link: &str, settings: &DownloadSettings, config: &AppConfig) -> Result<Vec<String>> {
    std::fs::create_dir_all(&config.download_dir)?;

    let output = format!(
        "{}/{}",
        config.download_dir.display(),
        settings.output_template()
    );

    let mut cmd = vec![
        config.spotdl_path.clone(),
        "download".to_string(),
        link.to_string(),
        "--output".to_string(),
        output,
    ];

    if let Some(bitrate) = settings.bitrate() {
        cmd.push("--bitrate".to_string());
        cmd.push(bitrate.to_string());
    }

    if let Some(format) = settings.format_flag() {
        cmd.push("--format".to_string());
        cmd.push(format.to_string());
    }

    if settings.playlist_numbering {
        cmd.push("--playlist-numbering".to_string());
    }

    if settings.skip_explicit {
        cmd.push("--skip-explicit".to_string());
    }

    if settings.generate_lrc {
        cmd.push("--generate-lrc".to_string());
    }

    Ok(cmd)
}
