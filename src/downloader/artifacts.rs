use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::FORMAT_OPTIONS;

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FORMAT_OPTIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Best-effort sweep for the most recently modified audio file in `dir`.
/// The wrapped tool does not report which path it wrote, so the newest
/// track in the output directory is the closest available answer.
pub fn newest_audio_file(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_audio_file(&path) {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|meta| meta.modified()) {
            let newer = newest
                .as_ref()
                .map(|(stamp, _)| modified > *stamp)
                .unwrap_or(true);
            if newer {
                newest = Some((modified, path));
            }
        }
    }

    newest.and_then(|(_, path)| path.file_name()?.to_str().map(str::to_owned))
}

/// True when a previously recorded artifact is still present on disk.
pub fn artifact_exists(dir: &Path, artifact: &str) -> bool {
    dir.join(artifact).is_file()
}
