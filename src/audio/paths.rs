//! XDG path helpers for staged audio files
//!
//! Staged playable files live in: ~/.local/share/clipscribe/temp/audio/

use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// Get the temp audio directory path.
/// Returns: ~/.local/share/clipscribe/temp/audio/
pub(crate) fn temp_audio_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipscribe")
        .join("temp")
        .join("audio")
}

/// Create the temp audio directory if it doesn't exist.
pub fn create_temp_audio_dir() -> std::io::Result<PathBuf> {
    let dir = temp_audio_dir();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Generate a unique staged-file path with the given extension.
/// Format: <unix-secs>_<uuid>.<ext>
pub fn generate_staged_path(dir: &std::path::Path, extension: &str) -> PathBuf {
    let timestamp = unix_secs();
    let filename = format!("{}_{}.{}", timestamp, Uuid::new_v4(), extension);
    dir.join(filename)
}

fn unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Clean up old staged files, keeping only the most recent `retained`.
pub fn cleanup_old_staged_files(retained: usize) -> std::io::Result<usize> {
    let dir = temp_audio_dir();
    if !dir.exists() {
        return Ok(0);
    }

    let mut entries: Vec<_> = fs::read_dir(&dir)?.filter_map(|e| e.ok()).collect();

    if entries.len() <= retained {
        return Ok(0);
    }

    // Sort by modified time (oldest first)
    entries.sort_by(|a, b| {
        let time_a = a.metadata().and_then(|m| m.modified()).ok();
        let time_b = b.metadata().and_then(|m| m.modified()).ok();
        time_a.cmp(&time_b)
    });

    let to_delete = entries.len() - retained;
    let mut deleted = 0;

    for entry in entries.into_iter().take(to_delete) {
        if fs::remove_file(entry.path()).is_ok() {
            log::debug!("Cleaned up old staged file: {:?}", entry.path());
            deleted += 1;
        }
    }

    Ok(deleted)
}
