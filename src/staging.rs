//! Transport façade: the one active audio source and its playable handle.
//!
//! An in-memory source is only playable once its bytes are addressable, so
//! the façade mints a transient staged file for it. Lifecycle rules:
//! - at most one live staged file per distinct source at any time
//! - the file is cached by structural identity, so re-resolving the same
//!   source never writes a second file
//! - the previous file is deleted before the next one is written when the
//!   identity changes
//! - deleting an already-deleted file is tolerated silently
//!
//! Remote URLs pass through untouched; there is nothing to mint or revoke.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::audio::paths;
use crate::source::{same_source, AudioSource};

/// A playable input resolved from an `AudioSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayableInput {
    Url(String),
    File(PathBuf),
}

struct StagedFile {
    source: AudioSource,
    path: PathBuf,
}

/// Owns the staged-file lifecycle for in-memory sources.
pub struct PlayableStaging {
    dir: PathBuf,
    staged: Option<StagedFile>,
}

impl PlayableStaging {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: paths::create_temp_audio_dir()?,
            staged: None,
        })
    }

    /// Use an explicit directory (tests).
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir, staged: None }
    }

    /// Resolve a source to something the decoder can open.
    ///
    /// Structurally equal blob sources reuse the cached file; a different
    /// identity revokes the old file first, then mints exactly one new one.
    pub fn resolve(&mut self, source: &AudioSource) -> std::io::Result<PlayableInput> {
        match source {
            AudioSource::RemoteUrl { url } => {
                // Identity changed away from any staged blob.
                self.release();
                Ok(PlayableInput::Url(url.clone()))
            }
            AudioSource::LocalBlob { bytes, .. } => {
                if let Some(staged) = &self.staged {
                    if same_source(Some(&staged.source), Some(source)) {
                        return Ok(PlayableInput::File(staged.path.clone()));
                    }
                }

                self.release();

                let path = paths::generate_staged_path(&self.dir, source.extension());
                fs::write(&path, bytes.as_slice())?;
                log::debug!("Staged playable file: {:?}", path);

                self.staged = Some(StagedFile {
                    source: source.clone(),
                    path: path.clone(),
                });
                Ok(PlayableInput::File(path))
            }
        }
    }

    /// Delete the staged file, if any. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(staged) = self.staged.take() {
            match fs::remove_file(&staged.path) {
                Ok(()) => log::debug!("Revoked staged file: {:?}", staged.path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to revoke staged file {:?}: {}", staged.path, e),
            }
        }
    }

    /// Path of the currently staged file, if any.
    pub fn staged_path(&self) -> Option<&Path> {
        self.staged.as_ref().map(|s| s.path.as_path())
    }
}

impl Drop for PlayableStaging {
    fn drop(&mut self) {
        self.release();
    }
}

/// The single active-source slot the rest of the app observes.
///
/// The caller is responsible for clearing one kind of source before setting
/// the other; the slot itself only ever holds one.
#[derive(Clone)]
pub struct ActiveSourceSlot {
    tx: Arc<watch::Sender<Option<AudioSource>>>,
}

impl ActiveSourceSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, source: AudioSource) {
        let _ = self.tx.send(Some(source));
    }

    pub fn clear(&self) {
        let _ = self.tx.send(None);
    }

    pub fn current(&self) -> Option<AudioSource> {
        self.tx.subscribe().borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AudioSource>> {
        self.tx.subscribe()
    }
}

impl Default for ActiveSourceSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(bytes: &[u8]) -> AudioSource {
        AudioSource::LocalBlob {
            bytes: Arc::new(bytes.to_vec()),
            mime_type: "audio/wav".to_string(),
            name: None,
            modified: None,
        }
    }

    fn staged_file_count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn same_source_reuses_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut staging = PlayableStaging::with_dir(tmp.path().to_path_buf());

        let source = blob(&[1, 2, 3, 4]);
        let first = staging.resolve(&source).unwrap();
        let second = staging.resolve(&source.clone()).unwrap();

        assert_eq!(first, second);
        assert_eq!(staged_file_count(tmp.path()), 1);
    }

    #[test]
    fn identity_change_revokes_before_minting() {
        let tmp = tempfile::tempdir().unwrap();
        let mut staging = PlayableStaging::with_dir(tmp.path().to_path_buf());

        let a = blob(&[1, 2, 3]);
        let first = match staging.resolve(&a).unwrap() {
            PlayableInput::File(p) => p,
            other => panic!("expected file, got {:?}", other),
        };
        assert!(first.exists());

        let b = blob(&[1, 2, 3, 4, 5]);
        let second = match staging.resolve(&b).unwrap() {
            PlayableInput::File(p) => p,
            other => panic!("expected file, got {:?}", other),
        };

        // Old file gone, exactly one live file after the swap.
        assert!(!first.exists());
        assert!(second.exists());
        assert_eq!(staged_file_count(tmp.path()), 1);
    }

    #[test]
    fn url_passthrough_revokes_staged_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let mut staging = PlayableStaging::with_dir(tmp.path().to_path_buf());

        staging.resolve(&blob(&[1, 2, 3])).unwrap();
        assert_eq!(staged_file_count(tmp.path()), 1);

        let input = staging
            .resolve(&AudioSource::RemoteUrl {
                url: "/api/audio/7".into(),
            })
            .unwrap();
        assert_eq!(input, PlayableInput::Url("/api/audio/7".into()));
        assert_eq!(staged_file_count(tmp.path()), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut staging = PlayableStaging::with_dir(tmp.path().to_path_buf());

        staging.resolve(&blob(&[1, 2])).unwrap();
        let path = staging.staged_path().unwrap().to_path_buf();

        // Delete out from under the façade; release must stay silent.
        fs::remove_file(&path).unwrap();
        staging.release();
        staging.release();
        assert!(staging.staged_path().is_none());
    }

    #[test]
    fn slot_holds_one_source() {
        let slot = ActiveSourceSlot::new();
        assert!(slot.current().is_none());

        slot.set(blob(&[1]));
        assert!(slot.current().is_some());

        slot.clear();
        assert!(slot.current().is_none());
    }
}
