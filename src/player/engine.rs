//! Waveform/playback engine
//!
//! Given an `AudioSource`, decode it into peak buckets for rendering and
//! drive play/pause/seek/volume. Re-attaching a structurally equal source is
//! a no-op; switching sources tears the previous rendering instance down
//! (and revokes its staged file) before the new one is created.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::decode::{self, DecodedAudio, WAVEFORM_BUCKETS};
use super::transport::PlaybackTransport;
use crate::source::{same_source, AudioSource};
use crate::staging::PlayableStaging;

/// Default playback volume.
const DEFAULT_VOLUME: f32 = 0.7;

/// Rendering status of the attached source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PlayerStatus {
    /// No source attached.
    Empty,
    /// Decode in progress; controls disabled.
    Decoding,
    /// Waveform and duration known; controls live.
    Ready,
    /// The source could not be rendered; controls stay disabled.
    DecodeFailed { message: String },
}

/// Snapshot of the player for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUi {
    #[serde(flatten)]
    pub status: PlayerStatus,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub volume: f32,
    pub is_playing: bool,
    pub peaks: Vec<f32>,
}

struct EngineShared {
    source: Option<AudioSource>,
    status: PlayerStatus,
    audio: Option<Arc<DecodedAudio>>,
    peaks: Vec<f32>,
    duration_secs: f64,
    position_secs: f64,
    volume: f32,
    playing: bool,
    transport: Option<PlaybackTransport>,
}

impl EngineShared {
    fn initial() -> Self {
        Self {
            source: None,
            status: PlayerStatus::Empty,
            audio: None,
            peaks: Vec::new(),
            duration_secs: 0.0,
            position_secs: 0.0,
            volume: DEFAULT_VOLUME,
            playing: false,
            transport: None,
        }
    }

    /// Destroy the rendering instance and reset playback state to initial
    /// values. Volume survives a source swap.
    fn teardown(&mut self) {
        self.transport = None; // drop releases the output stream
        self.audio = None;
        self.peaks.clear();
        self.status = PlayerStatus::Empty;
        self.duration_secs = 0.0;
        self.position_secs = 0.0;
        self.playing = false;
    }
}

/// The engine owns the staged playable file for the attached source via the
/// transport façade and serializes attach/detach through `&mut self`.
pub struct PlayerEngine {
    shared: Arc<Mutex<EngineShared>>,
    staging: PlayableStaging,
    /// Bumped on every (re)attach; decode results for an older generation
    /// are dropped on arrival.
    generation: Arc<AtomicU64>,
}

impl PlayerEngine {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self::with_staging(PlayableStaging::new()?))
    }

    pub fn with_staging(staging: PlayableStaging) -> Self {
        Self {
            shared: Arc::new(Mutex::new(EngineShared::initial())),
            staging,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a source. Structurally equal to the current one: no-op —
    /// no re-decode, no new staged file, no state reset.
    pub fn attach(&mut self, source: AudioSource) {
        {
            let shared = self.shared.lock().unwrap();
            if same_source(Some(&source), shared.source.as_ref()) {
                log::debug!("attach: same source, skipping re-initialization");
                return;
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Release the previous rendering instance before resolving the new
        // playable handle; the façade revokes the old staged file first.
        let input = {
            let mut shared = self.shared.lock().unwrap();
            shared.teardown();
            shared.source = Some(source.clone());

            match self.staging.resolve(&source) {
                Ok(input) => {
                    shared.status = PlayerStatus::Decoding;
                    input
                }
                Err(e) => {
                    log::warn!("attach: staging failed: {}", e);
                    shared.status = PlayerStatus::DecodeFailed {
                        message: e.to_string(),
                    };
                    return;
                }
            }
        };

        let shared = self.shared.clone();
        let gen_counter = self.generation.clone();
        tokio::spawn(async move {
            let result = decode::load_playable(&input).await;

            let mut shared = shared.lock().unwrap();
            if gen_counter.load(Ordering::SeqCst) != generation {
                // The source was replaced while we were decoding.
                log::debug!("attach: dropping stale decode result");
                return;
            }

            match result {
                Ok(audio) => {
                    shared.peaks = decode::compute_peaks(&audio.samples, WAVEFORM_BUCKETS);
                    shared.duration_secs = audio.duration_secs();
                    shared.audio = Some(Arc::new(audio));
                    shared.status = PlayerStatus::Ready;
                    log::info!(
                        "Waveform ready: {:.1}s, {} peak buckets",
                        shared.duration_secs,
                        shared.peaks.len()
                    );
                }
                Err(e) => {
                    log::warn!("Waveform decode failed: {}", e);
                    shared.status = PlayerStatus::DecodeFailed {
                        message: e.to_string(),
                    };
                }
            }
        });
    }

    /// Detach the current source, revoking its staged file.
    pub fn detach(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut shared = self.shared.lock().unwrap();
        shared.teardown();
        shared.source = None;
        self.staging.release();
    }

    /// Flip play/pause. No-op until the waveform is ready. The published
    /// playing flag is read back from the transport, not assumed.
    pub fn toggle_playback(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        if shared.status != PlayerStatus::Ready {
            return;
        }

        if shared.transport.is_none() {
            let audio = match &shared.audio {
                Some(audio) => audio.clone(),
                None => return,
            };
            match PlaybackTransport::start(audio, shared.volume) {
                Ok(transport) => shared.transport = Some(transport),
                Err(e) => {
                    log::warn!("Playback unavailable: {}", e);
                    return;
                }
            }
        }

        if let Some(transport) = &shared.transport {
            shared.playing = transport.toggle();
        }
    }

    /// Reset position to 0 and clear the playing flag. No-op until ready.
    pub fn stop(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        if shared.status != PlayerStatus::Ready {
            return;
        }
        if let Some(transport) = &shared.transport {
            transport.stop();
            shared.playing = transport.is_playing();
        }
        shared.position_secs = 0.0;
    }

    /// Seek to an absolute position in seconds, clamped to [0, duration].
    /// The published position updates immediately (optimistically).
    pub fn seek(&mut self, secs: f64) {
        let mut shared = self.shared.lock().unwrap();
        let clamped = secs.clamp(0.0, shared.duration_secs);
        shared.position_secs = clamped;
        if let Some(transport) = &shared.transport {
            transport.seek_to_secs(clamped);
        }
    }

    /// Set volume, clamped to [0,1]. Applied immediately when a transport is
    /// live, queued for the next one otherwise.
    pub fn set_volume(&mut self, volume: f32) {
        let mut shared = self.shared.lock().unwrap();
        let clamped = volume.clamp(0.0, 1.0);
        shared.volume = clamped;
        if let Some(transport) = &shared.transport {
            transport.set_volume(clamped);
        }
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.lock().unwrap().status.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == PlayerStatus::Ready
    }

    pub fn duration_secs(&self) -> f64 {
        self.shared.lock().unwrap().duration_secs
    }

    /// Current position: the live transport value while one exists, the
    /// optimistic value otherwise.
    pub fn position_secs(&self) -> f64 {
        let shared = self.shared.lock().unwrap();
        match &shared.transport {
            Some(transport) => transport.position_secs(),
            None => shared.position_secs,
        }
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock().unwrap().volume
    }

    /// Read the playing flag back from the transport's actual state.
    pub fn is_playing(&self) -> bool {
        let shared = self.shared.lock().unwrap();
        shared
            .transport
            .as_ref()
            .map(|t| t.is_playing())
            .unwrap_or(false)
    }

    pub fn peaks(&self) -> Vec<f32> {
        self.shared.lock().unwrap().peaks.clone()
    }

    /// Path of the staged file backing the attached source, if any (tests).
    pub fn staged_path(&self) -> Option<std::path::PathBuf> {
        self.staging.staged_path().map(|p| p.to_path_buf())
    }

    pub fn snapshot(&self) -> PlayerUi {
        let shared = self.shared.lock().unwrap();
        let (position, playing) = match &shared.transport {
            Some(t) => (t.position_secs(), t.is_playing()),
            None => (shared.position_secs, false),
        };
        PlayerUi {
            status: shared.status.clone(),
            position_secs: position,
            duration_secs: shared.duration_secs,
            volume: shared.volume,
            is_playing: playing,
            peaks: shared.peaks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn wav_source(sample_rate: u32, secs: f32) -> AudioSource {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let total = (sample_rate as f32 * secs) as usize;
            for i in 0..total {
                let t = i as f32 / sample_rate as f32;
                let value = 0.4 * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
                writer
                    .write_sample((value * i16::MAX as f32) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        AudioSource::LocalBlob {
            bytes: Arc::new(cursor.into_inner()),
            mime_type: "audio/wav".to_string(),
            name: None,
            modified: None,
        }
    }

    fn engine_in(dir: &std::path::Path) -> PlayerEngine {
        PlayerEngine::with_staging(PlayableStaging::with_dir(dir.to_path_buf()))
    }

    async fn wait_until_settled(engine: &PlayerEngine) {
        for _ in 0..200 {
            if engine.status() != PlayerStatus::Decoding {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("decode did not settle: {:?}", engine.status());
    }

    #[tokio::test]
    async fn attach_decodes_and_sets_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        engine.attach(wav_source(8_000, 2.0));
        wait_until_settled(&engine).await;

        assert!(engine.is_ready());
        assert!((engine.duration_secs() - 2.0).abs() < 0.05);
        assert_eq!(engine.peaks().len(), WAVEFORM_BUCKETS);
    }

    #[tokio::test]
    async fn reattach_same_source_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        let source = wav_source(8_000, 1.0);
        engine.attach(source.clone());
        wait_until_settled(&engine).await;
        let staged = engine.staged_path().unwrap();

        engine.attach(source);
        // Still ready (no re-decode started), same staged file, still one
        // file on disk.
        assert!(engine.is_ready());
        assert_eq!(engine.staged_path().unwrap(), staged);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn attach_different_source_swaps_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        engine.attach(wav_source(8_000, 1.0));
        wait_until_settled(&engine).await;
        let first = engine.staged_path().unwrap();

        engine.attach(wav_source(8_000, 2.0));
        let second = engine.staged_path().unwrap();
        wait_until_settled(&engine).await;

        assert_ne!(first, second);
        assert!(!first.exists());
        assert!(second.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn decode_failure_is_persistent_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        engine.attach(AudioSource::LocalBlob {
            bytes: Arc::new(vec![0xBA, 0xD0, 0xDA, 0x7A]),
            mime_type: "audio/wav".to_string(),
            name: None,
            modified: None,
        });
        wait_until_settled(&engine).await;

        assert!(matches!(
            engine.status(),
            PlayerStatus::DecodeFailed { .. }
        ));
        assert!(!engine.is_ready());

        // Controls stay disabled.
        engine.toggle_playback();
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn detach_resets_state_and_revokes_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        engine.attach(wav_source(8_000, 1.0));
        wait_until_settled(&engine).await;
        engine.seek(0.5);

        engine.detach();
        assert_eq!(engine.status(), PlayerStatus::Empty);
        assert_eq!(engine.position_secs(), 0.0);
        assert_eq!(engine.duration_secs(), 0.0);
        assert!(!engine.is_playing());
        assert!(engine.staged_path().is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn seek_clamps_to_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        engine.attach(wav_source(8_000, 10.0));
        wait_until_settled(&engine).await;

        engine.seek(5.0);
        assert!((engine.position_secs() - 5.0).abs() < 1e-9);

        engine.seek(25.0);
        assert!((engine.position_secs() - engine.duration_secs()).abs() < 0.05);

        engine.seek(-3.0);
        assert_eq!(engine.position_secs(), 0.0);
    }

    #[tokio::test]
    async fn volume_clamps_and_survives_swap() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        engine.set_volume(1.3);
        assert_eq!(engine.volume(), 1.0);

        engine.set_volume(-0.2);
        assert_eq!(engine.volume(), 0.0);

        engine.set_volume(0.4);
        engine.attach(wav_source(8_000, 1.0));
        wait_until_settled(&engine).await;
        assert_eq!(engine.volume(), 0.4);
    }

    #[tokio::test]
    async fn stale_decode_result_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = engine_in(tmp.path());

        // Attach then immediately replace; the first decode result must not
        // clobber the second attach.
        engine.attach(wav_source(8_000, 1.0));
        engine.attach(wav_source(16_000, 2.0));
        wait_until_settled(&engine).await;

        assert!(engine.is_ready());
        assert!((engine.duration_secs() - 2.0).abs() < 0.05);
    }
}
