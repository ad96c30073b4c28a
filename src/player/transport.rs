//! Playback transport over a CPAL output stream
//!
//! The output stream lives on its own thread (CPAL streams are not `Send` on
//! every platform); control state is shared through atomics so the audio
//! callback never takes a lock it can block on. Position is republished on
//! every callback pass while playing.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::watch;

use super::decode::DecodedAudio;

/// Errors that can occur while opening the output stream.
#[derive(Debug, Clone)]
pub enum TransportError {
    NoOutputDevice,
    UnsupportedConfig(String),
    StreamCreationFailed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NoOutputDevice => write!(f, "No audio output device found"),
            TransportError::UnsupportedConfig(e) => {
                write!(f, "Unsupported output configuration: {}", e)
            }
            TransportError::StreamCreationFailed(e) => {
                write!(f, "Failed to create output stream: {}", e)
            }
        }
    }
}

impl std::error::Error for TransportError {}

struct TransportShared {
    /// Cursor into the source samples (source-rate frames).
    cursor: AtomicUsize,
    playing: AtomicBool,
    /// Natural end reached; position holds at the end value.
    ended: AtomicBool,
    volume_bits: AtomicU32,
    total: usize,
    sample_rate: u32,
    position_tx: watch::Sender<f64>,
}

impl TransportShared {
    fn position_secs(&self) -> f64 {
        self.cursor.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn publish_position(&self) {
        let _ = self.position_tx.send(self.position_secs());
    }
}

/// Handle to a running output stream. Dropping it releases the stream.
pub struct PlaybackTransport {
    shared: Arc<TransportShared>,
    close_tx: std::sync::mpsc::Sender<()>,
}

impl PlaybackTransport {
    /// Open the default output device and start a (paused) stream over the
    /// decoded audio.
    pub fn start(audio: Arc<DecodedAudio>, volume: f32) -> Result<Self, TransportError> {
        let (position_tx, _) = watch::channel(0.0);
        let shared = Arc::new(TransportShared {
            cursor: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            volume_bits: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            total: audio.samples.len(),
            sample_rate: audio.sample_rate,
            position_tx,
        });

        let (close_tx, close_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), TransportError>>();

        let thread_shared = shared.clone();
        std::thread::spawn(move || {
            run_output_thread(audio, thread_shared, ready_tx, close_rx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { shared, close_tx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::StreamCreationFailed(
                "output thread died during startup".to_string(),
            )),
        }
    }

    /// Flip play/pause. Restarts from the top after a natural end.
    /// Returns the actual playing state read back from the transport.
    pub fn toggle(&self) -> bool {
        let shared = &self.shared;
        if shared.playing.load(Ordering::SeqCst) {
            shared.playing.store(false, Ordering::SeqCst);
        } else {
            if shared.ended.load(Ordering::SeqCst) {
                shared.cursor.store(0, Ordering::SeqCst);
                shared.ended.store(false, Ordering::SeqCst);
            }
            shared.playing.store(true, Ordering::SeqCst);
        }
        self.is_playing()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Halt playback and rewind to the start.
    pub fn stop(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.ended.store(false, Ordering::SeqCst);
        self.shared.cursor.store(0, Ordering::SeqCst);
        self.shared.publish_position();
    }

    /// Move the cursor. The caller clamps to the media duration.
    pub fn seek_to_secs(&self, secs: f64) {
        let frame = (secs.max(0.0) * self.shared.sample_rate as f64) as usize;
        let frame = frame.min(self.shared.total);
        self.shared.cursor.store(frame, Ordering::SeqCst);
        if frame < self.shared.total {
            self.shared.ended.store(false, Ordering::SeqCst);
        }
        self.shared.publish_position();
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    pub fn position_secs(&self) -> f64 {
        self.shared.position_secs()
    }

    pub fn subscribe_position(&self) -> watch::Receiver<f64> {
        self.shared.position_tx.subscribe()
    }
}

impl Drop for PlaybackTransport {
    fn drop(&mut self) {
        let _ = self.close_tx.send(());
    }
}

fn run_output_thread(
    audio: Arc<DecodedAudio>,
    shared: Arc<TransportShared>,
    ready_tx: std::sync::mpsc::Sender<Result<(), TransportError>>,
    close_rx: std::sync::mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(TransportError::NoOutputDevice));
            return;
        }
    };

    let config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(TransportError::UnsupportedConfig(e.to_string())));
            return;
        }
    };

    if config.sample_format() != cpal::SampleFormat::F32 {
        let _ = ready_tx.send(Err(TransportError::UnsupportedConfig(format!(
            "only f32 output supported, device offers {:?}",
            config.sample_format()
        ))));
        return;
    }

    let device_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    // Nearest-neighbor rate adjustment: advance the source cursor by this
    // much per output frame.
    let step = audio.sample_rate as f64 / device_rate as f64;

    let err_fn = |err| log::error!("Output stream error: {}", err);
    let callback_shared = shared.clone();
    let mut acc = 0.0f64;

    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let playing = callback_shared.playing.load(Ordering::Relaxed);
            let volume = f32::from_bits(callback_shared.volume_bits.load(Ordering::Relaxed));
            let mut cursor = callback_shared.cursor.load(Ordering::Relaxed);
            let total = callback_shared.total;

            for frame in data.chunks_mut(channels) {
                let value = if playing && cursor < total {
                    let v = audio.samples[cursor] * volume;
                    acc += step;
                    while acc >= 1.0 {
                        cursor += 1;
                        acc -= 1.0;
                    }
                    v
                } else {
                    0.0
                };
                for sample in frame.iter_mut() {
                    *sample = value;
                }
            }

            if playing {
                if cursor >= total {
                    // Natural end: clear the playing flag, hold position.
                    cursor = total;
                    callback_shared.playing.store(false, Ordering::Relaxed);
                    callback_shared.ended.store(true, Ordering::Relaxed);
                }
                callback_shared.cursor.store(cursor, Ordering::Relaxed);
                callback_shared.publish_position();
            }
        },
        err_fn,
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(TransportError::StreamCreationFailed(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(TransportError::StreamCreationFailed(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Keep the stream alive until the handle goes away.
    let _ = close_rx.recv();
    drop(stream);
    log::debug!("Playback stream released");
}
