//! Microphone capture using CPAL
//!
//! The capture layer owns the device stream on a dedicated thread and speaks
//! to the rest of the app through an explicit event stream: `Opened`,
//! `Denied`, `Chunk`, `Closed`. The recording state machine consumes those
//! events without knowing anything about CPAL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use uuid::Uuid;

use crate::source::ClipEncoding;

/// Grace delay between a stop request and releasing the device stream, so an
/// in-flight final buffer can still be flushed.
pub const STOP_FLUSH_GRACE: Duration = Duration::from_millis(300);

/// Target chunk size in audio time. The callback coalesces device buffers
/// until roughly this much audio has accumulated, then emits one chunk.
const CHUNK_MILLIS: u32 = 100;

/// Preference-ordered sample formats to negotiate with the device.
/// The platform default input config is the fallback when none match.
const PREFERRED_FORMATS: [SampleFormat; 3] =
    [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];

/// Errors that can occur while acquiring or running the capture stream.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// Events emitted by the capture layer.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Device acquired, stream running. Carries the negotiated encoding.
    Opened { id: Uuid, encoding: ClipEncoding },
    /// Device acquisition failed or was refused.
    Denied { id: Uuid, error: String },
    /// One chunk of encoded audio data, in delivery order.
    Chunk { id: Uuid, bytes: Vec<u8> },
    /// Stream released after the flush grace period.
    Closed { id: Uuid },
}

/// Commands accepted by a live capture session.
enum CaptureCommand {
    Suspend,
    /// Re-open the gate, binding a fresh level-meter feed (the previous
    /// feed's receiver died with the stopped meter loop).
    Resume(MeterSampleSender),
    Finish,
}

/// Handle to a live capture session. Dropping the handle releases the device
/// stream without emitting further events (the teardown path).
pub struct CaptureHandle {
    cmd_tx: std::sync::mpsc::Sender<CaptureCommand>,
}

impl CaptureHandle {
    /// Gate the callback off without discarding anything already buffered.
    pub fn suspend(&self) {
        let _ = self.cmd_tx.send(CaptureCommand::Suspend);
    }

    /// Re-open the callback gate; capture continues into the same session.
    pub fn resume(&self, meter_tx: MeterSampleSender) {
        let _ = self.cmd_tx.send(CaptureCommand::Resume(meter_tx));
    }

    /// Flush the tail, release the stream, emit `Closed`.
    pub fn finish(&self) {
        let _ = self.cmd_tx.send(CaptureCommand::Finish);
    }
}

/// Sender for level-meter sample batches. Delivery is best-effort: the meter
/// may drop frames, the chunk path never does.
pub type MeterSampleSender = tokio::sync::mpsc::Sender<Vec<f32>>;

/// Spawn a capture session on its own thread.
///
/// The thread owns the CPAL stream for the whole session (CPAL streams are
/// not `Send` on every platform). Outcomes are reported through `emit`; the
/// returned handle only carries control commands.
pub fn spawn_capture(
    id: Uuid,
    emit: impl Fn(CaptureEvent) + Send + 'static,
    meter_tx: MeterSampleSender,
) -> CaptureHandle {
    let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        run_capture_thread(id, emit, meter_tx, cmd_rx);
    });

    CaptureHandle { cmd_tx }
}

fn run_capture_thread(
    id: Uuid,
    emit: impl Fn(CaptureEvent),
    meter_tx: MeterSampleSender,
    cmd_rx: std::sync::mpsc::Receiver<CaptureCommand>,
) {
    let (device, config, sample_format) = match open_device() {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Capture {}: device acquisition failed: {}", id, e);
            emit(CaptureEvent::Denied {
                id,
                error: e.to_string(),
            });
            return;
        }
    };

    let encoding = ClipEncoding::wav(config.sample_rate.0, config.channels);
    let chunk_bytes =
        (config.sample_rate.0 * config.channels as u32 * 2 * CHUNK_MILLIS / 1000) as usize;

    // Shared between the audio callback and this control thread. `capturing`
    // is the pause gate; `pending` holds the partially filled chunk so the
    // final flush can drain it; `meter_feed` is swappable because each
    // meter start binds a fresh channel.
    let capturing = Arc::new(AtomicBool::new(true));
    let pending: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::with_capacity(chunk_bytes)));
    let meter_feed = Arc::new(Mutex::new(meter_tx));

    let (chunk_tx, chunk_rx) = std::sync::mpsc::channel::<Vec<u8>>();

    let stream = match build_stream(
        &device,
        &config,
        sample_format,
        capturing.clone(),
        pending.clone(),
        chunk_bytes,
        chunk_tx,
        meter_feed.clone(),
    ) {
        Ok(s) => s,
        Err(e) => {
            emit(CaptureEvent::Denied {
                id,
                error: e.to_string(),
            });
            return;
        }
    };

    if let Err(e) = stream.play() {
        emit(CaptureEvent::Denied {
            id,
            error: format!("Failed to start stream: {}", e),
        });
        return;
    }

    log::info!(
        "Capture {}: recording at {} Hz, {} ch ({:?})",
        id,
        encoding.sample_rate,
        encoding.channels,
        sample_format
    );
    emit(CaptureEvent::Opened {
        id,
        encoding: encoding.clone(),
    });

    loop {
        // Forward full chunks while waiting for the next command.
        while let Ok(bytes) = chunk_rx.try_recv() {
            emit(CaptureEvent::Chunk { id, bytes });
        }

        match cmd_rx.recv_timeout(Duration::from_millis(25)) {
            Ok(CaptureCommand::Suspend) => {
                capturing.store(false, Ordering::SeqCst);
                log::debug!("Capture {}: suspended", id);
            }
            Ok(CaptureCommand::Resume(new_feed)) => {
                *meter_feed.lock().unwrap() = new_feed;
                capturing.store(true, Ordering::SeqCst);
                log::debug!("Capture {}: resumed", id);
            }
            Ok(CaptureCommand::Finish) => {
                // Let the in-flight buffer land before gating the callback.
                std::thread::sleep(STOP_FLUSH_GRACE);
                capturing.store(false, Ordering::SeqCst);

                while let Ok(bytes) = chunk_rx.try_recv() {
                    emit(CaptureEvent::Chunk { id, bytes });
                }
                let tail = std::mem::take(&mut *pending.lock().unwrap());
                if !tail.is_empty() {
                    emit(CaptureEvent::Chunk { id, bytes: tail });
                }

                drop(stream);
                log::info!("Capture {}: stream released", id);
                emit(CaptureEvent::Closed { id });
                return;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                // Handle dropped: component teardown. Release without events.
                capturing.store(false, Ordering::SeqCst);
                drop(stream);
                log::debug!("Capture {}: handle dropped, stream released", id);
                return;
            }
        }
    }
}

fn open_device() -> Result<(Device, StreamConfig, SampleFormat), CaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let negotiated = negotiate_format(&device)?;
    Ok((device, negotiated.0, negotiated.1))
}

/// Pick a supported config from the preference-ordered candidate list,
/// falling back to the platform default when none of the candidates match.
fn negotiate_format(device: &Device) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    if let Ok(ranges) = device.supported_input_configs() {
        let ranges: Vec<_> = ranges.collect();
        for candidate in PREFERRED_FORMATS {
            if let Some(range) = ranges.iter().find(|r| r.sample_format() == candidate) {
                let supported = range
                    .clone()
                    .try_with_sample_rate(cpal::SampleRate(48_000))
                    .unwrap_or_else(|| range.clone().with_max_sample_rate());
                log::debug!(
                    "Negotiated capture format {:?} at {} Hz",
                    candidate,
                    supported.sample_rate().0
                );
                return Ok((supported.config(), candidate));
            }
        }
    }

    // None of the preferred candidates: platform default.
    let supported = device
        .default_input_config()
        .map_err(|_| CaptureError::NoSupportedConfig)?;
    let sample_format = supported.sample_format();
    Ok((supported.config(), sample_format))
}

#[allow(clippy::too_many_arguments)]
fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    capturing: Arc<AtomicBool>,
    pending: Arc<Mutex<Vec<u8>>>,
    chunk_bytes: usize,
    chunk_tx: std::sync::mpsc::Sender<Vec<u8>>,
    meter_feed: Arc<Mutex<MeterSampleSender>>,
) -> Result<cpal::Stream, CaptureError> {
    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(
            device, config, capturing, pending, chunk_bytes, chunk_tx, meter_feed,
        ),
        SampleFormat::U16 => build_stream_typed::<u16>(
            device, config, capturing, pending, chunk_bytes, chunk_tx, meter_feed,
        ),
        SampleFormat::F32 => build_stream_typed::<f32>(
            device, config, capturing, pending, chunk_bytes, chunk_tx, meter_feed,
        ),
        _ => Err(CaptureError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    capturing: Arc<AtomicBool>,
    pending: Arc<Mutex<Vec<u8>>>,
    chunk_bytes: usize,
    chunk_tx: std::sync::mpsc::Sender<Vec<u8>>,
    meter_feed: Arc<Mutex<MeterSampleSender>>,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !capturing.load(Ordering::SeqCst) {
                    return;
                }

                // Level meter feed: best-effort, dropped frames are fine.
                let levels: Vec<f32> = data.iter().map(|s| s.to_float_sample()).collect();
                let _ = meter_feed.lock().unwrap().try_send(levels);

                let mut buf = pending.lock().unwrap();
                for &sample in data {
                    let sample_i16 = sample_to_i16(sample);
                    buf.extend_from_slice(&sample_i16.to_le_bytes());
                }
                if buf.len() >= chunk_bytes {
                    let full = std::mem::take(&mut *buf);
                    // The control thread forwards this into the event stream;
                    // an unbounded sender never blocks the audio callback.
                    let _ = chunk_tx.send(full);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Convert any sample type to i16 for PCM encoding.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
