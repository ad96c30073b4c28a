//! Live input level metering
//!
//! Consumes the best-effort sample feed from the capture callback, runs a
//! small FFT per display frame, and publishes the average frequency-domain
//! magnitude as a single level in [0,1]. The loop is cooperative (driven by a
//! frame-interval tick, not the audio thread) and exits on its own when the
//! capture stream is released, so a stale level can never be published.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;

/// FFT window size. 256 bins keeps the per-frame cost trivial while giving a
/// stable broadband average.
pub const METER_FFT_SIZE: usize = 256;

/// Frame interval for the sampling loop (~30fps).
const FRAME_INTERVAL_MS: u64 = 33;

/// Magnitude-to-level mapping range in dBFS. Bins below `MIN_DB` read as 0,
/// bins above `MAX_DB` read as 1.
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Receiver side of the capture-callback sample feed.
pub type MeterSampleReceiver = mpsc::Receiver<Vec<f32>>;

/// Create the sample channel connecting the capture callback to the meter.
pub fn create_meter_channel() -> (super::capture::MeterSampleSender, MeterSampleReceiver) {
    mpsc::channel(100)
}

/// Frequency-domain level analysis over one window of samples.
struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let hann = (0..size)
            .map(|i| {
                let phase = (i as f32) / (size as f32 - 1.0);
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * phase).cos()
            })
            .collect();
        Self {
            fft,
            hann,
            buffer: vec![Complex::new(0.0, 0.0); size],
        }
    }

    /// Average magnitude of the spectrum, normalized to [0,1].
    ///
    /// Each bin magnitude is converted to dBFS and mapped onto
    /// [`MIN_DB`, `MAX_DB`], then the mapped bins are averaged.
    fn level(&mut self, samples: &[f32]) -> f32 {
        let size = self.buffer.len();
        debug_assert_eq!(samples.len(), size);

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[i] * self.hann[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let bins = size / 2;
        let mut sum = 0.0f32;
        for bin in self.buffer.iter().take(bins) {
            let magnitude = bin.norm() / size as f32;
            let db = 20.0 * magnitude.max(1e-10).log10();
            sum += ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0);
        }
        (sum / bins as f32).clamp(0.0, 1.0)
    }
}

/// Publishes the live input level while a capture stream is running.
///
/// Start/stop are idempotent: starting a running meter is a no-op, stopping
/// releases the analysis state and resets the published level to 0.
pub struct LevelMeter {
    level_tx: watch::Sender<f32>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl LevelMeter {
    pub fn new() -> Self {
        let (level_tx, _) = watch::channel(0.0);
        Self {
            level_tx,
            stop_tx: None,
        }
    }

    /// Latest published level in [0,1].
    pub fn level(&self) -> f32 {
        *self.level_tx.subscribe().borrow()
    }

    /// Observe level updates.
    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.level_tx.subscribe()
    }

    /// Bind the meter to a live sample feed and start the frame loop.
    pub fn start(&mut self, rx: MeterSampleReceiver) {
        if self.stop_tx.is_some() {
            log::debug!("Level meter already running, start ignored");
            return;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let level_tx = self.level_tx.clone();
        tokio::spawn(run_meter_loop(rx, level_tx, stop_rx));
    }

    /// Stop the frame loop and reset the published level to 0.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = self.level_tx.send(0.0);
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_meter_loop(
    mut rx: MeterSampleReceiver,
    level_tx: watch::Sender<f32>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut analyzer = SpectrumAnalyzer::new(METER_FFT_SIZE);
    let mut window: VecDeque<f32> = VecDeque::with_capacity(METER_FFT_SIZE);
    let mut tick = interval(Duration::from_millis(FRAME_INTERVAL_MS));

    log::debug!("Level meter started");

    'frames: loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::debug!("Level meter received stop signal");
                break 'frames;
            }
            _ = tick.tick() => {
                // Drain whatever the callback delivered since the last frame.
                loop {
                    match rx.try_recv() {
                        Ok(samples) => {
                            for s in samples {
                                if window.len() == METER_FFT_SIZE {
                                    window.pop_front();
                                }
                                window.push_back(s);
                            }
                        }
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            // Stream released: never publish another sample.
                            log::debug!("Level meter sample feed closed");
                            break 'frames;
                        }
                    }
                }

                if window.len() == METER_FFT_SIZE {
                    let frame: Vec<f32> = window.iter().copied().collect();
                    let level = analyzer.level(&frame);
                    let _ = level_tx.send(level);
                }
            }
        }
    }

    let _ = level_tx.send(0.0);
    log::debug!("Level meter stopped");
}
