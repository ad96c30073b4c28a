//! Effect runner for the recording workflow
//!
//! This module executes the effects produced by the state machine: device
//! stream lifecycle, the one-second tick task, level-meter start/stop, and
//! publishing finalized clips into the active-source slot. Completion
//! outcomes flow back into the state machine as events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::capture::{self, CaptureEvent, CaptureHandle};
use crate::audio::meter::{create_meter_channel, LevelMeter, MeterSampleReceiver};
use crate::audio::paths::cleanup_old_staged_files;
use crate::settings::AppSettings;
use crate::source::AudioSource;
use crate::staging::ActiveSourceSlot;
use crate::state_machine::{Effect, Event};

/// Event channel into the state loop. Unbounded so device callbacks can emit
/// chunk events without ever blocking or dropping.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: EventSender);

    /// Component teardown: stop timers and meters, release any open stream.
    fn shutdown(&self) {}
}

fn capture_event_to_event(event: CaptureEvent) -> Event {
    match event {
        CaptureEvent::Opened { id, encoding } => Event::CaptureOpened { id, encoding },
        CaptureEvent::Denied { id, error } => Event::CaptureDenied { id, error },
        CaptureEvent::Chunk { id, bytes } => Event::ChunkCaptured { id, bytes },
        CaptureEvent::Closed { id } => Event::CaptureClosed { id },
    }
}

/// Real effect runner backed by CPAL capture.
pub struct CaptureEffectRunner {
    active: Mutex<HashMap<Uuid, CaptureHandle>>,
    /// Meter feeds created at open/resume time, waiting for `StartMeter`.
    pending_feeds: Mutex<HashMap<Uuid, MeterSampleReceiver>>,
    ticks: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    meter: Mutex<LevelMeter>,
    slot: ActiveSourceSlot,
    settings: AppSettings,
}

impl CaptureEffectRunner {
    pub fn new(meter: LevelMeter, slot: ActiveSourceSlot, settings: AppSettings) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            pending_feeds: Mutex::new(HashMap::new()),
            ticks: Mutex::new(HashMap::new()),
            meter: Mutex::new(meter),
            slot,
            settings,
        })
    }

    fn stop_tick(&self, id: Uuid) {
        if let Some(alive) = self.ticks.lock().unwrap().remove(&id) {
            alive.store(false, Ordering::SeqCst);
        }
    }

    fn drop_handle(&self, id: Uuid) -> Option<CaptureHandle> {
        self.pending_feeds.lock().unwrap().remove(&id);
        self.active.lock().unwrap().remove(&id)
    }
}

impl EffectRunner for CaptureEffectRunner {
    fn spawn(&self, effect: Effect, tx: EventSender) {
        match effect {
            Effect::OpenCapture { id } => {
                let (meter_tx, meter_rx) = create_meter_channel();
                self.pending_feeds.lock().unwrap().insert(id, meter_rx);

                let emit = move |ev: CaptureEvent| {
                    let _ = tx.send(capture_event_to_event(ev));
                };
                let handle = capture::spawn_capture(id, emit, meter_tx);
                self.active.lock().unwrap().insert(id, handle);
            }

            Effect::SuspendCapture { id } => {
                if let Some(handle) = self.active.lock().unwrap().get(&id) {
                    handle.suspend();
                } else {
                    log::warn!("SuspendCapture: no active handle for id={}", id);
                }
            }

            Effect::ResumeCapture { id } => {
                let (meter_tx, meter_rx) = create_meter_channel();
                if let Some(handle) = self.active.lock().unwrap().get(&id) {
                    handle.resume(meter_tx);
                    self.pending_feeds.lock().unwrap().insert(id, meter_rx);
                } else {
                    log::warn!("ResumeCapture: no active handle for id={}", id);
                }
            }

            Effect::CloseCapture { id } => {
                // The capture thread flushes the tail, waits the grace
                // period, releases the stream, then emits Closed.
                match self.drop_handle(id) {
                    Some(handle) => handle.finish(),
                    None => {
                        log::warn!("CloseCapture: no active handle for id={}", id);
                        // Nothing to flush; let the machine finalize anyway.
                        let _ = tx.send(Event::CaptureClosed { id });
                    }
                }
            }

            Effect::ReleaseCapture { id } => {
                // Abort path: dropping the handle releases the stream with
                // no further events.
                let _ = self.drop_handle(id);
            }

            Effect::StartTick { id } => {
                let alive = Arc::new(AtomicBool::new(true));
                self.ticks.lock().unwrap().insert(id, alive.clone());

                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
                    // The first tick completes immediately; a tick must mean
                    // one elapsed second.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        if !alive.load(Ordering::SeqCst) {
                            log::debug!("Tick task stopping for id={}", id);
                            break;
                        }
                        if tx.send(Event::Tick { id }).is_err() {
                            log::debug!("Tick task stopping - channel closed");
                            break;
                        }
                    }
                });
            }

            Effect::StopTick { id } => {
                self.stop_tick(id);
            }

            Effect::StartMeter { id } => {
                match self.pending_feeds.lock().unwrap().remove(&id) {
                    Some(rx) => self.meter.lock().unwrap().start(rx),
                    None => log::warn!("StartMeter: no pending feed for id={}", id),
                }
            }

            Effect::StopMeter => {
                self.meter.lock().unwrap().stop();
            }

            Effect::PublishClip { clip } => {
                match AudioSource::from_clip(&clip) {
                    Ok(source) => self.slot.set(source),
                    Err(e) => log::error!("Failed to render finalized clip: {}", e),
                }
            }

            Effect::ClearClip => {
                self.slot.clear();
                match cleanup_old_staged_files(self.settings.staged_files_retained) {
                    Ok(count) if count > 0 => {
                        log::info!("Cleaned up {} old staged files", count);
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("Failed to clean up staged files: {}", e),
                }
            }

            Effect::EmitUi => {
                // Handled in the main loop, not here
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }

    fn shutdown(&self) {
        // Mandatory cleanup regardless of state: timers, meter, streams.
        for (_, alive) in self.ticks.lock().unwrap().drain() {
            alive.store(false, Ordering::SeqCst);
        }
        self.meter.lock().unwrap().stop();
        self.pending_feeds.lock().unwrap().clear();
        let released = self.active.lock().unwrap().drain().count();
        if released > 0 {
            log::info!("Shutdown released {} capture stream(s)", released);
        }
    }
}

/// Stub effect runner for tests: no devices, deterministic replies, and an
/// observable record of released streams.
pub struct StubEffectRunner {
    open: Mutex<Vec<Uuid>>,
    released: Mutex<Vec<Uuid>>,
    slot: ActiveSourceSlot,
}

impl StubEffectRunner {
    pub fn new(slot: ActiveSourceSlot) -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            slot,
        })
    }

    /// Ids of streams that have been released (closed or torn down).
    pub fn released(&self) -> Vec<Uuid> {
        self.released.lock().unwrap().clone()
    }

    /// Ids of streams currently open.
    pub fn open_streams(&self) -> Vec<Uuid> {
        self.open.lock().unwrap().clone()
    }

    fn mark_released(&self, id: Uuid) {
        self.open.lock().unwrap().retain(|open| *open != id);
        self.released.lock().unwrap().push(id);
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: EventSender) {
        match effect {
            Effect::OpenCapture { id } => {
                self.open.lock().unwrap().push(id);
                let _ = tx.send(Event::CaptureOpened {
                    id,
                    encoding: crate::source::ClipEncoding::wav(48_000, 1),
                });
            }
            Effect::CloseCapture { id } => {
                self.mark_released(id);
                let _ = tx.send(Event::CaptureClosed { id });
            }
            Effect::ReleaseCapture { id } => {
                self.mark_released(id);
            }
            Effect::PublishClip { clip } => {
                if let Ok(source) = AudioSource::from_clip(&clip) {
                    self.slot.set(source);
                }
            }
            Effect::ClearClip => {
                self.slot.clear();
            }
            Effect::SuspendCapture { .. }
            | Effect::ResumeCapture { .. }
            | Effect::StartTick { .. }
            | Effect::StopTick { .. }
            | Effect::StartMeter { .. }
            | Effect::StopMeter => {}
            Effect::EmitUi => {
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }

    fn shutdown(&self) {
        let open: Vec<Uuid> = self.open.lock().unwrap().drain(..).collect();
        for id in open {
            self.released.lock().unwrap().push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_events_translate_to_machine_events() {
        let id = Uuid::new_v4();
        assert!(matches!(
            capture_event_to_event(CaptureEvent::Opened {
                id,
                encoding: crate::source::ClipEncoding::wav(48_000, 1),
            }),
            Event::CaptureOpened { id: eid, .. } if eid == id
        ));
        assert!(matches!(
            capture_event_to_event(CaptureEvent::Chunk {
                id,
                bytes: vec![1, 2],
            }),
            Event::ChunkCaptured { bytes, .. } if bytes == vec![1, 2]
        ));
        assert!(matches!(
            capture_event_to_event(CaptureEvent::Closed { id }),
            Event::CaptureClosed { id: eid } if eid == id
        ));
    }

    #[tokio::test]
    async fn stub_shutdown_releases_open_streams() {
        let slot = ActiveSourceSlot::new();
        let runner = StubEffectRunner::new(slot);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = Uuid::new_v4();
        runner.spawn(Effect::OpenCapture { id }, tx);
        assert!(matches!(rx.recv().await, Some(Event::CaptureOpened { .. })));
        assert_eq!(runner.open_streams(), vec![id]);

        runner.shutdown();
        assert!(runner.open_streams().is_empty());
        assert_eq!(runner.released(), vec![id]);
    }
}
