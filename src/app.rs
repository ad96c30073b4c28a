//! Recording workflow wiring
//!
//! Runs the state loop over the reducer, executes effects through an
//! `EffectRunner`, and projects the authoritative state into a serializable
//! `UiState` published on a watch channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::effects::{EffectRunner, EventSender};
use crate::state_machine::{reduce, Effect, Event, State};

/// UI state published to the frontend.
/// Tagged union format: { "status": "idle", ... } or
/// { "status": "recording", "elapsedSecs": 5 }
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle {
        #[serde(rename = "permissionDenied")]
        permission_denied: bool,
    },
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Paused {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Stopping,
    Stopped {
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
        #[serde(rename = "sizeBytes")]
        size_bytes: u64,
    },
}

/// Convert internal State to UiState for the frontend
fn state_to_ui(state: &State) -> UiState {
    match state {
        State::Idle { permission_denied } => UiState::Idle {
            permission_denied: *permission_denied,
        },
        State::Arming { .. } => UiState::Arming,
        State::Recording { session } => UiState::Recording {
            elapsed_secs: session.elapsed_secs,
        },
        State::Paused { session } => UiState::Paused {
            elapsed_secs: session.elapsed_secs,
        },
        State::Stopping { .. } => UiState::Stopping,
        State::Stopped { clip, .. } => UiState::Stopped {
            duration_secs: clip.duration_secs(),
            size_bytes: clip.size_bytes(),
        },
    }
}

/// Short label for transition logging (full states carry audio buffers).
fn state_label(state: &State) -> &'static str {
    match state {
        State::Idle { .. } => "Idle",
        State::Arming { .. } => "Arming",
        State::Recording { .. } => "Recording",
        State::Paused { .. } => "Paused",
        State::Stopping { .. } => "Stopping",
        State::Stopped { .. } => "Stopped",
    }
}

/// Dispatch handle into the state loop.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: EventSender,
}

impl RecorderHandle {
    /// Send an event to the state machine.
    pub fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event)
    }

    /// Teardown: stops the loop after mandatory cleanup.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

/// Spawn the recording state loop.
///
/// Returns the dispatch handle, the UI state watch, and the loop task.
pub fn spawn_recorder(
    runner: Arc<dyn EffectRunner>,
) -> (
    RecorderHandle,
    watch::Receiver<UiState>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let (ui_tx, ui_rx) = watch::channel(state_to_ui(&State::default()));

    let handle = RecorderHandle { tx: tx.clone() };
    let task = tokio::spawn(run_state_loop(rx, tx, ui_tx, runner));

    (handle, ui_rx, task)
}

/// Run the main state loop
async fn run_state_loop(
    mut rx: mpsc::UnboundedReceiver<Event>,
    tx: EventSender,
    ui_tx: watch::Sender<UiState>,
    effect_runner: Arc<dyn EffectRunner>,
) {
    let mut state = State::default();
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        // Handle Shutdown at the edge: mandatory cleanup in every state.
        if matches!(event, Event::Shutdown) {
            log::info!("Shutdown requested, cleaning up from {}", state_label(&state));
            effect_runner.shutdown();
            break;
        }

        let old_label = state_label(&state);
        let (next, effects) = reduce(state, event);

        if old_label != state_label(&next) {
            log::info!("State transition: {} -> {}", old_label, state_label(&next));
        }

        state = next;

        // Execute effects
        for eff in effects {
            match eff {
                Effect::EmitUi => {
                    let _ = ui_tx.send(state_to_ui(&state));
                }
                other => effect_runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("State loop ended");
}
