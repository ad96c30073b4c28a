//! Recording state machine
//!
//! This module implements the recording workflow using a single-writer
//! pattern. All state transitions go through the `reduce()` function, which
//! returns the next state and a list of effects to execute. Device access is
//! an event stream (`CaptureOpened`, `ChunkCaptured`, ...) so the machine
//! never touches CPAL directly.

use uuid::Uuid;

use crate::source::{AudioClip, ClipEncoding};

/// Live recording session data carried by the active states.
///
/// The chunk buffer is append-only until the clip is finalized; the elapsed
/// counter advances only while recording (paused time is not displayed).
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub recording_id: Uuid,
    pub encoding: ClipEncoding,
    pub chunks: Vec<Vec<u8>>,
    pub elapsed_secs: u64,
}

impl RecordingSession {
    fn new(recording_id: Uuid, encoding: ClipEncoding) -> Self {
        Self {
            recording_id,
            encoding,
            chunks: Vec::new(),
            elapsed_secs: 0,
        }
    }
}

/// Internal state of the recording workflow.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum State {
    /// At rest. `permission_denied` is set when the last start attempt could
    /// not acquire the microphone; it clears on the next successful start.
    Idle { permission_denied: bool },
    /// Waiting for the device layer to grant or refuse the microphone.
    Arming { recording_id: Uuid },
    Recording { session: RecordingSession },
    Paused { session: RecordingSession },
    /// Stop requested; waiting for the final chunk flush and stream release.
    Stopping { session: RecordingSession },
    /// Finalized clip ready for preview/submit. `discard` returns to Idle.
    Stopped { recording_id: Uuid, clip: AudioClip },
}

impl Default for State {
    fn default() -> Self {
        State::Idle {
            permission_denied: false,
        }
    }
}

/// Events that can trigger state transitions. UI commands and device-layer
/// outcomes arrive through the same channel.
#[derive(Debug, Clone)]
pub enum Event {
    // UI commands
    StartRequested,
    PauseRequested,
    ResumeRequested,
    StopRequested,
    DiscardRequested,
    /// Component teardown; handled at the edge of the event loop.
    Shutdown,

    /// One-second timer tick (includes id to prevent stale ticks)
    Tick { id: Uuid },

    // Device events
    CaptureOpened { id: Uuid, encoding: ClipEncoding },
    CaptureDenied { id: Uuid, error: String },
    ChunkCaptured { id: Uuid, bytes: Vec<u8> },
    CaptureClosed { id: Uuid },
}

/// Effects to be executed after a state transition.
/// The effect runner handles these asynchronously.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Acquire the microphone and start the capture stream.
    OpenCapture { id: Uuid },
    /// Gate the capture callback off, keeping buffered chunks.
    SuspendCapture { id: Uuid },
    /// Re-open the capture callback gate.
    ResumeCapture { id: Uuid },
    /// Flush the tail, wait the grace period, release the stream.
    CloseCapture { id: Uuid },
    /// Drop the capture handle without ceremony (teardown/abort path).
    ReleaseCapture { id: Uuid },
    /// Start sending Tick events every second for this session.
    StartTick { id: Uuid },
    /// Stop the tick task for this session.
    StopTick { id: Uuid },
    /// Bind the level meter to this session's sample feed.
    StartMeter { id: Uuid },
    /// Stop the level meter and reset the published level to 0.
    StopMeter,
    /// Hand the finalized clip to the active-source slot.
    PublishClip { clip: AudioClip },
    /// Tell the active-source slot the recorded source is gone.
    ClearClip,
    /// Signal to emit UI state
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - All session data moves with the state; nothing is mutated in place
/// - Events with stale recording IDs are ignored
/// - Always emit EmitUi after user-visible state changes
pub fn reduce(state: State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    // Current session id (if any), for stale-event detection.
    let current_id: Option<Uuid> = match &state {
        Idle { .. } => None,
        Arming { recording_id } => Some(*recording_id),
        Recording { session } | Paused { session } | Stopping { session } => {
            Some(session.recording_id)
        }
        Stopped { recording_id, .. } => Some(*recording_id),
    };
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle { .. }, StartRequested) => {
            let id = Uuid::new_v4();
            (
                Arming { recording_id: id },
                vec![OpenCapture { id }, EmitUi],
            )
        }

        // -----------------
        // Arming
        // -----------------
        (Arming { recording_id }, CaptureOpened { id, encoding }) if recording_id == id => (
            Recording {
                session: RecordingSession::new(id, encoding),
            },
            vec![StartTick { id }, StartMeter { id }, EmitUi],
        ),
        (Arming { recording_id }, CaptureDenied { id, error }) if recording_id == id => {
            log::warn!("Recording {}: microphone denied: {}", id, error);
            (
                Idle {
                    permission_denied: true,
                },
                vec![EmitUi],
            )
        }
        // Stop before the device answered: abort, releasing the stream in
        // case it opened between the request and this event.
        (Arming { recording_id }, StopRequested) => (
            Idle {
                permission_denied: false,
            },
            vec![ReleaseCapture { id: recording_id }, EmitUi],
        ),

        // -----------------
        // Recording
        // -----------------
        (Recording { mut session }, ChunkCaptured { id, bytes })
            if session.recording_id == id =>
        {
            if !bytes.is_empty() {
                session.chunks.push(bytes);
            }
            (Recording { session }, vec![])
        }
        (Recording { mut session }, Tick { id }) if session.recording_id == id => {
            session.elapsed_secs += 1;
            (Recording { session }, vec![EmitUi])
        }
        (Recording { session }, PauseRequested) => {
            let id = session.recording_id;
            (
                Paused { session },
                vec![
                    SuspendCapture { id },
                    StopTick { id },
                    StopMeter,
                    EmitUi,
                ],
            )
        }
        (Recording { session }, StopRequested) => {
            let id = session.recording_id;
            (
                Stopping { session },
                vec![CloseCapture { id }, StopTick { id }, StopMeter, EmitUi],
            )
        }

        // -----------------
        // Paused
        // -----------------
        (Paused { session }, ResumeRequested) => {
            let id = session.recording_id;
            // The counter continues from its prior value; never resets here.
            (
                Recording { session },
                vec![
                    ResumeCapture { id },
                    StartTick { id },
                    StartMeter { id },
                    EmitUi,
                ],
            )
        }
        (Paused { session }, StopRequested) => {
            let id = session.recording_id;
            (
                Stopping { session },
                vec![CloseCapture { id }, EmitUi],
            )
        }
        // A chunk that was in flight when the pause landed still belongs to
        // the session; buffered data is never dropped.
        (Paused { mut session }, ChunkCaptured { id, bytes }) if session.recording_id == id => {
            if !bytes.is_empty() {
                session.chunks.push(bytes);
            }
            (Paused { session }, vec![])
        }

        // -----------------
        // Stopping
        // -----------------
        (Stopping { mut session }, ChunkCaptured { id, bytes })
            if session.recording_id == id =>
        {
            if !bytes.is_empty() {
                session.chunks.push(bytes);
            }
            (Stopping { session }, vec![])
        }
        (Stopping { session }, CaptureClosed { id }) if session.recording_id == id => {
            let clip = AudioClip::from_chunks(
                &session.chunks,
                session.encoding.clone(),
                session.elapsed_secs,
            );
            log::info!(
                "Recording {}: finalized {} chunks, {} bytes, {}s",
                id,
                session.chunks.len(),
                clip.size_bytes(),
                clip.duration_secs()
            );
            (
                Stopped {
                    recording_id: id,
                    clip: clip.clone(),
                },
                vec![PublishClip { clip }, EmitUi],
            )
        }

        // -----------------
        // Stopped
        // -----------------
        (Stopped { .. }, DiscardRequested) => (
            Idle {
                permission_denied: false,
            },
            vec![ClearClip, EmitUi],
        ),

        // -----------------
        // Stale device/timer events (drop silently)
        // -----------------
        (state, CaptureOpened { id, .. }) if is_stale(id) => (state, vec![]),
        (state, CaptureDenied { id, .. }) if is_stale(id) => (state, vec![]),
        (state, ChunkCaptured { id, .. }) if is_stale(id) => (state, vec![]),
        (state, CaptureClosed { id }) if is_stale(id) => (state, vec![]),
        (state, Tick { id }) if is_stale(id) => (state, vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        (state, _) => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding() -> ClipEncoding {
        ClipEncoding::wav(48_000, 1)
    }

    fn recording_state() -> (Uuid, State) {
        let (state, _) = reduce(State::default(), Event::StartRequested);
        let id = match &state {
            State::Arming { recording_id } => *recording_id,
            other => panic!("expected Arming, got {:?}", other),
        };
        let (state, _) = reduce(
            state,
            Event::CaptureOpened {
                id,
                encoding: encoding(),
            },
        );
        (id, state)
    }

    #[test]
    fn idle_start_transitions_to_arming() {
        let (next, effects) = reduce(State::default(), Event::StartRequested);
        assert!(matches!(next, State::Arming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenCapture { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn capture_opened_transitions_to_recording() {
        let (id, state) = recording_state();
        match state {
            State::Recording { session } => {
                assert_eq!(session.recording_id, id);
                assert_eq!(session.elapsed_secs, 0);
                assert!(session.chunks.is_empty());
            }
            other => panic!("expected Recording, got {:?}", other),
        }
    }

    #[test]
    fn denied_returns_to_idle_with_flag_and_no_timer() {
        let (state, _) = reduce(State::default(), Event::StartRequested);
        let id = match &state {
            State::Arming { recording_id } => *recording_id,
            _ => unreachable!(),
        };
        let (next, effects) = reduce(
            state,
            Event::CaptureDenied {
                id,
                error: "device busy".into(),
            },
        );
        assert!(matches!(
            next,
            State::Idle {
                permission_denied: true
            }
        ));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StartTick { .. })));
    }

    #[test]
    fn permission_flag_clears_on_next_start() {
        let state = State::Idle {
            permission_denied: true,
        };
        let (next, _) = reduce(state, Event::StartRequested);
        assert!(matches!(next, State::Arming { .. }));
    }

    #[test]
    fn chunks_append_in_delivery_order() {
        let (id, mut state) = recording_state();
        for n in 1u8..=3 {
            let (next, effects) = reduce(
                state,
                Event::ChunkCaptured {
                    id,
                    bytes: vec![n; 4],
                },
            );
            assert!(effects.is_empty());
            state = next;
        }
        match &state {
            State::Recording { session } => {
                assert_eq!(session.chunks.len(), 3);
                assert_eq!(session.chunks[0], vec![1; 4]);
                assert_eq!(session.chunks[2], vec![3; 4]);
            }
            other => panic!("expected Recording, got {:?}", other),
        }
    }

    #[test]
    fn empty_chunks_are_not_buffered() {
        let (id, state) = recording_state();
        let (next, _) = reduce(state, Event::ChunkCaptured { id, bytes: vec![] });
        match next {
            State::Recording { session } => assert!(session.chunks.is_empty()),
            other => panic!("expected Recording, got {:?}", other),
        }
    }

    #[test]
    fn pause_only_valid_from_recording() {
        let (next, effects) = reduce(State::default(), Event::PauseRequested);
        assert!(matches!(next, State::Idle { .. }));
        assert!(effects.is_empty());

        let (_, state) = recording_state();
        let (next, effects) = reduce(state, Event::PauseRequested);
        assert!(matches!(next, State::Paused { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SuspendCapture { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::StopMeter)));

        // Pausing again is not a transition.
        let (next, effects) = reduce(next, Event::PauseRequested);
        assert!(matches!(next, State::Paused { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn resume_continues_elapsed_from_pause_value() {
        let (id, mut state) = recording_state();
        for _ in 0..3 {
            let (next, _) = reduce(state, Event::Tick { id });
            state = next;
        }
        let (state, _) = reduce(state, Event::PauseRequested);

        // Ticks while paused are stale (the tick task was stopped); even a
        // straggler must not advance the counter.
        let (state, effects) = reduce(state, Event::Tick { id });
        assert!(effects.is_empty());

        let (state, effects) = reduce(state, Event::ResumeRequested);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartTick { .. })));
        match &state {
            State::Recording { session } => assert_eq!(session.elapsed_secs, 3),
            other => panic!("expected Recording, got {:?}", other),
        }

        let (state, _) = reduce(state, Event::Tick { id });
        match state {
            State::Recording { session } => assert_eq!(session.elapsed_secs, 4),
            other => panic!("expected Recording, got {:?}", other),
        }
    }

    #[test]
    fn pause_resume_preserves_chunks_across_intervals() {
        let (id, mut state) = recording_state();
        for n in 1u8..=3 {
            let (next, _) = reduce(state, Event::ChunkCaptured { id, bytes: vec![n] });
            state = next;
        }
        let (state, _) = reduce(state, Event::PauseRequested);
        let (mut state, _) = reduce(state, Event::ResumeRequested);
        for n in 4u8..=5 {
            let (next, _) = reduce(state, Event::ChunkCaptured { id, bytes: vec![n] });
            state = next;
        }
        let (state, _) = reduce(state, Event::StopRequested);
        let (state, _) = reduce(state, Event::CaptureClosed { id });

        match state {
            State::Stopped { clip, .. } => {
                // 5 chunks, delivery order, nothing dropped or duplicated.
                assert_eq!(clip.pcm(), &[1, 2, 3, 4, 5]);
            }
            other => panic!("expected Stopped, got {:?}", other),
        }
    }

    #[test]
    fn stop_from_recording_closes_capture() {
        let (id, state) = recording_state();
        let (next, effects) = reduce(state, Event::StopRequested);
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CloseCapture { id: eid } if *eid == id)));
        assert!(effects.iter().any(|e| matches!(e, Effect::StopMeter)));
    }

    #[test]
    fn stop_is_valid_from_paused() {
        let (_, state) = recording_state();
        let (state, _) = reduce(state, Event::PauseRequested);
        let (next, effects) = reduce(state, Event::StopRequested);
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CloseCapture { .. })));
    }

    #[test]
    fn stopping_tail_chunk_is_kept() {
        let (id, state) = recording_state();
        let (state, _) = reduce(state, Event::ChunkCaptured { id, bytes: vec![1] });
        let (state, _) = reduce(state, Event::StopRequested);
        // Final flush delivered during the grace window.
        let (state, _) = reduce(state, Event::ChunkCaptured { id, bytes: vec![2] });
        let (state, _) = reduce(state, Event::CaptureClosed { id });
        match state {
            State::Stopped { clip, .. } => assert_eq!(clip.pcm(), &[1, 2]),
            other => panic!("expected Stopped, got {:?}", other),
        }
    }

    #[test]
    fn finalized_clip_carries_negotiated_encoding_and_elapsed() {
        let (id, mut state) = recording_state();
        for _ in 0..7 {
            let (next, _) = reduce(state, Event::Tick { id });
            state = next;
        }
        let (state, _) = reduce(state, Event::StopRequested);
        let (state, effects) = reduce(state, Event::CaptureClosed { id });
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::PublishClip { .. })));
        match state {
            State::Stopped { clip, .. } => {
                assert_eq!(clip.encoding().mime_type, "audio/wav");
                assert_eq!(clip.encoding().sample_rate, 48_000);
                assert_eq!(clip.duration_secs(), 7);
            }
            other => panic!("expected Stopped, got {:?}", other),
        }
    }

    #[test]
    fn discard_resets_to_idle_and_clears_clip() {
        let (id, state) = recording_state();
        let (state, _) = reduce(state, Event::StopRequested);
        let (state, _) = reduce(state, Event::CaptureClosed { id });
        let (next, effects) = reduce(state, Event::DiscardRequested);
        assert!(matches!(
            next,
            State::Idle {
                permission_denied: false
            }
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::ClearClip)));

        // Elapsed restarts from 0 on the next session.
        let (next, _) = reduce(next, Event::StartRequested);
        assert!(matches!(next, State::Arming { .. }));
    }

    #[test]
    fn discard_only_valid_from_stopped() {
        let (_, state) = recording_state();
        let (next, effects) = reduce(state, Event::DiscardRequested);
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_events_are_ignored() {
        let (_, state) = recording_state();
        let stale = Uuid::new_v4();

        let (state, effects) = reduce(
            state,
            Event::ChunkCaptured {
                id: stale,
                bytes: vec![9],
            },
        );
        assert!(effects.is_empty());
        match &state {
            State::Recording { session } => assert!(session.chunks.is_empty()),
            other => panic!("expected Recording, got {:?}", other),
        }

        let (state, effects) = reduce(state, Event::Tick { id: stale });
        assert!(effects.is_empty());
        let (_, effects) = reduce(state, Event::CaptureClosed { id: stale });
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_during_arming_aborts_and_releases() {
        let (state, _) = reduce(State::default(), Event::StartRequested);
        let (next, effects) = reduce(state, Event::StopRequested);
        assert!(matches!(
            next,
            State::Idle {
                permission_denied: false
            }
        ));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ReleaseCapture { .. })));
    }
}
