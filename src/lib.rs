//! clipscribe — client for a remote audio transcription/diarization service
//!
//! Record microphone audio or pick a local file, preview it (waveform +
//! transport), submit it for transcription or diarization, browse past
//! results, and administer users/quotas. The backend is a remote REST API;
//! everything here is client-side.

pub mod api;
pub mod app;
pub mod audio;
pub mod credentials;
pub mod effects;
pub mod player;
pub mod results;
pub mod session;
pub mod settings;
pub mod source;
pub mod staging;
pub mod state_machine;

pub use app::{spawn_recorder, RecorderHandle, UiState};
pub use session::SessionContext;
pub use source::{same_source, AudioClip, AudioSource, ClipEncoding};
