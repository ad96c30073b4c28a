//! Waveform rendering and playback
//!
//! Decodes the active audio source into peak buckets and drives transport
//! controls over a CPAL output stream.

pub mod decode;
pub mod engine;
pub mod transport;

pub use decode::{compute_peaks, decode_bytes, DecodeError, DecodedAudio, WAVEFORM_BUCKETS};
pub use engine::{PlayerEngine, PlayerStatus, PlayerUi};
pub use transport::{PlaybackTransport, TransportError};
