//! Audio capture and metering
//!
//! Microphone input capture, chunk delivery, and live level analysis.
//! Uses CPAL for device access and hound for WAV encoding.

pub mod capture;
pub mod meter;
pub(crate) mod paths;

pub use capture::{spawn_capture, CaptureError, CaptureEvent, CaptureHandle, STOP_FLUSH_GRACE};
pub use meter::{create_meter_channel, LevelMeter, METER_FFT_SIZE};
pub use paths::{cleanup_old_staged_files, create_temp_audio_dir, generate_staged_path};
