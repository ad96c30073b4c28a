//! Processing result shapes, display formatting, and export
//!
//! The backend returns `{segments: [{start, text}]}` for transcription and
//! `{segments: [{speaker, text}]}` for diarization, either of which may fall
//! back to a raw `transcript` string. Anything else renders as pretty JSON.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

/// Processing mode requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    Transcribe,
    Diarize,
}

impl ProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::Transcribe => "transcribe",
            ProcessMode::Diarize => "diarize",
        }
    }
}

impl std::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(ProcessMode::Transcribe),
            "diarize" => Ok(ProcessMode::Diarize),
            other => Err(format!(
                "unknown mode '{}' (expected 'transcribe' or 'diarize')",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct SpeakerSegment {
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct SegmentedResult<T> {
    #[serde(default = "Option::default")]
    segments: Option<Vec<T>>,
    #[serde(default)]
    transcript: Option<String>,
}

/// Seconds to `HH:MM:SS`.
fn format_timestamp(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Render a processing result for display, per mode, with the raw-transcript
/// and opaque-JSON fallbacks.
pub fn format_result(mode: ProcessMode, result: &Value) -> String {
    match mode {
        ProcessMode::Transcribe => {
            if let Ok(parsed) =
                serde_json::from_value::<SegmentedResult<TranscriptSegment>>(result.clone())
            {
                if let Some(segments) = parsed.segments {
                    return segments
                        .iter()
                        .map(|s| format!("[{}] {}", format_timestamp(s.start), s.text))
                        .collect::<Vec<_>>()
                        .join("\n");
                }
                if let Some(transcript) = parsed.transcript {
                    return transcript;
                }
            }
            serde_json::to_string_pretty(result).unwrap_or_default()
        }
        ProcessMode::Diarize => {
            if let Ok(parsed) =
                serde_json::from_value::<SegmentedResult<SpeakerSegment>>(result.clone())
            {
                if let Some(segments) = parsed.segments {
                    return segments
                        .iter()
                        .map(|s| {
                            format!(
                                "{}: {}",
                                s.speaker.as_deref().unwrap_or("Speaker"),
                                s.text
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                }
                if let Some(transcript) = parsed.transcript {
                    return transcript;
                }
            }
            serde_json::to_string_pretty(result).unwrap_or_default()
        }
    }
}

/// Write the raw result as pretty JSON.
pub fn export_json(result: &Value, path: &Path) -> std::io::Result<()> {
    let data = serde_json::to_string_pretty(result)?;
    std::fs::write(path, data)?;
    log::info!("Exported result JSON to {:?}", path);
    Ok(())
}

/// Write the formatted rendering as a Markdown file.
pub fn export_markdown(mode: ProcessMode, result: &Value, path: &Path) -> std::io::Result<()> {
    std::fs::write(path, format_result(mode, result))?;
    log::info!("Exported result Markdown to {:?}", path);
    Ok(())
}

/// Default export file name, e.g. `transcribe_20240311_142501.md`.
pub fn default_export_name(mode: ProcessMode, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        mode.as_str(),
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_are_zero_padded() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(61.9), "00:01:01");
        assert_eq!(format_timestamp(3723.0), "01:02:03");
        assert_eq!(format_timestamp(-5.0), "00:00:00");
    }

    #[test]
    fn transcribe_segments_render_with_timestamps() {
        let result = json!({
            "segments": [
                {"start": 0.0, "text": "hello there"},
                {"start": 65.2, "text": "general"},
            ]
        });
        let rendered = format_result(ProcessMode::Transcribe, &result);
        assert_eq!(rendered, "[00:00:00] hello there\n[00:01:05] general");
    }

    #[test]
    fn transcribe_missing_start_defaults_to_zero() {
        let result = json!({"segments": [{"text": "no timing"}]});
        let rendered = format_result(ProcessMode::Transcribe, &result);
        assert_eq!(rendered, "[00:00:00] no timing");
    }

    #[test]
    fn diarize_segments_render_speaker_lines() {
        let result = json!({
            "segments": [
                {"speaker": "SPEAKER_00", "text": "hi"},
                {"text": "anonymous line"},
            ]
        });
        let rendered = format_result(ProcessMode::Diarize, &result);
        assert_eq!(rendered, "SPEAKER_00: hi\nSpeaker: anonymous line");
    }

    #[test]
    fn raw_transcript_fallback() {
        let result = json!({"transcript": "plain text output"});
        assert_eq!(
            format_result(ProcessMode::Transcribe, &result),
            "plain text output"
        );
        assert_eq!(
            format_result(ProcessMode::Diarize, &result),
            "plain text output"
        );
    }

    #[test]
    fn opaque_result_falls_back_to_pretty_json() {
        let result = json!({"words": 12});
        let rendered = format_result(ProcessMode::Transcribe, &result);
        assert!(rendered.contains("\"words\": 12"));
    }

    #[test]
    fn mode_round_trips_through_strings() {
        assert_eq!(
            "transcribe".parse::<ProcessMode>().unwrap(),
            ProcessMode::Transcribe
        );
        assert_eq!(
            "diarize".parse::<ProcessMode>().unwrap(),
            ProcessMode::Diarize
        );
        assert!("summarize".parse::<ProcessMode>().is_err());
        assert_eq!(ProcessMode::Diarize.to_string(), "diarize");
    }

    #[test]
    fn export_markdown_writes_formatted_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("result.md");
        let result = json!({"segments": [{"start": 1.0, "text": "line"}]});
        export_markdown(ProcessMode::Transcribe, &result, &path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[00:00:01] line"
        );
    }
}
