//! Audio source references and the finalized recording clip.
//!
//! An `AudioSource` is what the player and the upload path agree on: either a
//! URL the backend already knows about, or bytes held in memory (a fresh
//! recording or a file the user just picked). "Is this the same source as
//! before" is decided structurally by `same_source`, never by comparing the
//! audio bytes themselves.

use std::io::Cursor;
use std::sync::Arc;

use hound::{WavSpec, WavWriter};

/// The container/codec pairing negotiated with the capture device.
/// Tagged onto the finalized clip so downstream consumers know its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipEncoding {
    pub mime_type: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ClipEncoding {
    pub fn wav(sample_rate: u32, channels: u16) -> Self {
        Self {
            mime_type: "audio/wav".to_string(),
            sample_rate,
            channels,
        }
    }
}

/// A finalized, immutable recording. Cheap to clone (the payload is shared).
#[derive(Debug, Clone)]
pub struct AudioClip {
    inner: Arc<ClipInner>,
}

#[derive(Debug)]
struct ClipInner {
    /// Raw 16-bit little-endian PCM, the concatenation of every captured chunk.
    pcm: Vec<u8>,
    encoding: ClipEncoding,
    /// Whole seconds of active recording, as counted by the session timer.
    duration_secs: u64,
}

impl AudioClip {
    /// Concatenate captured chunks into a clip. Chunk order is preserved.
    pub fn from_chunks(chunks: &[Vec<u8>], encoding: ClipEncoding, duration_secs: u64) -> Self {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let mut pcm = Vec::with_capacity(total);
        for chunk in chunks {
            pcm.extend_from_slice(chunk);
        }
        Self {
            inner: Arc::new(ClipInner {
                pcm,
                encoding,
                duration_secs,
            }),
        }
    }

    /// The raw PCM payload (no container header).
    pub fn pcm(&self) -> &[u8] {
        &self.inner.pcm
    }

    pub fn encoding(&self) -> &ClipEncoding {
        &self.inner.encoding
    }

    pub fn duration_secs(&self) -> u64 {
        self.inner.duration_secs
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.pcm.len() as u64
    }

    /// Render the clip as a complete WAV file in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let spec = WavSpec {
            channels: self.inner.encoding.channels,
            sample_rate: self.inner.encoding.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            for pair in self.inner.pcm.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

/// A reference to playable audio content.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// A previously uploaded file, addressed by URL.
    RemoteUrl { url: String },
    /// Bytes held in memory: a fresh recording or a freshly chosen file.
    /// `name`/`modified` are set when the bytes came from a local file.
    LocalBlob {
        bytes: Arc<Vec<u8>>,
        mime_type: String,
        name: Option<String>,
        modified: Option<u64>,
    },
}

impl AudioSource {
    pub fn from_clip(clip: &AudioClip) -> Result<Self, hound::Error> {
        Ok(Self::LocalBlob {
            bytes: Arc::new(clip.to_wav_bytes()?),
            mime_type: clip.encoding().mime_type.clone(),
            name: None,
            modified: None,
        })
    }

    pub fn from_file(bytes: Vec<u8>, mime_type: &str, name: &str, modified: u64) -> Self {
        Self::LocalBlob {
            bytes: Arc::new(bytes),
            mime_type: mime_type.to_string(),
            name: Some(name.to_string()),
            modified: Some(modified),
        }
    }

    /// File extension for staging/export, derived from the mime type.
    pub fn extension(&self) -> &'static str {
        let mime = match self {
            AudioSource::RemoteUrl { .. } => return "audio",
            AudioSource::LocalBlob { mime_type, .. } => mime_type.as_str(),
        };
        match mime {
            "audio/wav" | "audio/x-wav" => "wav",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/ogg" => "ogg",
            "audio/flac" => "flac",
            "audio/mp4" | "audio/aac" => "m4a",
            _ => "audio",
        }
    }
}

/// Structural equality for audio sources.
///
/// Two sources are "the same" when:
/// - both are URLs and the strings match, or
/// - both are blobs backed by the same allocation, or
/// - both carry a file identity and name + size + modified time match, or
/// - both are anonymous blobs and size + mime type match.
///
/// Byte contents are never compared; re-attaching a structurally equal source
/// must stay cheap.
pub fn same_source(a: Option<&AudioSource>, b: Option<&AudioSource>) -> bool {
    match (a, b) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(AudioSource::RemoteUrl { url: ua }), Some(AudioSource::RemoteUrl { url: ub })) => {
            ua == ub
        }
        (
            Some(AudioSource::LocalBlob {
                bytes: ba,
                mime_type: ma,
                name: na,
                modified: da,
            }),
            Some(AudioSource::LocalBlob {
                bytes: bb,
                mime_type: mb,
                name: nb,
                modified: db,
            }),
        ) => {
            if Arc::ptr_eq(ba, bb) {
                return true;
            }
            match (na, nb) {
                (Some(na), Some(nb)) => na == nb && ba.len() == bb.len() && da == db,
                (None, None) => ba.len() == bb.len() && ma == mb,
                _ => false,
            }
        }
        _ => false,
    }
}
