//! Audio format descriptor and the chunk type passed from network to device.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Raw PCM format, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
    /// Bits per sample. Only 16-bit signed PCM is carried.
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 48 kHz stereo 16-bit, the format the generation service streams.
    pub const STUDIO: AudioFormat = AudioFormat {
        sample_rate: 48_000,
        channels: 2,
        bits_per_sample: 16,
    };

    /// Parse a PCM mime type such as `audio/l16;rate=48000;channels=2`.
    ///
    /// Missing parameters fall back to [`AudioFormat::STUDIO`] values; a
    /// non-PCM media type yields `None`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mut parts = mime.split(';').map(str::trim);
        let media = parts.next()?.to_ascii_lowercase();
        if !(media == "audio/l16" || media == "audio/pcm") {
            return None;
        }

        let mut format = Self::STUDIO;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "rate" => format.sample_rate = value.trim().parse().ok()?,
                "channels" => format.channels = value.trim().parse().ok()?,
                _ => {}
            }
        }
        (format.sample_rate > 0 && format.channels > 0).then_some(format)
    }

    /// Interleaved samples that make up `duration` of audio.
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()).round() as usize;
        frames * self.channels as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz / {} ch / {}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One block of interleaved 16-bit PCM as delivered by the generation
/// service.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub format: AudioFormat,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    /// Reinterpret little-endian PCM bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8], format: AudioFormat) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { samples, format }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.format.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
