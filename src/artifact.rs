//! The finalized audio take
//!
//! An `AudioArtifact` is the in-memory result of a completed capture: the
//! encoded WAV payload handed to the upload pipeline, plus the raw sample
//! buffer the playback sink renders from. Buffers are behind `Arc` so the
//! artifact can travel through events and effects without copying audio.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use uuid::Uuid;

#[derive(Clone)]
pub struct AudioArtifact {
    id: Uuid,
    wav_bytes: Arc<Vec<u8>>,
    samples: Arc<Vec<i16>>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArtifact {
    /// Encode captured samples into a 16-bit PCM WAV payload.
    pub fn from_samples(
        id: Uuid,
        samples: Vec<i16>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            for &sample in &samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }

        Ok(Self {
            id,
            wav_bytes: Arc::new(cursor.into_inner()),
            samples: Arc::new(samples),
            sample_rate,
            channels,
        })
    }

    /// Id of the recording this take was finalized from.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The encoded WAV payload sent to the transcription service.
    pub fn wav_bytes(&self) -> &[u8] {
        &self.wav_bytes
    }

    /// Raw interleaved samples for the playback sink.
    pub fn samples(&self) -> &Arc<Vec<i16>> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = self.samples.len() / self.channels as usize;
        frames as f64 / self.sample_rate as f64
    }
}

impl fmt::Debug for AudioArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioArtifact")
            .field("id", &self.id)
            .field("wav_len", &self.wav_bytes.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}
