//! Audio capture, playback and spectrum analysis

pub mod playback;
pub mod recorder;
pub mod spectrum;

pub use playback::{start_playback, PlaybackError, PlaybackEvent, PlayerHandle};
pub use recorder::{AudioRecorder, CaptureError, RecordingHandle};
pub use spectrum::{SpectrumHandle, SPECTRUM_BINS};
