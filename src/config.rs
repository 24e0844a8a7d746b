//! Session configuration
//!
//! Caller-supplied knobs for a recording surface: the duration cap and the
//! completion callback invoked when an upload delivers a transcription.

use std::fmt;
use std::sync::Arc;

/// Default recording cap for the full narration surface.
pub const DEFAULT_MAX_DURATION_SECS: u32 = 300;

/// Shorter cap used by the embedded conversation surface.
pub const EMBEDDED_MAX_DURATION_SECS: u32 = 180;

/// Invoked with `(transcription, session_id)` when an upload succeeds.
pub type TranscriptionCallback = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

#[derive(Clone)]
pub struct SessionConfig {
    /// Recording stops itself once `duration_secs` reaches this value.
    pub max_duration_secs: u32,
    pub on_transcription: Option<TranscriptionCallback>,
}

impl SessionConfig {
    pub fn with_max_duration(mut self, max_duration_secs: u32) -> Self {
        self.max_duration_secs = max_duration_secs;
        self
    }

    pub fn with_transcription_callback(mut self, callback: TranscriptionCallback) -> Self {
        self.on_transcription = Some(callback);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            on_transcription: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("max_duration_secs", &self.max_duration_secs)
            .field("on_transcription", &self.on_transcription.is_some())
            .finish()
    }
}
