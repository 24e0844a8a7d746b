//! storymic - voice capture for story narration
//!
//! A recording session is an event loop around a pure reducer
//! ([`state_machine::reduce`]). Commands from the caller and completion
//! events from the audio/network layers feed the loop; observable state is
//! published as [`SessionSnapshot`] values on a watch channel. Side effects
//! (device acquisition, capture finalization, playback, upload) run through
//! an [`effects::EffectRunner`], which keeps the reducer deterministic and
//! lets tests substitute a stub.

pub mod artifact;
pub mod audio;
pub mod config;
pub mod effects;
pub mod state_machine;
pub mod upload;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::artifact::AudioArtifact;
use crate::audio::spectrum::SpectrumHandle;
use crate::config::SessionConfig;
use crate::effects::{AudioEffectRunner, EffectRunner};
use crate::state_machine::{reduce, Effect, Event, Session, SessionState};
use crate::upload::HttpTranscriber;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Idle,
    Requesting,
    Recording,
    Stopped,
    Processing,
}

/// Point-in-time view of the session, published on every observable change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SnapshotState,
    pub recording_id: Option<Uuid>,
    pub duration_secs: u32,
    /// Elapsed time formatted as `m:ss`
    pub clock: String,
    #[serde(skip)]
    pub artifact: Option<AudioArtifact>,
    pub has_artifact: bool,
    pub last_error: Option<String>,
    pub is_playing: bool,
    /// User-facing notice set when the duration cap stops a recording
    pub advisory: Option<String>,
}

/// Format elapsed seconds as `m:ss`.
pub fn format_clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn snapshot_of(session: &Session) -> SessionSnapshot {
    let state = match session.state {
        SessionState::Idle => SnapshotState::Idle,
        SessionState::Requesting { .. } => SnapshotState::Requesting,
        SessionState::Recording { .. } => SnapshotState::Recording,
        SessionState::Stopped => SnapshotState::Stopped,
        SessionState::Processing => SnapshotState::Processing,
    };
    SessionSnapshot {
        state,
        recording_id: session.live_recording_id(),
        duration_secs: session.duration_secs,
        clock: format_clock(session.duration_secs),
        artifact: session.artifact.clone(),
        has_artifact: session.artifact.is_some(),
        last_error: session.last_error.clone(),
        is_playing: session.is_playing,
        advisory: session.advisory.clone(),
    }
}

/// Single-writer event loop that owns the session value.
///
/// Runs until every event sender is dropped. `EmitSnapshot` and
/// `DeliverTranscription` are handled here; all other effects go to the
/// runner, which reports back through `tx`.
pub async fn run_session_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    runner: Arc<dyn EffectRunner>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    config: SessionConfig,
) {
    let mut session = Session::default();

    // Hold only a weak sender so the loop ends once the handle and all
    // in-flight effect tasks are gone.
    let tx = tx.downgrade();

    while let Some(event) = rx.recv().await {
        let (next, effects) = reduce(&session, event, &config);

        if std::mem::discriminant(&session.state) != std::mem::discriminant(&next.state) {
            log::info!("session: {:?} -> {:?}", session.state, next.state);
        }
        session = next;

        for effect in effects {
            match effect {
                Effect::EmitSnapshot => {
                    let _ = snapshot_tx.send(snapshot_of(&session));
                }
                Effect::DeliverTranscription {
                    transcription,
                    session_id,
                } => {
                    if let Some(callback) = &config.on_transcription {
                        callback(&transcription, session_id.as_deref());
                    }
                }
                other => {
                    if let Some(tx) = tx.upgrade() {
                        runner.spawn(other, tx);
                    }
                }
            }
        }
    }

    // Channel closed: release whatever the session still holds. Nothing is
    // listening anymore, so the runner gets a throwaway sender.
    let (orphan_tx, _orphan_rx) = mpsc::channel(1);
    if let Some(id) = session.live_recording_id() {
        runner.spawn(Effect::AbortCapture { id }, orphan_tx.clone());
    }
    if let Some(artifact) = &session.artifact {
        runner.spawn(Effect::ReleasePlayback { id: artifact.id() }, orphan_tx);
    }
}

/// Caller-facing handle to a running session.
///
/// Clones share the same underlying session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Event>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    spectrum: SpectrumHandle,
}

impl SessionHandle {
    /// Inject a raw event into the session loop.
    pub async fn send(&self, event: Event) {
        if self.tx.send(event).await.is_err() {
            log::warn!("session loop is gone; event dropped");
        }
    }

    pub async fn start_recording(&self) {
        self.send(Event::StartRecording).await;
    }

    pub async fn stop_recording(&self) {
        self.send(Event::StopRecording).await;
    }

    pub async fn reset(&self) {
        self.send(Event::Reset).await;
    }

    pub async fn play(&self) {
        self.send(Event::Play).await;
    }

    pub async fn pause(&self) {
        self.send(Event::Pause).await;
    }

    pub async fn upload_audio(&self) {
        self.send(Event::UploadAudio).await;
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait until a new snapshot is published.
    pub async fn changed(&mut self) {
        let _ = self.snapshot_rx.changed().await;
    }

    /// Current frequency snapshot for the visualizer.
    ///
    /// Empty when the session is not recording; otherwise always
    /// [`audio::spectrum::SPECTRUM_BINS`] values in 0-255.
    pub fn sample_frequencies(&self) -> Vec<u8> {
        if self.snapshot_rx.borrow().state != SnapshotState::Recording {
            return Vec::new();
        }
        self.spectrum.sample()
    }
}

/// Spawn a session loop with the given runner on the current runtime.
pub fn spawn_session(
    config: SessionConfig,
    runner: Arc<dyn EffectRunner>,
    spectrum: SpectrumHandle,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(32);
    let (snapshot_tx, snapshot_rx) = watch::channel(snapshot_of(&Session::default()));

    tokio::spawn(run_session_loop(
        rx,
        tx.clone(),
        runner,
        snapshot_tx,
        config,
    ));

    SessionHandle {
        tx,
        snapshot_rx,
        spectrum,
    }
}

/// Spawn a session wired to the real microphone, speakers and the
/// transcription service at `endpoint`.
pub fn spawn_audio_session(endpoint: impl Into<String>, config: SessionConfig) -> SessionHandle {
    let spectrum = SpectrumHandle::new();
    let runner = Arc::new(AudioEffectRunner::new(
        HttpTranscriber::new(endpoint),
        spectrum.clone(),
    ));
    spawn_session(config, runner, spectrum)
}
