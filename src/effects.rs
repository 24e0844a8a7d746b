//! Effect execution
//!
//! The reducer is pure; everything that touches a device, a clock or the
//! network is an `Effect` handed to an `EffectRunner`. The runner executes
//! it in the background and reports back by sending events into the session
//! loop. Completion events carry the recording or artifact id so the
//! reducer can drop results that arrive after a reset.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::artifact::AudioArtifact;
use crate::audio::playback::{start_playback, PlaybackEvent, PlayerHandle};
use crate::audio::recorder::{AudioRecorder, RecordingHandle};
use crate::audio::spectrum::SpectrumHandle;
use crate::state_machine::{Effect, Event};
use crate::upload::{HttpTranscriber, TranscriptionOutcome};

/// Executes effects produced by the reducer.
///
/// `spawn` must not block; long-running work goes to a background task that
/// reports back through `tx`.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// A capture the runner is tracking. `Pending` is inserted before the
/// blocking device acquisition starts so an abort that lands mid-acquire
/// leaves a gap the acquire task can detect when it finishes.
enum CaptureSlot {
    Pending,
    Live(RecordingHandle),
}

/// Register a capture whose stream just came up. Returns false (and
/// releases the stream) when the recording was cancelled while the device
/// was still being acquired.
async fn register_capture(
    active: &Mutex<HashMap<Uuid, CaptureSlot>>,
    id: Uuid,
    handle: RecordingHandle,
) -> bool {
    let mut active = active.lock().await;
    match active.get(&id) {
        Some(CaptureSlot::Pending) => {
            active.insert(id, CaptureSlot::Live(handle));
            true
        }
        _ => {
            drop(active);
            handle.abort();
            false
        }
    }
}

/// Drop a capture slot, releasing the stream if it is already live. A
/// pending slot is only removed; the acquire task aborts its stream on
/// arrival via [`register_capture`].
async fn cancel_capture(active: &Mutex<HashMap<Uuid, CaptureSlot>>, id: Uuid) {
    if let Some(CaptureSlot::Live(handle)) = active.lock().await.remove(&id) {
        handle.abort();
    }
}

/// Production runner backed by CPAL capture/playback and the HTTP
/// transcription service.
pub struct AudioEffectRunner {
    // Device discovery is lazy so construction can't fail; a failed probe
    // is retried on the next acquire.
    recorder: Arc<Mutex<Option<AudioRecorder>>>,
    active: Arc<Mutex<HashMap<Uuid, CaptureSlot>>>,
    players: Arc<Mutex<HashMap<Uuid, PlayerHandle>>>,
    spectrum: SpectrumHandle,
    transcriber: HttpTranscriber,
}

impl AudioEffectRunner {
    pub fn new(transcriber: HttpTranscriber, spectrum: SpectrumHandle) -> Self {
        Self {
            recorder: Arc::new(Mutex::new(None)),
            active: Arc::new(Mutex::new(HashMap::new())),
            players: Arc::new(Mutex::new(HashMap::new())),
            spectrum,
            transcriber,
        }
    }
}

impl EffectRunner for AudioEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::AcquireDevice { id } => {
                let recorder_slot = self.recorder.clone();
                let active = self.active.clone();
                let spectrum = self.spectrum.clone();
                tokio::spawn(async move {
                    active.lock().await.insert(id, CaptureSlot::Pending);

                    let deny_active = active.clone();
                    let deny_tx = tx.clone();
                    let deny = move |err: String| {
                        let active = deny_active.clone();
                        let tx = deny_tx.clone();
                        async move {
                            active.lock().await.remove(&id);
                            let _ = tx.send(Event::DeviceDenied { id, err }).await;
                        }
                    };

                    let mut slot = recorder_slot.lock().await;
                    if slot.is_none() {
                        match tokio::task::spawn_blocking(AudioRecorder::new).await {
                            Ok(Ok(recorder)) => *slot = Some(recorder),
                            Ok(Err(e)) => {
                                drop(slot);
                                deny(e.to_string()).await;
                                return;
                            }
                            Err(e) => {
                                drop(slot);
                                deny(e.to_string()).await;
                                return;
                            }
                        }
                    }
                    let recorder = slot.as_ref().map(Clone::clone);
                    drop(slot);

                    let Some(recorder) = recorder else { return };
                    spectrum.clear();
                    let start_spectrum = spectrum.clone();
                    match tokio::task::spawn_blocking(move || recorder.start(id, start_spectrum))
                        .await
                    {
                        Ok(Ok(handle)) => {
                            // A reset may have cancelled the recording while
                            // the stream was coming up
                            if register_capture(&active, id, handle).await {
                                let _ = tx.send(Event::DeviceReady { id }).await;
                            }
                        }
                        Ok(Err(e)) => deny(e.to_string()).await,
                        Err(e) => deny(e.to_string()).await,
                    }
                });
            }

            Effect::StopCapture { id } => {
                let active = self.active.clone();
                tokio::spawn(async move {
                    let slot = active.lock().await.remove(&id);
                    let Some(CaptureSlot::Live(handle)) = slot else {
                        let _ = tx
                            .send(Event::CaptureFailed {
                                id,
                                err: "no active capture to finalize".to_string(),
                            })
                            .await;
                        return;
                    };
                    match tokio::task::spawn_blocking(move || handle.stop()).await {
                        Ok(Ok(artifact)) => {
                            let _ = tx.send(Event::CaptureStopped { id, artifact }).await;
                        }
                        Ok(Err(e)) => {
                            let _ = tx
                                .send(Event::CaptureFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::CaptureFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::AbortCapture { id } => {
                let active = self.active.clone();
                tokio::spawn(async move {
                    cancel_capture(&active, id).await;
                });
            }

            Effect::StartDurationTick { id } => {
                let active = self.active.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
                    // First tick fires immediately; skip it so the clock
                    // advances one second after recording starts.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        if !active.lock().await.contains_key(&id) {
                            break;
                        }
                        if tx.send(Event::Tick { id }).await.is_err() {
                            break;
                        }
                    }
                });
            }

            Effect::StartPlayback { artifact } => {
                let players = self.players.clone();
                tokio::spawn(async move {
                    let id = artifact.id();
                    let mut players = players.lock().await;
                    if let Some(player) = players.get(&id) {
                        player.resume();
                        return;
                    }

                    let event_tx = tx.clone();
                    let on_event = Box::new(move |event: PlaybackEvent| {
                        let mapped = match event {
                            PlaybackEvent::Started => Event::PlaybackStarted { id },
                            PlaybackEvent::Paused => Event::PlaybackPaused { id },
                            PlaybackEvent::Ended => Event::PlaybackEnded { id },
                        };
                        let _ = event_tx.blocking_send(mapped);
                    });

                    let result =
                        tokio::task::spawn_blocking(move || start_playback(&artifact, on_event))
                            .await;
                    match result {
                        Ok(Ok(player)) => {
                            players.insert(id, player);
                        }
                        Ok(Err(e)) => log::error!("playback failed to start: {}", e),
                        Err(e) => log::error!("playback task panicked: {}", e),
                    }
                });
            }

            Effect::PausePlayback { id } => {
                let players = self.players.clone();
                tokio::spawn(async move {
                    if let Some(player) = players.lock().await.get(&id) {
                        player.pause();
                    }
                });
            }

            Effect::ReleasePlayback { id } => {
                let players = self.players.clone();
                tokio::spawn(async move {
                    // Dropping the handle releases the output device
                    players.lock().await.remove(&id);
                });
            }

            Effect::Upload { artifact } => {
                let transcriber = self.transcriber.clone();
                tokio::spawn(async move {
                    let id = artifact.id();
                    match transcriber.upload(&artifact).await {
                        Ok(outcome) => {
                            let _ = tx
                                .send(Event::UploadOk {
                                    id,
                                    transcription: outcome.transcription,
                                    session_id: outcome.session_id,
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::UploadFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::DeliverTranscription { .. } | Effect::EmitSnapshot => {
                unreachable!("handled by the session loop")
            }
        }
    }
}

/// Deterministic runner for tests: no devices, no network.
///
/// Capture produces a fabricated artifact; ticks are only emitted when
/// `with_auto_tick` is set, otherwise tests inject `Event::Tick` directly.
/// Upload responses are consumed front-to-back; once the queue is empty
/// every upload succeeds with a fixed transcription.
pub struct StubEffectRunner {
    deny_device: bool,
    auto_tick: bool,
    upload_responses: StdMutex<VecDeque<Result<TranscriptionOutcome, String>>>,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl StubEffectRunner {
    pub fn new() -> Self {
        Self {
            deny_device: false,
            auto_tick: false,
            upload_responses: StdMutex::new(VecDeque::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_device_denied(mut self) -> Self {
        self.deny_device = true;
        self
    }

    pub fn with_auto_tick(mut self) -> Self {
        self.auto_tick = true;
        self
    }

    pub fn with_upload_response(self, outcome: TranscriptionOutcome) -> Self {
        self.upload_responses
            .lock()
            .expect("stub mutex poisoned")
            .push_back(Ok(outcome));
        self
    }

    pub fn with_upload_failure(self, err: impl Into<String>) -> Self {
        self.upload_responses
            .lock()
            .expect("stub mutex poisoned")
            .push_back(Err(err.into()));
        self
    }

    fn fabricated_artifact(id: Uuid) -> Result<AudioArtifact, String> {
        AudioArtifact::from_samples(id, vec![0i16; 1600], 16_000, 1).map_err(|e| e.to_string())
    }
}

impl Default for StubEffectRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::AcquireDevice { id } => {
                let deny = self.deny_device;
                let active = self.active.clone();
                tokio::spawn(async move {
                    if deny {
                        let _ = tx
                            .send(Event::DeviceDenied {
                                id,
                                err: "Microphone permission denied".to_string(),
                            })
                            .await;
                    } else {
                        active.lock().await.insert(id);
                        let _ = tx.send(Event::DeviceReady { id }).await;
                    }
                });
            }
            Effect::StopCapture { id } => {
                let active = self.active.clone();
                tokio::spawn(async move {
                    active.lock().await.remove(&id);
                    match Self::fabricated_artifact(id) {
                        Ok(artifact) => {
                            let _ = tx.send(Event::CaptureStopped { id, artifact }).await;
                        }
                        Err(err) => {
                            let _ = tx.send(Event::CaptureFailed { id, err }).await;
                        }
                    }
                });
            }
            Effect::AbortCapture { id } => {
                let active = self.active.clone();
                tokio::spawn(async move {
                    active.lock().await.remove(&id);
                });
            }
            Effect::StartDurationTick { id } => {
                if !self.auto_tick {
                    return;
                }
                let active = self.active.clone();
                tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(std::time::Duration::from_millis(10));
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        if !active.lock().await.contains(&id) {
                            break;
                        }
                        if tx.send(Event::Tick { id }).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Effect::StartPlayback { artifact } => {
                let id = artifact.id();
                tokio::spawn(async move {
                    let _ = tx.send(Event::PlaybackStarted { id }).await;
                });
            }
            Effect::PausePlayback { id } => {
                tokio::spawn(async move {
                    let _ = tx.send(Event::PlaybackPaused { id }).await;
                });
            }
            Effect::ReleasePlayback { .. } => {}
            Effect::Upload { artifact } => {
                let id = artifact.id();
                let response = self
                    .upload_responses
                    .lock()
                    .expect("stub mutex poisoned")
                    .pop_front()
                    .unwrap_or_else(|| {
                        Ok(TranscriptionOutcome {
                            transcription: "stub transcription".to_string(),
                            session_id: None,
                        })
                    });
                tokio::spawn(async move {
                    match response {
                        Ok(outcome) => {
                            let _ = tx
                                .send(Event::UploadOk {
                                    id,
                                    transcription: outcome.transcription,
                                    session_id: outcome.session_id,
                                })
                                .await;
                        }
                        Err(err) => {
                            let _ = tx.send(Event::UploadFail { id, err }).await;
                        }
                    }
                });
            }
            Effect::DeliverTranscription { .. } | Effect::EmitSnapshot => {
                unreachable!("handled by the session loop")
            }
        }
    }
}
