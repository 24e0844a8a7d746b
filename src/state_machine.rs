//! State machine for the voice-capture session
//!
//! This module implements the recording lifecycle using a single-writer
//! pattern. All state transitions go through the `reduce()` function, which
//! returns the next session value and a list of effects to execute.

use uuid::Uuid;

use crate::artifact::AudioArtifact;
use crate::config::SessionConfig;

/// Lifecycle state of the recording session.
///
/// `Recording` carries an internal `stopping` flag covering the short gap
/// between a stop request and stream finalization; externally it still reads
/// as recording, and duration ticks are ignored while it is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting {
        recording_id: Uuid,
    },
    Recording {
        recording_id: Uuid,
        stopping: bool,
    },
    Stopped,
    Processing,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

/// The aggregate session value.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: SessionState,
    pub duration_secs: u32,
    pub artifact: Option<AudioArtifact>,
    pub last_error: Option<String>,
    pub is_playing: bool,
    pub advisory: Option<String>,
}

impl Session {
    /// The id of the in-flight or live recording, if any.
    pub fn live_recording_id(&self) -> Option<Uuid> {
        match self.state {
            SessionState::Requesting { recording_id }
            | SessionState::Recording { recording_id, .. } => Some(recording_id),
            _ => None,
        }
    }

    fn artifact_id(&self) -> Option<Uuid> {
        self.artifact.as_ref().map(|a| a.id())
    }
}

/// Events that can trigger state transitions.
/// Commands come from the presentation surface; the rest are sent back by
/// the effect runner (capture, timer, playback, upload).
#[derive(Debug, Clone)]
pub enum Event {
    // Commands
    StartRecording,
    StopRecording,
    Reset,
    Play,
    Pause,
    UploadAudio,

    // Capture results
    DeviceReady {
        id: Uuid,
    },
    DeviceDenied {
        id: Uuid,
        err: String,
    },
    CaptureStopped {
        id: Uuid,
        artifact: AudioArtifact,
    },
    CaptureFailed {
        id: Uuid,
        err: String,
    },

    /// Per-second duration tick (includes id to prevent stale ticks)
    Tick {
        id: Uuid,
    },

    // Playback side-channel events - the sole source of truth for is_playing
    PlaybackStarted {
        id: Uuid,
    },
    PlaybackPaused {
        id: Uuid,
    },
    PlaybackEnded {
        id: Uuid,
    },

    // Upload results
    UploadOk {
        id: Uuid,
        transcription: String,
        session_id: Option<String>,
    },
    UploadFail {
        id: Uuid,
        err: String,
    },
}

/// Effects to be executed after a state transition.
/// The session loop handles `EmitSnapshot` and `DeliverTranscription`
/// itself; everything else goes to the effect runner.
#[derive(Debug, Clone)]
pub enum Effect {
    AcquireDevice {
        id: Uuid,
    },
    StopCapture {
        id: Uuid,
    },
    AbortCapture {
        id: Uuid,
    },
    /// Start sending Tick events every second while the capture is live
    StartDurationTick {
        id: Uuid,
    },
    StartPlayback {
        artifact: AudioArtifact,
    },
    PausePlayback {
        id: Uuid,
    },
    ReleasePlayback {
        id: Uuid,
    },
    Upload {
        artifact: AudioArtifact,
    },
    DeliverTranscription {
        transcription: String,
        session_id: Option<String>,
    },
    EmitSnapshot,
}

/// The advisory shown when the duration cap stops a recording, expressed in
/// whole minutes.
fn cap_advisory(max_duration_secs: u32) -> String {
    let minutes = (max_duration_secs / 60).max(1);
    if minutes == 1 {
        "Maximum recording time of 1 minute reached.".to_string()
    } else {
        format!("Maximum recording time of {} minutes reached.", minutes)
    }
}

/// Reducer function: (session, event, config) -> (next_session, effects)
///
/// Key rules:
/// - Never mutate state in place
/// - Drop events with stale recording or artifact ids
/// - Emit `EmitSnapshot` whenever something observable changed
pub fn reduce(session: &Session, event: Event, config: &SessionConfig) -> (Session, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use SessionState::*;

    let live_id = session.live_recording_id();
    let is_stale = |eid: Uuid| live_id != Some(eid);

    match (&session.state, event) {
        // -----------------
        // startRecording
        // -----------------
        (Idle | Stopped, StartRecording) => {
            let id = Uuid::new_v4();
            let mut effects = Vec::new();
            // A new recording replaces the previous take: revoke its
            // playback resource before dropping the reference.
            if let Some(old) = session.artifact_id() {
                effects.push(ReleasePlayback { id: old });
            }
            effects.push(AcquireDevice { id });
            effects.push(EmitSnapshot);
            (
                Session {
                    state: Requesting { recording_id: id },
                    duration_secs: session.duration_secs,
                    artifact: None,
                    last_error: session.last_error.clone(),
                    is_playing: false,
                    advisory: None,
                },
                effects,
            )
        }
        (Requesting { .. } | Recording { .. }, StartRecording) => {
            log::warn!("startRecording rejected: capture already in progress");
            (session.clone(), vec![])
        }
        (Processing, StartRecording) => {
            log::warn!("startRecording rejected: upload in flight");
            (session.clone(), vec![])
        }

        // -----------------
        // Device acquisition
        // -----------------
        (Requesting { recording_id }, DeviceReady { id }) if *recording_id == id => (
            Session {
                state: Recording {
                    recording_id: id,
                    stopping: false,
                },
                duration_secs: 0,
                artifact: None,
                last_error: None,
                is_playing: false,
                advisory: None,
            },
            vec![StartDurationTick { id }, EmitSnapshot],
        ),
        (Requesting { recording_id }, DeviceDenied { id, err }) if *recording_id == id => {
            log::warn!("capture device unavailable: {}", err);
            (
                Session {
                    state: Idle,
                    last_error: Some(err),
                    ..session.clone()
                },
                vec![EmitSnapshot],
            )
        }

        // -----------------
        // stopRecording
        // -----------------
        (
            Recording {
                recording_id,
                stopping: false,
            },
            StopRecording,
        ) => {
            let id = *recording_id;
            (
                Session {
                    state: Recording {
                        recording_id: id,
                        stopping: true,
                    },
                    ..session.clone()
                },
                vec![StopCapture { id }, EmitSnapshot],
            )
        }
        // Idempotent no-op everywhere else (including while already stopping)
        (_, StopRecording) => (session.clone(), vec![]),

        // -----------------
        // Duration tick / cap enforcement
        // -----------------
        (
            Recording {
                recording_id,
                stopping: false,
            },
            Tick { id },
        ) if *recording_id == id => {
            let duration_secs = session.duration_secs + 1;
            if duration_secs >= config.max_duration_secs {
                log::info!(
                    "recording {} auto-stopped at {}s (max duration reached)",
                    id,
                    duration_secs
                );
                (
                    Session {
                        state: Recording {
                            recording_id: id,
                            stopping: true,
                        },
                        duration_secs,
                        advisory: Some(cap_advisory(config.max_duration_secs)),
                        ..session.clone()
                    },
                    vec![StopCapture { id }, EmitSnapshot],
                )
            } else {
                (
                    Session {
                        duration_secs,
                        ..session.clone()
                    },
                    vec![EmitSnapshot],
                )
            }
        }
        // A tick while stopping must not advance the clock
        (Recording { stopping: true, .. }, Tick { .. }) => (session.clone(), vec![]),

        // -----------------
        // Capture finalization
        // -----------------
        (Recording { recording_id, .. }, CaptureStopped { id, artifact }) if *recording_id == id => {
            (
                Session {
                    state: Stopped,
                    artifact: Some(artifact),
                    is_playing: false,
                    ..session.clone()
                },
                vec![EmitSnapshot],
            )
        }
        (
            Requesting { recording_id } | Recording { recording_id, .. },
            CaptureFailed { id, err },
        ) if *recording_id == id => {
            log::error!("capture failed: {}", err);
            (
                Session {
                    state: Idle,
                    artifact: None,
                    last_error: Some(err),
                    is_playing: false,
                    ..session.clone()
                },
                vec![EmitSnapshot],
            )
        }

        // -----------------
        // Playback
        // -----------------
        (Stopped, Play) => match &session.artifact {
            Some(artifact) => (
                session.clone(),
                vec![StartPlayback {
                    artifact: artifact.clone(),
                }],
            ),
            None => (session.clone(), vec![]),
        },
        (Stopped, Pause) => match session.artifact_id() {
            Some(id) => (session.clone(), vec![PausePlayback { id }]),
            None => (session.clone(), vec![]),
        },
        // play/pause without an artifact is a no-op, not an error
        (_, Play | Pause) => (session.clone(), vec![]),

        // The sink also reports while an upload is in flight; the artifact
        // id guard keeps stale events out.
        (Stopped | Processing, PlaybackStarted { id }) if session.artifact_id() == Some(id) => (
            Session {
                is_playing: true,
                ..session.clone()
            },
            vec![EmitSnapshot],
        ),
        (Stopped | Processing, PlaybackPaused { id } | PlaybackEnded { id })
            if session.artifact_id() == Some(id) =>
        {
            (
                Session {
                    is_playing: false,
                    ..session.clone()
                },
                vec![EmitSnapshot],
            )
        }

        // -----------------
        // uploadAudio
        // -----------------
        (Stopped, UploadAudio) => match &session.artifact {
            Some(artifact) => (
                Session {
                    state: Processing,
                    last_error: None,
                    ..session.clone()
                },
                vec![
                    Upload {
                        artifact: artifact.clone(),
                    },
                    EmitSnapshot,
                ],
            ),
            None => (session.clone(), vec![]),
        },
        (Processing, UploadAudio) => {
            log::warn!("uploadAudio rejected: upload already in flight");
            (session.clone(), vec![])
        }
        (_, UploadAudio) => (session.clone(), vec![]),

        (
            Processing,
            UploadOk {
                id,
                transcription,
                session_id,
            },
        ) if session.artifact_id() == Some(id) => (
            Session {
                state: Stopped,
                ..session.clone()
            },
            vec![
                DeliverTranscription {
                    transcription,
                    session_id,
                },
                EmitSnapshot,
            ],
        ),
        (Processing, UploadFail { id, err }) if session.artifact_id() == Some(id) => {
            log::warn!("upload failed: {}", err);
            (
                Session {
                    state: Stopped,
                    last_error: Some(err),
                    ..session.clone()
                },
                vec![EmitSnapshot],
            )
        }

        // -----------------
        // reset - valid from any state
        // -----------------
        (_, Reset) => {
            let mut effects = Vec::new();
            if let Some(id) = live_id {
                effects.push(AbortCapture { id });
            }
            if let Some(id) = session.artifact_id() {
                effects.push(ReleasePlayback { id });
            }
            effects.push(EmitSnapshot);
            (Session::default(), effects)
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, DeviceReady { id } | DeviceDenied { id, .. }) if is_stale(id) => {
            log::debug!("dropping stale device event for {}", id);
            (session.clone(), vec![])
        }
        (_, CaptureStopped { id, .. } | CaptureFailed { id, .. } | Tick { id })
            if is_stale(id) =>
        {
            (session.clone(), vec![])
        }
        (_, UploadOk { id, .. } | UploadFail { id, .. }) if session.artifact_id() != Some(id) => {
            log::debug!("dropping stale upload result for {}", id);
            (session.clone(), vec![])
        }

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (session.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::AudioArtifact;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn config_with_cap(max: u32) -> SessionConfig {
        SessionConfig::default().with_max_duration(max)
    }

    fn test_artifact(id: Uuid) -> AudioArtifact {
        AudioArtifact::from_samples(id, vec![0i16; 1600], 16_000, 1)
            .expect("test artifact should encode")
    }

    fn recording_session(id: Uuid, duration_secs: u32) -> Session {
        Session {
            state: SessionState::Recording {
                recording_id: id,
                stopping: false,
            },
            duration_secs,
            ..Session::default()
        }
    }

    fn stopped_session(artifact: AudioArtifact) -> Session {
        Session {
            state: SessionState::Stopped,
            artifact: Some(artifact),
            ..Session::default()
        }
    }

    /// artifact may only exist in Stopped or Processing
    fn assert_artifact_invariant(session: &Session) {
        if !matches!(
            session.state,
            SessionState::Stopped | SessionState::Processing
        ) {
            assert!(
                session.artifact.is_none(),
                "artifact must not exist in {:?}",
                session.state
            );
        }
    }

    // --- startRecording ---

    #[test]
    fn idle_start_recording_requests_device() {
        let (next, effects) = reduce(&Session::default(), Event::StartRecording, &config());
        assert!(matches!(next.state, SessionState::Requesting { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AcquireDevice { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitSnapshot)));
        assert_artifact_invariant(&next);
    }

    #[test]
    fn start_recording_while_recording_is_rejected() {
        let id = Uuid::new_v4();
        let session = recording_session(id, 3);
        let (next, effects) = reduce(&session, Event::StartRecording, &config());
        assert_eq!(next.live_recording_id(), Some(id));
        assert_eq!(next.duration_secs, 3);
        assert!(effects.is_empty());
    }

    #[test]
    fn start_recording_from_stopped_releases_previous_artifact() {
        let artifact_id = Uuid::new_v4();
        let session = stopped_session(test_artifact(artifact_id));
        let (next, effects) = reduce(&session, Event::StartRecording, &config());
        assert!(matches!(next.state, SessionState::Requesting { .. }));
        assert!(next.artifact.is_none());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ReleasePlayback { id } if *id == artifact_id)));
        assert_artifact_invariant(&next);
    }

    #[test]
    fn device_ready_enters_recording_and_resets_duration() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Requesting { recording_id: id },
            duration_secs: 42,
            last_error: Some("previous failure".to_string()),
            ..Session::default()
        };
        let (next, effects) = reduce(&session, Event::DeviceReady { id }, &config());
        assert!(matches!(
            next.state,
            SessionState::Recording {
                stopping: false,
                ..
            }
        ));
        assert_eq!(next.duration_secs, 0);
        assert!(next.last_error.is_none());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartDurationTick { .. })));
    }

    #[test]
    fn device_denied_returns_to_idle_with_error() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Requesting { recording_id: id },
            ..Session::default()
        };
        let (next, _) = reduce(
            &session,
            Event::DeviceDenied {
                id,
                err: "no input device".to_string(),
            },
            &config(),
        );
        assert_eq!(next.state, SessionState::Idle);
        assert_eq!(next.last_error.as_deref(), Some("no input device"));
        assert_artifact_invariant(&next);
    }

    #[test]
    fn stale_device_ready_is_ignored() {
        let session = Session {
            state: SessionState::Requesting {
                recording_id: Uuid::new_v4(),
            },
            ..Session::default()
        };
        let (next, effects) = reduce(
            &session,
            Event::DeviceReady { id: Uuid::new_v4() },
            &config(),
        );
        assert!(matches!(next.state, SessionState::Requesting { .. }));
        assert!(effects.is_empty());
    }

    // --- stopRecording ---

    #[test]
    fn stop_recording_requests_capture_finalization() {
        let id = Uuid::new_v4();
        let session = recording_session(id, 5);
        let (next, effects) = reduce(&session, Event::StopRecording, &config());
        assert!(matches!(
            next.state,
            SessionState::Recording { stopping: true, .. }
        ));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { id: eid } if *eid == id)));
    }

    #[test]
    fn stop_recording_outside_recording_is_noop() {
        for session in [Session::default(), stopped_session(test_artifact(Uuid::new_v4()))] {
            let (next, effects) = reduce(&session, Event::StopRecording, &config());
            assert_eq!(next.state, session.state);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn capture_stopped_finalizes_artifact() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Recording {
                recording_id: id,
                stopping: true,
            },
            duration_secs: 5,
            ..Session::default()
        };
        let (next, _) = reduce(
            &session,
            Event::CaptureStopped {
                id,
                artifact: test_artifact(id),
            },
            &config(),
        );
        assert_eq!(next.state, SessionState::Stopped);
        assert!(next.artifact.is_some());
        assert_eq!(next.duration_secs, 5);
        assert_artifact_invariant(&next);
    }

    #[test]
    fn capture_failed_returns_to_idle_with_error() {
        let id = Uuid::new_v4();
        let session = recording_session(id, 2);
        let (next, _) = reduce(
            &session,
            Event::CaptureFailed {
                id,
                err: "stream died".to_string(),
            },
            &config(),
        );
        assert_eq!(next.state, SessionState::Idle);
        assert!(next.last_error.is_some());
        assert_artifact_invariant(&next);
    }

    // --- Duration tick ---

    #[test]
    fn ticks_advance_duration_while_recording() {
        let id = Uuid::new_v4();
        let mut session = recording_session(id, 0);
        for expected in 1..=5 {
            let (next, _) = reduce(&session, Event::Tick { id }, &config());
            assert_eq!(next.duration_secs, expected);
            session = next;
        }
        assert!(matches!(
            session.state,
            SessionState::Recording {
                stopping: false,
                ..
            }
        ));
    }

    #[test]
    fn stale_tick_is_ignored() {
        let session = recording_session(Uuid::new_v4(), 3);
        let (next, effects) = reduce(&session, Event::Tick { id: Uuid::new_v4() }, &config());
        assert_eq!(next.duration_secs, 3);
        assert!(effects.is_empty());
    }

    #[test]
    fn tick_while_stopping_does_not_advance_duration() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Recording {
                recording_id: id,
                stopping: true,
            },
            duration_secs: 7,
            ..Session::default()
        };
        let (next, effects) = reduce(&session, Event::Tick { id }, &config());
        assert_eq!(next.duration_secs, 7);
        assert!(effects.is_empty());
    }

    #[test]
    fn reaching_cap_auto_stops_with_advisory() {
        let id = Uuid::new_v4();
        let session = recording_session(id, 59);
        let (next, effects) = reduce(&session, Event::Tick { id }, &config_with_cap(60));
        assert!(matches!(
            next.state,
            SessionState::Recording { stopping: true, .. }
        ));
        assert_eq!(next.duration_secs, 60);
        let advisory = next.advisory.expect("advisory should be set");
        assert!(advisory.contains("1 minute"), "advisory: {}", advisory);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));
    }

    #[test]
    fn advisory_is_emitted_exactly_once() {
        let id = Uuid::new_v4();
        let session = recording_session(id, 59);
        let (capped, _) = reduce(&session, Event::Tick { id }, &config_with_cap(60));
        // Further ticks arrive while stopping and must not re-emit anything
        let (next, effects) = reduce(&capped, Event::Tick { id }, &config_with_cap(60));
        assert_eq!(next.duration_secs, 60);
        assert!(effects.is_empty());
    }

    #[test]
    fn cap_advisory_uses_whole_minutes() {
        assert!(cap_advisory(60).contains("1 minute"));
        assert!(cap_advisory(180).contains("3 minutes"));
        assert!(cap_advisory(300).contains("5 minutes"));
    }

    // --- Playback ---

    #[test]
    fn play_with_artifact_starts_playback() {
        let session = stopped_session(test_artifact(Uuid::new_v4()));
        let (next, effects) = reduce(&session, Event::Play, &config());
        // is_playing only changes when the sink reports back
        assert!(!next.is_playing);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartPlayback { .. })));
    }

    #[test]
    fn play_without_artifact_is_noop() {
        let (next, effects) = reduce(&Session::default(), Event::Play, &config());
        assert!(!next.is_playing);
        assert!(effects.is_empty());
    }

    #[test]
    fn playback_events_drive_is_playing() {
        let id = Uuid::new_v4();
        let session = stopped_session(test_artifact(id));

        let (playing, _) = reduce(&session, Event::PlaybackStarted { id }, &config());
        assert!(playing.is_playing);

        let (paused, _) = reduce(&playing, Event::PlaybackPaused { id }, &config());
        assert!(!paused.is_playing);

        let (playing, _) = reduce(&paused, Event::PlaybackStarted { id }, &config());
        let (ended, _) = reduce(&playing, Event::PlaybackEnded { id }, &config());
        assert!(!ended.is_playing);
    }

    #[test]
    fn playback_ending_during_upload_clears_is_playing() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Processing,
            artifact: Some(test_artifact(id)),
            is_playing: true,
            ..Session::default()
        };
        let (next, effects) = reduce(&session, Event::PlaybackEnded { id }, &config());
        assert!(!next.is_playing, "sink reported the end of the take");
        assert_eq!(next.state, SessionState::Processing);
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitSnapshot)));

        // The upload finishing afterwards must not resurrect it
        let (done, _) = reduce(
            &next,
            Event::UploadOk {
                id,
                transcription: "done".to_string(),
                session_id: None,
            },
            &config(),
        );
        assert_eq!(done.state, SessionState::Stopped);
        assert!(!done.is_playing);
    }

    #[test]
    fn stale_playback_event_is_ignored() {
        let session = stopped_session(test_artifact(Uuid::new_v4()));
        let (next, effects) = reduce(
            &session,
            Event::PlaybackStarted { id: Uuid::new_v4() },
            &config(),
        );
        assert!(!next.is_playing);
        assert!(effects.is_empty());
    }

    // --- uploadAudio ---

    #[test]
    fn upload_moves_to_processing_and_clears_error() {
        let session = Session {
            last_error: Some("earlier upload failed".to_string()),
            ..stopped_session(test_artifact(Uuid::new_v4()))
        };
        let (next, effects) = reduce(&session, Event::UploadAudio, &config());
        assert_eq!(next.state, SessionState::Processing);
        assert!(next.last_error.is_none());
        assert!(next.artifact.is_some());
        assert!(effects.iter().any(|e| matches!(e, Effect::Upload { .. })));
        assert_artifact_invariant(&next);
    }

    #[test]
    fn upload_while_processing_is_rejected() {
        let session = Session {
            state: SessionState::Processing,
            artifact: Some(test_artifact(Uuid::new_v4())),
            ..Session::default()
        };
        let (next, effects) = reduce(&session, Event::UploadAudio, &config());
        assert_eq!(next.state, SessionState::Processing);
        assert!(effects.is_empty());
    }

    #[test]
    fn upload_without_artifact_is_noop() {
        let (next, effects) = reduce(&Session::default(), Event::UploadAudio, &config());
        assert_eq!(next.state, SessionState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn upload_success_returns_to_stopped_and_delivers_result() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Processing,
            artifact: Some(test_artifact(id)),
            ..Session::default()
        };
        let (next, effects) = reduce(
            &session,
            Event::UploadOk {
                id,
                transcription: "Test transcription".to_string(),
                session_id: Some("test-session".to_string()),
            },
            &config(),
        );
        assert_eq!(next.state, SessionState::Stopped);
        assert!(next.artifact.is_some(), "artifact must survive upload");
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::DeliverTranscription { transcription, session_id }
                if transcription == "Test transcription"
                    && session_id.as_deref() == Some("test-session")
        )));
    }

    #[test]
    fn upload_failure_preserves_artifact_and_sets_error() {
        let id = Uuid::new_v4();
        let session = Session {
            state: SessionState::Processing,
            artifact: Some(test_artifact(id)),
            ..Session::default()
        };
        let (next, _) = reduce(
            &session,
            Event::UploadFail {
                id,
                err: "service unavailable".to_string(),
            },
            &config(),
        );
        assert_eq!(next.state, SessionState::Stopped);
        assert!(next.artifact.is_some(), "failure must not destroy the take");
        assert_eq!(next.last_error.as_deref(), Some("service unavailable"));

        // A retry is permitted from here
        let (retry, effects) = reduce(&next, Event::UploadAudio, &config());
        assert_eq!(retry.state, SessionState::Processing);
        assert!(effects.iter().any(|e| matches!(e, Effect::Upload { .. })));
    }

    #[test]
    fn stale_upload_result_is_ignored() {
        let session = Session {
            state: SessionState::Processing,
            artifact: Some(test_artifact(Uuid::new_v4())),
            ..Session::default()
        };
        let (next, effects) = reduce(
            &session,
            Event::UploadOk {
                id: Uuid::new_v4(),
                transcription: "stale".to_string(),
                session_id: None,
            },
            &config(),
        );
        assert_eq!(next.state, SessionState::Processing);
        assert!(effects.is_empty());
    }

    // --- reset ---

    #[test]
    fn reset_from_any_state_restores_pristine_idle() {
        let recording_id = Uuid::new_v4();
        let artifact_id = Uuid::new_v4();
        let sessions = [
            Session::default(),
            Session {
                state: SessionState::Requesting { recording_id },
                ..Session::default()
            },
            Session {
                duration_secs: 12,
                advisory: Some("Maximum recording time of 1 minute reached.".to_string()),
                ..recording_session(recording_id, 12)
            },
            Session {
                is_playing: true,
                last_error: Some("boom".to_string()),
                ..stopped_session(test_artifact(artifact_id))
            },
            Session {
                state: SessionState::Processing,
                artifact: Some(test_artifact(artifact_id)),
                ..Session::default()
            },
        ];
        for session in sessions {
            let (next, _) = reduce(&session, Event::Reset, &config());
            assert_eq!(next.state, SessionState::Idle);
            assert_eq!(next.duration_secs, 0);
            assert!(next.artifact.is_none());
            assert!(next.last_error.is_none());
            assert!(next.advisory.is_none());
            assert!(!next.is_playing);
        }
    }

    #[test]
    fn reset_while_recording_aborts_capture() {
        let id = Uuid::new_v4();
        let session = recording_session(id, 4);
        let (_, effects) = reduce(&session, Event::Reset, &config());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AbortCapture { id: eid } if *eid == id)));
    }

    #[test]
    fn reset_with_artifact_releases_playback() {
        let artifact_id = Uuid::new_v4();
        let session = stopped_session(test_artifact(artifact_id));
        let (_, effects) = reduce(&session, Event::Reset, &config());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ReleasePlayback { id } if *id == artifact_id)));
    }
}
