//! Playback of a finalized take
//!
//! Mirrors the recorder's threading model: CPAL output streams are not
//! `Send`, so each playback runs on its own thread and the session talks
//! to it through a channel-backed handle. Play state is reported back as
//! events; the session reducer treats those events as the only source of
//! truth for `is_playing`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};

use crate::artifact::AudioArtifact;

#[derive(Debug, Clone)]
pub enum PlaybackError {
    NoOutputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    WorkerGone,
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::NoOutputDevice => write!(f, "No audio output device found"),
            PlaybackError::NoSupportedConfig => write!(f, "No supported output configuration"),
            PlaybackError::StreamCreationFailed(e) => {
                write!(f, "Failed to create output stream: {}", e)
            }
            PlaybackError::WorkerGone => write!(f, "Playback thread exited unexpectedly"),
        }
    }
}

impl std::error::Error for PlaybackError {}

/// Emitted by the playback thread as the sink changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Paused,
    Ended,
}

enum PlayerCommand {
    Pause,
    Resume,
    Release,
}

/// Handle to an active playback thread.
///
/// Dropping the handle releases the output device.
pub struct PlayerHandle {
    cmd_tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn pause(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Pause);
    }

    /// Resume from the paused position, or replay from the start after the
    /// take has ended.
    pub fn resume(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Resume);
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Release);
    }
}

/// Start playing an artifact on a dedicated playback thread.
///
/// `on_event` is called from that thread for every state change, starting
/// with `Started` once the stream is running.
pub fn start_playback(
    artifact: &AudioArtifact,
    on_event: Box<dyn Fn(PlaybackEvent) + Send>,
) -> Result<PlayerHandle, PlaybackError> {
    let samples = artifact.samples().clone();
    let channels = artifact.channels();
    let sample_rate = artifact.sample_rate();

    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("storymic-playback".to_string())
        .spawn(move || {
            player_worker(samples, channels, sample_rate, cmd_rx, ready_tx, on_event);
        })
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(PlayerHandle { cmd_tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PlaybackError::WorkerGone),
    }
}

fn player_worker(
    samples: Arc<Vec<i16>>,
    channels: u16,
    sample_rate: u32,
    cmd_rx: mpsc::Receiver<PlayerCommand>,
    ready_tx: mpsc::Sender<Result<(), PlaybackError>>,
    on_event: Box<dyn Fn(PlaybackEvent) + Send>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(PlaybackError::NoOutputDevice));
            return;
        }
    };

    let sample_format = match device.default_output_config() {
        Ok(c) => c.sample_format(),
        Err(_) => {
            let _ = ready_tx.send(Err(PlaybackError::NoSupportedConfig));
            return;
        }
    };

    // Render at the artifact's own rate and layout rather than resampling
    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let position = Arc::new(AtomicUsize::new(0));
    let playing = Arc::new(AtomicBool::new(true));
    let ended = Arc::new(AtomicBool::new(false));

    let stream = match build_output_stream(
        &device,
        &config,
        sample_format,
        samples,
        position.clone(),
        playing.clone(),
        ended.clone(),
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(PlaybackError::StreamCreationFailed(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    on_event(PlaybackEvent::Started);

    loop {
        match cmd_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(PlayerCommand::Pause) => {
                playing.store(false, Ordering::Relaxed);
                on_event(PlaybackEvent::Paused);
            }
            Ok(PlayerCommand::Resume) => {
                playing.store(true, Ordering::Relaxed);
                on_event(PlaybackEvent::Started);
            }
            Ok(PlayerCommand::Release) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // End of take: rewind and pause so a later resume replays
                if ended.swap(false, Ordering::Relaxed) {
                    playing.store(false, Ordering::Relaxed);
                    position.store(0, Ordering::Relaxed);
                    on_event(PlaybackEvent::Ended);
                }
            }
        }
    }

    drop(stream);
    log::debug!("playback thread released output device");
}

fn build_output_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    samples: Arc<Vec<i16>>,
    position: Arc<AtomicUsize>,
    playing: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
) -> Result<Stream, PlaybackError> {
    match sample_format {
        SampleFormat::I16 => {
            build_output_stream_typed::<i16>(device, config, samples, position, playing, ended)
        }
        SampleFormat::U16 => {
            build_output_stream_typed::<u16>(device, config, samples, position, playing, ended)
        }
        SampleFormat::F32 => {
            build_output_stream_typed::<f32>(device, config, samples, position, playing, ended)
        }
        _ => Err(PlaybackError::NoSupportedConfig),
    }
}

fn build_output_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Arc<Vec<i16>>,
    position: Arc<AtomicUsize>,
    playing: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let err_fn = |err| log::error!("output stream error: {}", err);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    let value = if playing.load(Ordering::Relaxed) {
                        let pos = position.load(Ordering::Relaxed);
                        if pos < samples.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                            samples[pos] as f32 / i16::MAX as f32
                        } else {
                            ended.store(true, Ordering::Relaxed);
                            0.0
                        }
                    } else {
                        0.0
                    };
                    *out = T::from_sample(value);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}
