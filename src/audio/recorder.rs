//! Microphone capture using CPAL
//!
//! The recorder owns device discovery; each recording runs on a dedicated
//! capture thread because CPAL streams are not `Send`. The thread buffers
//! raw samples in memory, feeds the spectrum window, and on finalization
//! encodes the take into an `AudioArtifact`. The handle it returns is
//! `Send` and communicates with the thread over channels.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use uuid::Uuid;

use crate::artifact::AudioArtifact;
use crate::audio::spectrum::SpectrumHandle;

/// Errors that can occur while acquiring the device or finalizing a take.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    EncodeFailed(String),
    WorkerGone,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::EncodeFailed(e) => write!(f, "Failed to encode audio data: {}", e),
            CaptureError::WorkerGone => write!(f, "Capture thread exited unexpectedly"),
        }
    }
}

impl std::error::Error for CaptureError {}

pub(crate) enum WorkerCommand {
    Finalize,
    Abort,
}

/// Handle to an active capture.
///
/// `stop()` finalizes the take into an artifact; `abort()` releases the
/// device without producing one. Dropping the handle also releases the
/// device.
pub struct RecordingHandle {
    cmd_tx: mpsc::Sender<WorkerCommand>,
    result_rx: mpsc::Receiver<Result<AudioArtifact, CaptureError>>,
}

impl RecordingHandle {
    /// Stop capturing and finalize the buffered samples.
    /// Blocks briefly while the capture thread encodes the WAV payload.
    pub fn stop(self) -> Result<AudioArtifact, CaptureError> {
        self.cmd_tx
            .send(WorkerCommand::Finalize)
            .map_err(|_| CaptureError::WorkerGone)?;
        self.result_rx.recv().map_err(|_| CaptureError::WorkerGone)?
    }

    /// Release the device and discard the buffered samples.
    pub fn abort(self) {
        let _ = self.cmd_tx.send(WorkerCommand::Abort);
    }
}

#[cfg(test)]
impl RecordingHandle {
    /// A handle wired to a bare channel instead of a capture thread, for
    /// exercising runner bookkeeping without a device.
    pub(crate) fn detached() -> (Self, mpsc::Receiver<WorkerCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (_result_tx, result_rx) = mpsc::channel();
        (Self { cmd_tx, result_rx }, cmd_rx)
    }
}

/// Audio recorder bound to the default input device.
#[derive(Clone)]
pub struct AudioRecorder {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl AudioRecorder {
    /// Discover the default input device and its capture configuration.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        log::info!("using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        log::info!(
            "audio config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Start buffering samples for a new take.
    ///
    /// Spawns the capture thread and waits for the stream to come up so
    /// device errors surface here rather than later.
    pub fn start(
        &self,
        id: Uuid,
        spectrum: SpectrumHandle,
    ) -> Result<RecordingHandle, CaptureError> {
        let device = self.device.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (result_tx, result_rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("storymic-capture".to_string())
            .spawn(move || {
                capture_worker(
                    id,
                    device,
                    config,
                    sample_format,
                    spectrum,
                    cmd_rx,
                    ready_tx,
                    result_tx,
                );
            })
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("capture started for recording {}", id);
                Ok(RecordingHandle { cmd_tx, result_rx })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::WorkerGone),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn capture_worker(
    id: Uuid,
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    spectrum: SpectrumHandle,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    ready_tx: mpsc::Sender<Result<(), CaptureError>>,
    result_tx: mpsc::Sender<Result<AudioArtifact, CaptureError>>,
) {
    let buffer: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));

    let stream = match build_input_stream(
        &device,
        &config,
        sample_format,
        buffer.clone(),
        spectrum.clone(),
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::StreamCreationFailed(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Park until the session asks us to finalize or abort. A dropped
    // handle counts as abort.
    let cmd = cmd_rx.recv().unwrap_or(WorkerCommand::Abort);

    // Release the device before encoding
    drop(stream);
    spectrum.clear();

    match cmd {
        WorkerCommand::Abort => {
            log::debug!("capture {} aborted, device released", id);
        }
        WorkerCommand::Finalize => {
            let samples = match buffer.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            log::info!(
                "capture {} finalized: {} samples at {} Hz",
                id,
                samples.len(),
                config.sample_rate.0
            );
            let result =
                AudioArtifact::from_samples(id, samples, config.sample_rate.0, config.channels)
                    .map_err(|e| CaptureError::EncodeFailed(e.to_string()));
            let _ = result_tx.send(result);
        }
    }
}

fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    buffer: Arc<Mutex<Vec<i16>>>,
    spectrum: SpectrumHandle,
) -> Result<Stream, CaptureError> {
    let err_fn = |err| log::error!("audio stream error: {}", err);

    match sample_format {
        SampleFormat::I16 => build_input_stream_typed::<i16>(device, config, buffer, spectrum, err_fn),
        SampleFormat::U16 => build_input_stream_typed::<u16>(device, config, buffer, spectrum, err_fn),
        SampleFormat::F32 => build_input_stream_typed::<f32>(device, config, buffer, spectrum, err_fn),
        _ => Err(CaptureError::NoSupportedConfig),
    }
}

fn build_input_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<Vec<i16>>>,
    spectrum: SpectrumHandle,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                spectrum.push_samples(&converted);
                if let Ok(mut guard) = buffer.lock() {
                    guard.extend_from_slice(&converted);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Convert any sample type to i16 for buffering.
fn sample_to_i16<T: cpal::Sample>(sample: T) -> i16
where
    f32: cpal::FromSample<T>,
{
    let f32_sample = sample.to_sample::<f32>();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
