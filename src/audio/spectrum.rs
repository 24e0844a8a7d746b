//! Pull-based frequency spectrum over the live capture window
//!
//! The capture callback pushes raw samples into a shared ring buffer; the
//! rendering loop pulls `sample()` at its own cadence and receives a fixed
//! 256-bin amplitude snapshot (values 0-255) computed from a 512-point
//! Hann-windowed FFT of the most recent window, with exponential temporal
//! smoothing to keep the bars from jittering.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, FftPlanner};

/// Number of amplitude bins in a snapshot. Contractually stable.
pub const SPECTRUM_BINS: usize = 256;

/// FFT window size (two samples per output bin).
const FFT_SIZE: usize = SPECTRUM_BINS * 2;

/// Decibel range mapped onto the 0-255 output scale.
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Temporal smoothing factor (0.8 = 80% previous frame, 20% current).
const SMOOTHING: f32 = 0.8;

struct SpectrumInner {
    samples: VecDeque<i16>,
    window: Vec<f32>,
    smoothed: [f32; SPECTRUM_BINS],
    planner: FftPlanner<f32>,
}

/// Shared handle to the spectrum buffer.
///
/// Cloned into the capture callback (writer side) and the session handle
/// (reader side).
#[derive(Clone)]
pub struct SpectrumHandle {
    inner: Arc<Mutex<SpectrumInner>>,
}

impl SpectrumHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SpectrumInner {
                samples: VecDeque::with_capacity(FFT_SIZE),
                window: hann_window(FFT_SIZE),
                smoothed: [0.0; SPECTRUM_BINS],
                planner: FftPlanner::new(),
            })),
        }
    }

    /// Add samples from the capture callback, keeping only the newest window.
    pub fn push_samples(&self, samples: &[i16]) {
        let mut inner = self.inner.lock().expect("spectrum mutex poisoned");
        let len = samples.len();

        if len >= FFT_SIZE {
            inner.samples.clear();
            inner.samples.extend(&samples[len - FFT_SIZE..]);
            return;
        }

        let to_remove = (inner.samples.len() + len).saturating_sub(FFT_SIZE);
        if to_remove > 0 {
            inner.samples.drain(0..to_remove);
        }
        inner.samples.extend(samples);
    }

    /// Drop the buffered window and smoothing state.
    /// Called when a capture starts or ends so a new take begins cold.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("spectrum mutex poisoned");
        inner.samples.clear();
        inner.smoothed = [0.0; SPECTRUM_BINS];
    }

    /// Compute the current snapshot: always `SPECTRUM_BINS` values, 0-255.
    ///
    /// With no buffered audio this returns all zeros; it never fails. The
    /// session handle is responsible for returning an empty snapshot when
    /// the session is not recording.
    pub fn sample(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().expect("spectrum mutex poisoned");

        // Zero-pad the front when the window isn't full yet
        let mut buf = vec![Complex::new(0.0f32, 0.0f32); FFT_SIZE];
        let offset = FFT_SIZE - inner.samples.len();
        for (i, &sample) in inner.samples.iter().enumerate() {
            let normalized = sample as f32 / i16::MAX as f32;
            buf[offset + i] = Complex::new(normalized * inner.window[offset + i], 0.0);
        }

        let fft = inner.planner.plan_fft_forward(FFT_SIZE);
        fft.process(&mut buf);

        let mut out = vec![0u8; SPECTRUM_BINS];
        let scale = 2.0 / FFT_SIZE as f32;
        for (bin, value) in out.iter_mut().enumerate() {
            let amplitude = buf[bin].norm() * scale;
            let smoothed = SMOOTHING * inner.smoothed[bin] + (1.0 - SMOOTHING) * amplitude;
            inner.smoothed[bin] = smoothed;

            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                MIN_DB
            };
            let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB) * 255.0;
            *value = scaled.clamp(0.0, 255.0) as u8;
        }

        out
    }

    /// Number of buffered samples (for tests).
    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.inner
            .lock()
            .expect("spectrum mutex poisoned")
            .samples
            .len()
    }
}

impl Default for SpectrumHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Hann window coefficients, applied before the FFT to reduce spectral leakage.
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / size as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}
