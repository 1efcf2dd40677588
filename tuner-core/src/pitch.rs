//! # Pitch Detection Module
//!
//! Time-domain autocorrelation pitch detection for a single monophonic
//! input. Each window goes through:
//!
//! 1. an RMS noise gate,
//! 2. edge trimming of the leading and trailing samples,
//! 3. an unnormalized autocorrelation over every lag,
//! 4. a search for the first local minimum followed by the highest peak,
//! 5. parabolic interpolation around the peak for a sub-sample period.

use crate::audio::{SampleWindow, WINDOW_SIZE};

/// Windows with an RMS amplitude below this are treated as silence.
pub const NOISE_GATE_RMS: f32 = 0.01;

/// Amplitude below which a sample ends the leading/trailing trim.
pub const TRIM_THRESHOLD: f32 = 0.2;

/// Trimmed windows shorter than this cannot be searched for a period.
const MIN_TRIMMED_LEN: usize = 3;

/// The outcome of analysing one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchEstimate {
    /// Too quiet, or no stable periodicity found.
    NoPitch,
    /// The estimated fundamental frequency in Hz. Always finite and positive.
    Detected(f32),
}

impl PitchEstimate {
    pub fn frequency(&self) -> Option<f32> {
        match *self {
            PitchEstimate::Detected(freq) => Some(freq),
            PitchEstimate::NoPitch => None,
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, PitchEstimate::Detected(_))
    }
}

/// Autocorrelation pitch estimator.
///
/// Keeps its autocorrelation buffer between calls so that the per-tick
/// path does not allocate once it has seen a full-size window.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    autocorr: Vec<f32>,
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self::new(WINDOW_SIZE)
    }
}

impl PitchEstimator {
    /// Creates an estimator with scratch space for windows of `window_size` samples.
    pub fn new(window_size: usize) -> Self {
        Self {
            autocorr: vec![0.0; window_size],
        }
    }

    /// Estimates the fundamental frequency of a captured window.
    pub fn estimate(&mut self, window: &SampleWindow) -> PitchEstimate {
        self.estimate_samples(&window.samples, window.sample_rate)
    }

    /// Estimates the fundamental frequency of raw samples.
    ///
    /// # Arguments
    /// * `samples` - Mono input samples, roughly in `[-1.0, 1.0]`
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `PitchEstimate::Detected(freq)` - A finite, positive frequency in Hz
    /// * `PitchEstimate::NoPitch` - Silence, too little signal left after
    ///   trimming, or no usable period
    pub fn estimate_samples(&mut self, samples: &[f32], sample_rate: u32) -> PitchEstimate {
        if samples.is_empty() || sample_rate == 0 {
            return PitchEstimate::NoPitch;
        }

        // --- Noise Gate: reject silence before the quadratic work ---
        if rms(samples) < NOISE_GATE_RMS {
            return PitchEstimate::NoPitch;
        }

        let trimmed = trim_edges(samples, TRIM_THRESHOLD);
        let size = trimmed.len();
        if size < MIN_TRIMMED_LEN {
            return PitchEstimate::NoPitch;
        }

        // Grows only when a window larger than any seen before arrives.
        if self.autocorr.len() < size {
            self.autocorr.resize(size, 0.0);
        }
        let autocorr = &mut self.autocorr[..size];
        autocorrelate(trimmed, autocorr);

        let Some(period) = find_period(autocorr) else {
            return PitchEstimate::NoPitch;
        };

        let frequency = sample_rate as f32 / period;
        if frequency.is_finite() && frequency > 0.0 {
            PitchEstimate::Detected(frequency)
        } else {
            PitchEstimate::NoPitch
        }
    }
}

/// One-shot convenience wrapper for offline callers.
pub fn estimate_pitch(samples: &[f32], sample_rate: u32) -> PitchEstimate {
    PitchEstimator::new(samples.len()).estimate_samples(samples, sample_rate)
}

/// Root-mean-square amplitude.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Cuts the window down to the span between the first quiet sample in the
/// first half and the last quiet sample in the second half.
///
/// The end index is exclusive. With no quiet sample the bounds stay at the
/// first and last index.
fn trim_edges(samples: &[f32], threshold: f32) -> &[f32] {
    let size = samples.len();
    let half = size / 2;

    let start = samples[..half]
        .iter()
        .position(|s| s.abs() < threshold)
        .unwrap_or(0);
    let end = (1..half)
        .map(|offset| size - offset)
        .find(|&i| samples[i].abs() < threshold)
        .unwrap_or(size.saturating_sub(1));

    if start >= end {
        return &[];
    }
    &samples[start..end]
}

/// `result[lag] = Σ buffer[j] * buffer[j + lag]` for every lag in the buffer.
fn autocorrelate(buffer: &[f32], result: &mut [f32]) {
    let size = buffer.len();
    for (lag, out) in result.iter_mut().enumerate().take(size) {
        *out = buffer[..size - lag]
            .iter()
            .zip(&buffer[lag..])
            .map(|(a, b)| a * b)
            .sum();
    }
}

/// Finds the (fractional) period in samples from an autocorrelation.
///
/// Returns `None` when the peak lands on lag zero or on the last lag. The
/// last lag has no right-hand neighbour, so the three-point fit cannot be
/// made there and the lag is treated as out of range rather than used
/// unrefined.
fn find_period(autocorr: &[f32]) -> Option<f32> {
    let size = autocorr.len();

    // Walk down the zero-lag peak to the first dip.
    let mut dip = 0;
    while dip + 1 < size && autocorr[dip] > autocorr[dip + 1] {
        dip += 1;
    }

    // Highest peak after the dip; the first one wins on ties.
    let mut max_val = f32::NEG_INFINITY;
    let mut peak = None;
    for (lag, &value) in autocorr.iter().enumerate().skip(dip) {
        if value > max_val {
            max_val = value;
            peak = Some(lag);
        }
    }

    let peak = peak?;
    if peak == 0 || peak + 1 >= size {
        return None;
    }

    // --- Parabolic interpolation for sub-sample precision ---
    let x1 = autocorr[peak - 1];
    let x2 = autocorr[peak];
    let x3 = autocorr[peak + 1];
    let a = (x1 + x3 - 2.0 * x2) / 2.0;
    let b = (x3 - x1) / 2.0;

    let period = if a != 0.0 {
        peak as f32 - b / (2.0 * a)
    } else {
        peak as f32
    };

    (period.is_finite() && period > 0.0).then_some(period)
}
