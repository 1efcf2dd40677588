//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! It owns the live input stream and hands out fixed-size windows of the most
//! recent samples to the tracking loop.
//!
//! ## Features
//! - Default input device at its native sample rate
//! - Down-mixing of multi-channel input to mono
//! - Lock-free hand-off from the audio callback thread via a channel
//! - A ring of the last `WINDOW_SIZE` samples, snapshotted per capture

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use crate::error::{Result, TunerError};

/// Number of samples in every captured window.
///
/// Larger windows resolve lower fundamentals but increase latency and the
/// (quadratic) autocorrelation cost per tick.
pub const WINDOW_SIZE: usize = 2048;

/// A snapshot of the most recent input samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    /// Mono samples in chronological order, roughly in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate the samples were captured at, in Hz.
    pub sample_rate: u32,
}

impl SampleWindow {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A continuously running source of audio windows.
///
/// Implementations must not block in `capture_window`: it is called once per
/// tracking loop tick.
pub trait SignalSource {
    /// The native sample rate of the underlying stream, in Hz.
    fn sample_rate(&self) -> u32;

    /// Returns the most recent `WINDOW_SIZE` samples.
    fn capture_window(&mut self) -> SampleWindow;
}

/// Fixed-capacity history of the latest samples.
///
/// Starts zero-filled, so a window captured before the ring has filled up
/// is padded with silence at its start.
#[derive(Debug, Clone)]
pub struct SampleRing {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Appends samples, overwriting the oldest ones.
    pub fn push_slice(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        // Only the tail can survive a block longer than the ring.
        let samples = &samples[samples.len().saturating_sub(capacity)..];
        for &sample in samples {
            self.buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
    }

    /// Copies the history out, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.buffer.len());
        out.extend_from_slice(&self.buffer[self.write_pos..]);
        out.extend_from_slice(&self.buffer[..self.write_pos]);
        out
    }
}

/// Live microphone input from the default host device.
///
/// The cpal stream lives as long as this value; dropping it closes the
/// device. The stream is not `Send` on every platform, so a source must be
/// created and dropped on the same thread.
pub struct MicrophoneSource {
    stream: cpal::Stream,
    blocks: Receiver<Vec<f32>>,
    ring: SampleRing,
    sample_rate: u32,
}

impl MicrophoneSource {
    /// Opens the default input device and starts capturing.
    ///
    /// This function:
    /// 1. Selects the default audio input device
    /// 2. Picks an `f32` input configuration at the device's native rate
    /// 3. Sets up a callback that down-mixes to mono and forwards blocks
    ///
    /// # Returns
    /// * `Ok(source)` - A running source
    /// * `Err(TunerError::DeviceUnavailable)` - No device, permission denied,
    ///   no `f32` format, or the stream could not be built or started
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| TunerError::device("no input device available"))?;

        match device.name() {
            Ok(name) => info!(device = %name, "using audio input device"),
            Err(e) => warn!("could not read input device name: {}", e),
        }

        let default_config = device
            .default_input_config()
            .map_err(TunerError::device)?;
        let native_rate = default_config.sample_rate().0;

        let config: cpal::StreamConfig = if default_config.sample_format() == cpal::SampleFormat::F32 {
            default_config.into()
        } else {
            let configs = device
                .supported_input_configs()
                .map_err(TunerError::device)?
                .collect::<Vec<_>>();
            let supported = find_supported_config(configs, native_rate)
                .ok_or_else(|| TunerError::device("no f32 input format available"))?;
            let rate = native_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
            supported.with_sample_rate(cpal::SampleRate(rate)).into()
        };

        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));
        info!(sample_rate, channels, "selected input configuration");

        let (block_tx, block_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    forward_block(data, channels, &block_tx);
                },
                |err| warn!("an error occurred on the audio stream: {}", err),
                None,
            )
            .map_err(TunerError::device)?;

        stream.play().map_err(TunerError::device)?;

        Ok(Self {
            stream,
            blocks: block_rx,
            ring: SampleRing::new(WINDOW_SIZE),
            sample_rate,
        })
    }
}

impl SignalSource for MicrophoneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn capture_window(&mut self) -> SampleWindow {
        for block in self.blocks.try_iter() {
            self.ring.push_slice(&block);
        }
        SampleWindow::new(self.ring.snapshot(), self.sample_rate)
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            warn!("error pausing input stream: {}", e);
        }
    }
}

/// Down-mixes an interleaved callback buffer to mono and sends it on.
fn forward_block(data: &[f32], channels: usize, sender: &Sender<Vec<f32>>) {
    let block = if channels == 1 {
        data.to_vec()
    } else {
        downmix(data, channels)
    };
    // The receiver is gone once the source is dropped; nothing left to do.
    let _ = sender.send(block);
}

/// Averages interleaved frames of `channels` samples into one mono sample each.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Finds the best supported `f32` configuration for the target sample rate.
///
/// Mono configurations are preferred; among those the one whose rate range
/// lies closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let rate_diff = if (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate) {
                0
            } else {
                let min_diff = c.min_sample_rate().0.abs_diff(target_rate);
                let max_diff = c.max_sample_rate().0.abs_diff(target_rate);
                min_diff.min(max_diff)
            };
            (c.channels() != 1, rate_diff)
        })
}
