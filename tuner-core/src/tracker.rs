//! # Tracking Loop
//!
//! Ties the signal source, pitch estimator and note mapper together and
//! publishes readings once per tick.
//!
//! ## Architecture
//! - **Loop thread**: opens the signal source, then ticks at the configured
//!   interval until the session is closed
//! - **Audio thread**: owned by cpal, feeds the source's ring buffer
//! - **Communication**: crossbeam channels for readiness, shutdown and readings
//!
//! The loop thread is also the only owner of the source, so the stream is
//! created and dropped on one thread even where it is not `Send`.

use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::{MicrophoneSource, SignalSource, WINDOW_SIZE};
use crate::config::TunerConfig;
use crate::error::{Result, TunerError};
use crate::pitch::{PitchEstimate, PitchEstimator};
use crate::tuning::{self, Note, NoteReading};

/// Whether a session currently owns a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No stream open, no tick scheduled.
    Idle,
    /// Stream open and ticking.
    Active,
}

/// Per-tick analysis over a signal source.
///
/// Holds on to the last reading it produced; ticks without a pitch leave it
/// in place so a display can keep showing it.
pub struct TrackingLoop<S> {
    source: S,
    estimator: PitchEstimator,
    target: Option<Note>,
    latest: Option<NoteReading>,
}

impl<S: SignalSource> TrackingLoop<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            estimator: PitchEstimator::new(WINDOW_SIZE),
            target: None,
            latest: None,
        }
    }

    /// Measure against a fixed note instead of the nearest one.
    pub fn with_target(mut self, target: Option<Note>) -> Self {
        self.target = target;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    /// The last reading produced by `tick`, if any.
    pub fn latest(&self) -> Option<&NoteReading> {
        self.latest.as_ref()
    }

    /// Captures a window and analyses it.
    ///
    /// Returns the new reading, or `None` when this tick found no pitch.
    pub fn tick(&mut self) -> Option<NoteReading> {
        let frequency = self.analyse().frequency()?;
        let reading = match self.target {
            Some(target) => tuning::map_against(frequency, target),
            None => tuning::map_frequency(frequency),
        };
        self.latest = Some(reading.clone());
        Some(reading)
    }

    /// A fault while capturing or estimating only costs this tick.
    fn analyse(&mut self) -> PitchEstimate {
        let source = &mut self.source;
        let estimator = &mut self.estimator;
        match panic::catch_unwind(AssertUnwindSafe(|| {
            let window = source.capture_window();
            estimator.estimate(&window)
        })) {
            Ok(estimate) => estimate,
            Err(_) => {
                warn!("analysis panicked, treating tick as no pitch");
                PitchEstimate::NoPitch
            }
        }
    }
}

/// Handles to the running loop thread.
struct LoopWorker {
    shutdown_tx: Sender<()>,
    cancelled: Arc<AtomicBool>,
    thread_handle: JoinHandle<()>,
}

/// A tuner session: one signal source, one tracking loop.
///
/// Readings are sent to the consumer's channel. Closing the session (or
/// dropping it) cancels the loop and releases the source before returning.
pub struct TrackerSession {
    sample_rate: u32,
    worker: Option<LoopWorker>,
}

impl TrackerSession {
    /// Starts a session on the default microphone.
    ///
    /// # Returns
    /// * `Ok(session)` - The loop is running and publishing to `readings`
    /// * `Err(TunerError::DeviceUnavailable)` - The microphone could not be
    ///   opened; no loop was started
    pub fn open_microphone(config: &TunerConfig, readings: Sender<NoteReading>) -> Result<Self> {
        Self::start(config, MicrophoneSource::open, readings)
    }

    /// Starts a session over any signal source.
    ///
    /// `open_source` runs on the loop thread. If it fails the error is
    /// returned here and the loop never ticks.
    pub fn start<S, F>(config: &TunerConfig, open_source: F, readings: Sender<NoteReading>) -> Result<Self>
    where
        S: SignalSource + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let loop_cancelled = Arc::clone(&cancelled);
        let interval = config.tick_interval();
        let target = config.target;

        let thread_handle = thread::Builder::new()
            .name("tuner-loop".into())
            .spawn(move || {
                let source = match open_source() {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut tracker = TrackingLoop::new(source).with_target(target);
                let _ = ready_tx.send(Ok(tracker.sample_rate()));

                run_loop(&mut tracker, interval, &shutdown_rx, &loop_cancelled, &readings);

                debug!("tracking loop finished, releasing signal source");
            })
            .map_err(TunerError::Spawn)?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(sample_rate)) => sample_rate,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                warn!("tuner session failed to start: {}", e);
                return Err(e);
            }
            Err(_) => {
                // The opener panicked before reporting back.
                let _ = thread_handle.join();
                return Err(TunerError::device("signal source failed while opening"));
            }
        };

        info!(sample_rate, interval_ms = interval.as_millis() as u64, "tuner session started");

        Ok(Self {
            sample_rate,
            worker: Some(LoopWorker {
                shutdown_tx,
                cancelled,
                thread_handle,
            }),
        })
    }

    /// The actual sample rate of the open stream.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> LoopState {
        if self.worker.is_some() {
            LoopState::Active
        } else {
            LoopState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == LoopState::Active
    }

    /// Cancels the loop and releases the signal source.
    ///
    /// Blocks until the loop thread has exited, so no reading is published
    /// after this returns. Calling it again is a no-op.
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.cancelled.store(true, Ordering::Release);
        // The loop may already have stopped on its own.
        let _ = worker.shutdown_tx.try_send(());
        if worker.thread_handle.join().is_err() {
            warn!("tracking loop thread panicked");
        }
        info!("tuner session closed");
    }
}

impl Drop for TrackerSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_loop<S: SignalSource>(
    tracker: &mut TrackingLoop<S>,
    interval: Duration,
    shutdown_rx: &Receiver<()>,
    cancelled: &AtomicBool,
    readings: &Sender<NoteReading>,
) {
    let ticker = crossbeam_channel::tick(interval);
    loop {
        crossbeam_channel::select! {
            recv(shutdown_rx) -> _ => {
                debug!("received shutdown signal");
                break;
            }
            recv(ticker) -> _ => {
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
                let Some(reading) = tracker.tick() else {
                    continue;
                };
                // Skip the send if close began during analysis. A close that
                // begins after this check joins this thread first, so the
                // send still lands before close returns.
                if cancelled.load(Ordering::Acquire) {
                    break;
                }
                if readings.send(reading).is_err() {
                    info!("reading consumer disconnected, stopping tracking loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::PitchClass;
    use crossbeam_channel::RecvTimeoutError;
    use std::collections::VecDeque;

    const SAMPLE_RATE: u32 = 44100;

    fn sine_window(freq: f32) -> Vec<f32> {
        (0..WINDOW_SIZE)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    /// Plays back scripted windows, then repeats a fallback window forever.
    struct ScriptedSource {
        script: VecDeque<Vec<f32>>,
        fallback: Vec<f32>,
        on_capture: Option<(Sender<()>, Duration)>,
    }

    impl ScriptedSource {
        fn steady(freq: f32) -> Self {
            Self {
                script: VecDeque::new(),
                fallback: sine_window(freq),
                on_capture: None,
            }
        }
    }

    impl SignalSource for ScriptedSource {
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn capture_window(&mut self) -> crate::SampleWindow {
            if let Some((notify, delay)) = &self.on_capture {
                let _ = notify.send(());
                thread::sleep(*delay);
            }
            let samples = self.script.pop_front().unwrap_or_else(|| self.fallback.clone());
            crate::SampleWindow::new(samples, SAMPLE_RATE)
        }
    }

    struct PanickingSource;

    impl SignalSource for PanickingSource {
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn capture_window(&mut self) -> crate::SampleWindow {
            panic!("device vanished");
        }
    }

    fn fast_config() -> TunerConfig {
        TunerConfig {
            tick_interval_ms: 1,
            ..TunerConfig::default()
        }
    }

    #[test]
    fn test_tick_end_to_end_a440() {
        let mut tracker = TrackingLoop::new(ScriptedSource::steady(440.0));
        let reading = tracker.tick().expect("440 Hz should be detected");

        assert!((reading.frequency_hz - 440.0).abs() < 2.0, "got {} Hz", reading.frequency_hz);
        assert_eq!(reading.pitch_class, PitchClass::A);
        assert_eq!(reading.octave, 4);
        assert!(reading.cents.abs() <= 5, "got {} cents", reading.cents);
    }

    #[test]
    fn test_no_pitch_keeps_previous_reading() {
        let mut source = ScriptedSource::steady(0.0);
        source.script.push_back(sine_window(220.0));
        source.fallback = vec![0.0; WINDOW_SIZE];

        let mut tracker = TrackingLoop::new(source);
        let first = tracker.tick().expect("220 Hz should be detected");
        assert_eq!(first.pitch_class, PitchClass::A);

        assert!(tracker.tick().is_none());
        assert_eq!(tracker.latest(), Some(&first));
    }

    #[test]
    fn test_fixed_target() {
        let target: Note = "G4".parse().unwrap();
        let mut tracker = TrackingLoop::new(ScriptedSource::steady(440.0)).with_target(Some(target));
        let reading = tracker.tick().unwrap();
        assert_eq!(reading.note(), target);
        assert!((199..=201).contains(&reading.cents), "got {} cents", reading.cents);
    }

    #[test]
    fn test_capture_fault_is_no_pitch() {
        let mut tracker = TrackingLoop::new(PanickingSource);
        assert!(tracker.tick().is_none());
        assert!(tracker.tick().is_none());
        assert!(tracker.latest().is_none());
    }

    #[test]
    fn test_session_publishes_and_reports_rate() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session =
            TrackerSession::start(&fast_config(), || Ok(ScriptedSource::steady(880.0)), tx).unwrap();

        assert_eq!(session.state(), LoopState::Active);
        assert_eq!(session.sample_rate(), SAMPLE_RATE);

        let reading = rx.recv_timeout(Duration::from_secs(5)).expect("a reading");
        assert_eq!(reading.pitch_class, PitchClass::A);
        assert_eq!(reading.octave, 5);

        session.close();
        assert_eq!(session.state(), LoopState::Idle);
    }

    #[test]
    fn test_no_reading_after_close() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session =
            TrackerSession::start(&fast_config(), || Ok(ScriptedSource::steady(440.0)), tx).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).expect("a reading");

        session.close();
        let _already_sent: Vec<_> = rx.try_iter().collect();

        // The loop thread, and with it the only sender, is gone.
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Disconnected)
        );
        // Closing twice is harmless.
        session.close();
    }

    #[test]
    fn test_tick_in_flight_at_close_does_not_publish() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (capture_tx, capture_rx) = crossbeam_channel::unbounded();

        let mut session = TrackerSession::start(
            &fast_config(),
            move || {
                let mut source = ScriptedSource::steady(440.0);
                source.on_capture = Some((capture_tx, Duration::from_millis(100)));
                Ok(source)
            },
            tx,
        )
        .unwrap();

        // The first capture is underway and has not published yet.
        capture_rx.recv_timeout(Duration::from_secs(5)).expect("a capture");
        session.close();

        assert_eq!(rx.try_iter().count(), 0);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_device_unavailable_never_starts_loop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let result = TrackerSession::start(
            &fast_config(),
            || -> Result<ScriptedSource> { Err(TunerError::device("permission denied")) },
            tx,
        );

        assert!(matches!(result, Err(TunerError::DeviceUnavailable(_))));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_drop_closes_session() {
        let (tx, rx) = crossbeam_channel::unbounded();
        {
            let _session =
                TrackerSession::start(&fast_config(), || Ok(ScriptedSource::steady(440.0)), tx).unwrap();
            rx.recv_timeout(Duration::from_secs(5)).expect("a reading");
        }
        let _already_sent: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_consumer_gone_stops_loop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session =
            TrackerSession::start(&fast_config(), || Ok(ScriptedSource::steady(440.0)), tx).unwrap();
        drop(rx);
        // Joins a loop that has already stopped, or stops it.
        session.close();
        assert!(!session.is_active());
    }
}
