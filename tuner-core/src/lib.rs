// tuner-core/src/lib.rs

//! The core logic for the real-time instrument tuner.
//! This crate is responsible for audio capture, pitch detection,
//! note mapping and the tracking loop that ties them together. It is
//! completely headless and contains no display code.
//!
//! ```no_run
//! use tuner_core::{TrackerSession, TunerConfig};
//!
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let mut session = TrackerSession::open_microphone(&TunerConfig::default(), tx)?;
//! if let Ok(reading) = rx.recv() {
//!     println!("{}{} {:+} cents", reading.pitch_class, reading.octave, reading.cents);
//! }
//! session.close();
//! # Ok::<(), tuner_core::TunerError>(())
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod pitch;
pub mod tracker;
pub mod tuning;

pub use audio::{MicrophoneSource, SampleWindow, SignalSource, WINDOW_SIZE};
pub use config::TunerConfig;
pub use error::{Result, TunerError};
pub use pitch::{PitchEstimate, PitchEstimator};
pub use tracker::{LoopState, TrackerSession, TrackingLoop};
pub use tuning::{Note, NoteReading, ParseNoteError, PitchClass};
