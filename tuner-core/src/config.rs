//! # Tuner Configuration
//!
//! Session-level settings for the tracking loop and its consumer.
//!
//! The analysis constants (window size, noise gate, trim threshold and
//! the A4 reference) are fixed in code and are not part of this file
//! format. Only the loop cadence, display smoothing and an optional fixed
//! target note can be changed.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::tuning::Note;

/// Default tick interval, roughly one 60 Hz display frame.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

/// Default number of readings averaged for the cent display.
pub const DEFAULT_SMOOTHING_FRAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Milliseconds between tracking loop ticks.
    pub tick_interval_ms: u64,
    /// Number of recent readings a display averages its cents over.
    pub smoothing_frames: usize,
    /// When set, readings are measured against this note instead of the
    /// nearest one.
    pub target: Option<Note>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            smoothing_frames: DEFAULT_SMOOTHING_FRAMES,
            target: None,
        }
    }
}

impl TunerConfig {
    /// The tick interval as a `Duration`. Never zero, so the ticker
    /// cannot spin.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Saves the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}
