//! # Cent Meter
//!
//! Text rendering of the tuning needle, with the same accuracy zones as a
//! graphical meter: in tune under 5 cents, close under 20, off beyond that.

use std::collections::VecDeque;
use tuner_core::{Note, NoteReading};

/// Maximum cent deviation range for the meter display.
/// The meter shows deviations from -50 to +50 cents.
const METER_RANGE: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    InTune,
    Close,
    Off,
}

impl Zone {
    pub fn marker(self) -> &'static str {
        match self {
            Zone::InTune => "ok",
            Zone::Close => "~",
            Zone::Off => "!!",
        }
    }
}

pub struct CentMeter {
    /// Current cent deviation (None if no pitch detected)
    cents: Option<f32>,
}

impl CentMeter {
    pub fn new(cents: Option<f32>) -> Self {
        Self { cents }
    }

    pub fn zone(&self) -> Option<Zone> {
        self.cents.map(|c| {
            if c.abs() < 5.0 {
                Zone::InTune
            } else if c.abs() < 20.0 {
                Zone::Close
            } else {
                Zone::Off
            }
        })
    }

    /// Draws the meter `width` cells wide: `|` marks the centre, `*` the needle.
    pub fn render(&self, width: usize) -> String {
        let width = width.max(3);
        let mut cells = vec!['-'; width];
        cells[width / 2] = '|';

        if let Some(c) = self.cents {
            let clamped = c.clamp(-METER_RANGE, METER_RANGE);
            let position = (clamped + METER_RANGE) / (2.0 * METER_RANGE) * (width - 1) as f32;
            cells[position.round() as usize] = '*';
        }

        cells.into_iter().collect()
    }
}

/// Moving average of the cents of the last few readings of one note.
pub struct CentSmoother {
    frames: usize,
    buffer: VecDeque<f32>,
    note: Option<Note>,
}

impl CentSmoother {
    pub fn new(frames: usize) -> Self {
        let frames = frames.max(1);
        Self {
            frames,
            buffer: VecDeque::with_capacity(frames),
            note: None,
        }
    }

    /// Adds a reading and returns the smoothed cents. A change of note
    /// starts the average over.
    pub fn push(&mut self, reading: &NoteReading) -> f32 {
        let note = reading.note();
        if self.note != Some(note) {
            self.buffer.clear();
            self.note = Some(note);
        }

        self.buffer.push_back(reading.cents as f32);
        if self.buffer.len() > self.frames {
            self.buffer.pop_front();
        }
        self.buffer.iter().sum::<f32>() / self.buffer.len() as f32
    }
}
