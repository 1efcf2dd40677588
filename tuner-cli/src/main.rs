//! # Tuner - terminal front-end
//!
//! Opens a tuner session on the default microphone and prints every
//! published reading until Enter is pressed.
//!
//! ## Architecture
//! - **Main Thread**: renders readings as a single refreshing status line,
//!   or as JSON lines with `--json`
//! - **Loop Thread**: owned by `TrackerSession`, ticks at the configured rate
//! - **Input Thread**: waits for Enter on stdin
//! - **Communication**: crossbeam channels for readings and the quit signal

mod cent_meter;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tuner_core::tuning::DISPLAY_CENTS_RANGE;
use tuner_core::{Note, NoteReading, TrackerSession, TunerConfig, TunerError};

use cent_meter::{CentMeter, CentSmoother};

/// Width of the text cent meter, in cells.
const METER_WIDTH: usize = 41;

/// Real-time tuner: prints the detected note and its cent deviation.
#[derive(Debug, Parser, PartialEq)]
#[command(name = "tuner")]
#[command(after_help = "Press Enter to stop.")]
struct Options {
    /// print each reading as a JSON line
    #[arg(long)]
    json: bool,

    /// measure against a fixed note, e.g. A4, C#3, Bb2
    #[arg(long, value_name = "NOTE")]
    target: Option<Note>,

    /// load session settings from a JSON file
    #[arg(long = "config", value_name = "FILE")]
    config_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Logs go to stderr so the display on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let options = Options::parse();

    let mut config = match &options.config_path {
        Some(path) => TunerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TunerConfig::default(),
    };
    if options.target.is_some() {
        config.target = options.target;
    }

    let (reading_tx, reading_rx) = crossbeam_channel::unbounded::<NoteReading>();
    let mut session = match TrackerSession::open_microphone(&config, reading_tx) {
        Ok(session) => session,
        Err(e @ TunerError::DeviceUnavailable(_)) => {
            return Err(anyhow::Error::new(e)
                .context("microphone not available; check the device and permissions, then run again"));
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        sample_rate = session.sample_rate(),
        target = ?config.target.map(|n| n.to_string()),
        "listening, press Enter to stop"
    );

    let mut quit_rx = spawn_enter_listener();
    let mut display = Display::new(options.json, config.smoothing_frames);

    loop {
        let mut stdin_closed = false;
        crossbeam_channel::select! {
            recv(reading_rx) -> msg => match msg {
                Ok(reading) => display.show(&reading)?,
                Err(_) => break,
            },
            recv(quit_rx) -> msg => match msg {
                Ok(()) => break,
                Err(_) => stdin_closed = true,
            },
        }
        // stdin closed without a line: keep running until interrupted.
        if stdin_closed {
            quit_rx = crossbeam_channel::never();
        }
    }

    session.close();
    display.finish()?;
    Ok(())
}

/// Signals once a line has been read from stdin.
fn spawn_enter_listener() -> crossbeam_channel::Receiver<()> {
    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = io::stdin().read_line(&mut line) {
            if n > 0 {
                let _ = quit_tx.send(());
            }
        }
    });
    quit_rx
}

struct Display {
    json: bool,
    smoother: CentSmoother,
    stdout: io::Stdout,
}

impl Display {
    fn new(json: bool, smoothing_frames: usize) -> Self {
        Self {
            json,
            smoother: CentSmoother::new(smoothing_frames),
            stdout: io::stdout(),
        }
    }

    fn show(&mut self, reading: &NoteReading) -> Result<()> {
        let mut out = self.stdout.lock();
        if self.json {
            writeln!(out, "{}", serde_json::to_string(reading)?)?;
        } else {
            let smoothed = self.smoother.push(reading);
            write!(out, "\r{}", status_line(reading, smoothed))?;
        }
        out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.json {
            writeln!(self.stdout)?;
        }
        Ok(())
    }
}

fn status_line(reading: &NoteReading, smoothed_cents: f32) -> String {
    let meter = CentMeter::new(Some(smoothed_cents));
    let marker = meter.zone().map_or("", |z| z.marker());
    let range = DISPLAY_CENTS_RANGE as f32;
    format!(
        "{:<4} {:>8.2} Hz {:>+4} cents [{}] {:<2}",
        reading.note().to_string(),
        reading.frequency_hz,
        smoothed_cents.clamp(-range, range).round() as i32,
        meter.render(METER_WIDTH),
        marker
    )
}
