use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bridge::{Sample, Track, TrackError};
use parking_lot::Mutex;

/// Counts what reaches it and logs a line every `log_every` samples.
pub struct StatsTrack {
    name: String,
    log_every: u64,
    samples: AtomicU64,
    bytes: AtomicU64,
    ticks: AtomicU64,
}

impl StatsTrack {
    pub fn new(name: &str, log_every: u64) -> Self {
        Self {
            name: name.to_string(),
            log_every: log_every.max(1),
            samples: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    /// (samples, bytes, clock ticks) received so far.
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.samples.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.ticks.load(Ordering::Relaxed),
        )
    }
}

impl Track for StatsTrack {
    fn write_sample(&self, sample: &Sample) -> Result<(), TrackError> {
        let count = self.samples.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes.fetch_add(sample.data.len() as u64, Ordering::Relaxed)
            + sample.data.len() as u64;
        let ticks = self.ticks.fetch_add(sample.samples as u64, Ordering::Relaxed)
            + sample.samples as u64;

        if count % self.log_every == 0 {
            tracing::info!(track = %self.name, samples = count, bytes, ticks, "track progress");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Appends raw encoded payloads to a file (e.g. an H.264 byte-stream dump).
pub struct FileTrack {
    name: String,
    writer: Mutex<BufWriter<File>>,
}

impl FileTrack {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            name: path.display().to_string(),
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }
}

impl Track for FileTrack {
    fn write_sample(&self, sample: &Sample) -> Result<(), TrackError> {
        self.writer
            .lock()
            .write_all(&sample.data)
            .map_err(|e| TrackError::Transport(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileTrack {
    fn drop(&mut self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!(track = %self.name, error = %e, "failed to flush output");
        }
    }
}
