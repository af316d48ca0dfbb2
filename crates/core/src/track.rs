//! Track sink boundary and the optional bounded delivery queue.
//!
//! A [`Track`] is owned by the transport layer (e.g. a WebRTC local track).
//! Sessions hold shared handles and write one [`Sample`] per encoded buffer.
//!
//! By default writes happen synchronously on the pipeline's streaming
//! thread, so a slow track stalls the encoder. [`QueuedTrack`] decouples the
//! two with a bounded FIFO and a dedicated writer thread:
//!
//! ```text
//! streaming thread ──write_sample──▶ [ FIFO (capacity N) ] ──worker──▶ inner track
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::TrackError;

/// One encoded chunk annotated with its duration in codec clock ticks.
///
/// The payload is shared so that every track of a session sees the same
/// bytes without copying per track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Arc<[u8]>,
    pub samples: u32,
}

impl Sample {
    pub fn new(data: &[u8], samples: u32) -> Self {
        Self {
            data: Arc::from(data),
            samples,
        }
    }
}

/// Transport-side sink accepting timed samples for a remote peer.
pub trait Track: Send + Sync {
    /// Deliver one sample. Calls for the same track arrive in buffer order.
    fn write_sample(&self, sample: &Sample) -> Result<(), TrackError>;

    /// Identifier used in logs and errors.
    fn name(&self) -> &str;
}

/// What [`QueuedTrack`] does when its queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for the writer to free a slot.
    #[default]
    Block,
    /// Evict the oldest queued sample.
    DropOldest,
}

/// Bounded per-track queue settings.
#[derive(Debug, Clone)]
pub struct TrackQueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for TrackQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            overflow: OverflowPolicy::Block,
        }
    }
}

struct Queue {
    samples: VecDeque<Sample>,
    closed: bool,
    error: Option<TrackError>,
    dropped: u64,
    in_flight: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a sample is queued or the queue closes.
    filled: Condvar,
    /// Signalled when the worker takes or finishes a sample, or stops.
    drained: Condvar,
}

/// A [`Track`] wrapper that hands samples to a writer thread through a
/// bounded FIFO.
///
/// Order is preserved. A failed write on the worker is latched and returned
/// from the next [`write_sample`](Track::write_sample); after that the
/// queue rejects everything.
pub struct QueuedTrack {
    name: String,
    capacity: usize,
    overflow: OverflowPolicy,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedTrack {
    pub fn new(inner: Arc<dyn Track>, config: &TrackQueueConfig) -> Self {
        let name = inner.name().to_string();
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                samples: VecDeque::with_capacity(config.capacity),
                closed: false,
                error: None,
                dropped: 0,
                in_flight: false,
            }),
            filled: Condvar::new(),
            drained: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("track-{name}"))
            .spawn(move || drain(inner, worker_shared))
            .map_err(|e| tracing::error!(track = %name, error = %e, "failed to spawn track writer"))
            .ok();

        if worker.is_none() {
            shared.queue.lock().error = Some(TrackError::Closed);
        }

        tracing::debug!(
            track = %name,
            capacity = config.capacity,
            overflow = ?config.overflow,
            "track queue created"
        );

        Self {
            name,
            capacity: config.capacity.max(1),
            overflow: config.overflow,
            shared,
            worker,
        }
    }

    /// Samples evicted under [`OverflowPolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    /// Samples waiting for the writer.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().samples.len()
    }

    /// Block until every queued sample has been written to the inner track,
    /// or the writer has failed.
    pub fn flush(&self) {
        let mut queue = self.shared.queue.lock();
        while (!queue.samples.is_empty() || queue.in_flight) && queue.error.is_none() {
            self.shared.drained.wait(&mut queue);
        }
    }
}

impl Track for QueuedTrack {
    fn write_sample(&self, sample: &Sample) -> Result<(), TrackError> {
        let mut queue = self.shared.queue.lock();
        if let Some(err) = &queue.error {
            return Err(err.clone());
        }
        if queue.closed {
            return Err(TrackError::Closed);
        }

        while queue.samples.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::DropOldest => {
                    queue.samples.pop_front();
                    queue.dropped += 1;
                    tracing::warn!(track = %self.name, dropped = queue.dropped, "track queue full, dropped oldest sample");
                }
                OverflowPolicy::Block => {
                    self.shared.drained.wait(&mut queue);
                    if let Some(err) = &queue.error {
                        return Err(err.clone());
                    }
                }
            }
        }

        queue.samples.push_back(sample.clone());
        self.shared.filled.notify_one();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for QueuedTrack {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.filled.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Writer loop: pop in FIFO order until closed and empty, or until the
/// inner track fails.
fn drain(inner: Arc<dyn Track>, shared: Arc<Shared>) {
    loop {
        let sample = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(sample) = queue.samples.pop_front() {
                    queue.in_flight = true;
                    break sample;
                }
                if queue.closed {
                    return;
                }
                shared.filled.wait(&mut queue);
            }
        };
        shared.drained.notify_all();

        let result = inner.write_sample(&sample);

        let mut queue = shared.queue.lock();
        queue.in_flight = false;
        if let Err(e) = result {
            tracing::warn!(track = %inner.name(), error = %e, "queued track write failed");
            queue.error = Some(e);
            queue.samples.clear();
            shared.drained.notify_all();
            return;
        }
        shared.drained.notify_all();
    }
}
