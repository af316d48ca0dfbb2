//! Native pipeline boundary.
//!
//! The bridge never builds media graphs element by element. It assembles a
//! textual description and hands it to a [`PipelineFactory`]:
//!
//! ```text
//! <source description> ! <codec encoder fragment> ! appsink name=<sink name>
//! ```
//!
//! The factory wires the named sink so that every encoded chunk reaches the
//! [`BufferSink`] it was given, tagged with the session id. The GStreamer
//! implementation lives in the `media-bridge-gst` crate.

use crate::bridge::BufferSink;
use crate::codec::CodecProfile;
use crate::error::Result;

/// A running (or runnable) native pipeline, owned by exactly one session.
pub trait MediaPipeline: Send {
    /// Transition to the playing state. Buffers may arrive on other threads
    /// as soon as this is called.
    fn start(&mut self) -> Result<()>;

    /// Transition to the stopped state and release native resources.
    ///
    /// When this returns, no further buffers are delivered; a delivery
    /// already in progress may still complete. May be called again on a
    /// stopped pipeline, and from a thread other than the one that started it.
    fn stop(&mut self) -> Result<()>;
}

/// Builds native pipelines from a textual description.
pub trait PipelineFactory: Send + Sync {
    /// Construct a pipeline whose element named `sink_name` feeds `sink`.
    /// Runs concurrently with delivery for other sessions.
    ///
    /// A malformed description or a missing sink element yields
    /// [`BridgeError::PipelineConstruction`](crate::BridgeError::PipelineConstruction).
    fn create(
        &self,
        description: &str,
        sink_name: &str,
        sink: BufferSink,
    ) -> Result<Box<dyn MediaPipeline>>;
}

/// Full pipeline description for a source feeding the given codec.
pub fn describe(source: &str, profile: &CodecProfile, sink_name: &str) -> String {
    format!(
        "{} ! {} ! appsink name={}",
        source.trim(),
        profile.encoder,
        sink_name
    )
}
