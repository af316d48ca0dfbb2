//! GStreamer backend for `media-bridge`.
//!
//! [`GstPipelineFactory`] builds pipelines with `gst::parse::launch` and
//! routes every buffer reaching the named `appsink` into the bridge:
//!
//! ```text
//! videotestsrc ! x264enc ... ! appsink name=appsink
//!                                  │ new-sample (streaming thread)
//!                                  ▼
//!                    BufferSink::deliver(bytes, duration, id)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge::{Bridge, Track};
//! use bridge_gst::GstPipelineFactory;
//!
//! # fn tracks() -> Vec<Arc<dyn Track>> { Vec::new() }
//! bridge_gst::init()?;
//! let bridge = Bridge::new(GstPipelineFactory::new());
//! let session = bridge.create_session("VP8", tracks(), "videotestsrc is-live=true")?;
//! session.start()?;
//! # Ok::<(), bridge::BridgeError>(())
//! ```

mod pipeline;

use std::sync::LazyLock;

use bridge::{BridgeError, Result};

pub use pipeline::{GstPipeline, GstPipelineFactory};

static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "mediabridge",
        gst::DebugColorFlags::empty(),
        Some("Media Bridge"),
    )
});

/// Initialise GStreamer. Safe to call more than once.
pub fn init() -> Result<()> {
    gst::init().map_err(|e| BridgeError::PipelineConstruction(format!("GStreamer init: {e}")))?;
    tracing::debug!(version = %gst::version_string(), "GStreamer initialised");
    Ok(())
}
