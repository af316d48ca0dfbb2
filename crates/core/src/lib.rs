//! Bridge encoded output of native media pipelines onto real-time tracks.
//!
//! ```text
//! create_session ──▶ PipelineRegistry ◀── lookup ── on_buffer ──▶ Track × N
//!       │                                              ▲
//!       └──▶ PipelineFactory ──▶ MediaPipeline ── BufferSink (per chunk)
//! ```
//!
//! - [`codec`]: encoder fragment and clock rate per codec.
//! - [`registry`]: id → session map shared by lifecycle and delivery.
//! - [`bridge`]: session lifecycle and the buffer-arrival path.
//! - [`pipeline`]: native pipeline traits (GStreamer lives in `media-bridge-gst`).
//! - [`track`]: transport sink trait and the bounded [`QueuedTrack`].

pub mod bridge;
pub mod codec;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod track;

pub use bridge::{Bridge, BridgeConfig, BufferOutcome, BufferSink, SessionHandle};
pub use codec::{Codec, CodecProfile};
pub use error::{BridgeError, Result, TrackError, Transition};
pub use pipeline::{MediaPipeline, PipelineFactory};
pub use registry::{PipelineRegistry, SessionId};
pub use session::{PipelineSession, SessionState};
pub use track::{OverflowPolicy, QueuedTrack, Sample, Track, TrackQueueConfig};
