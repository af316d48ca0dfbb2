//! Error types for the media bridge.

use std::fmt;

use crate::registry::SessionId;
use crate::session::SessionState;

/// Errors that can occur while bridging pipeline output onto tracks.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`UnknownCodec`](Self::UnknownCodec),
///   [`PipelineConstruction`](Self::PipelineConstruction) — fatal at
///   session creation, never retried.
/// - **Lifecycle**: [`StateChange`](Self::StateChange),
///   [`SessionUnavailable`](Self::SessionUnavailable).
/// - **Delivery**: [`TrackWrite`](Self::TrackWrite),
///   [`Pipeline`](Self::Pipeline), [`EndOfStream`](Self::EndOfStream) — the
///   owning session is failed and torn down; other sessions are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Codec identifier is not one of `VP8`, `VP9`, `H264`, `Opus`, `G722`.
    #[error("unhandled codec: {0}")]
    UnknownCodec(String),

    /// The native pipeline could not be built from its description.
    #[error("pipeline construction failed: {0}")]
    PipelineConstruction(String),

    /// The native pipeline refused a start or stop transition.
    #[error("session {id}: transition to {target} failed: {reason}")]
    StateChange {
        id: SessionId,
        target: Transition,
        reason: String,
    },

    /// Start was requested on a session that already stopped or failed.
    #[error("session {id} is {state:?}")]
    SessionUnavailable { id: SessionId, state: SessionState },

    /// Writing a sample to one of the session's tracks failed.
    #[error("session {id}: write to track {track} failed: {source}")]
    TrackWrite {
        id: SessionId,
        track: String,
        #[source]
        source: TrackError,
    },

    /// The native pipeline reported an asynchronous error.
    #[error("session {id}: pipeline error: {reason}")]
    Pipeline { id: SessionId, reason: String },

    /// The native pipeline ran out of input before its owner stopped it.
    #[error("session {id}: end of stream")]
    EndOfStream { id: SessionId },
}

/// Lifecycle transition attempted on a native pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "running"),
            Self::Stop => write!(f, "stopped"),
        }
    }
}

/// Failure reported by a [`Track`](crate::track::Track) sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    /// The track no longer accepts samples.
    #[error("track closed")]
    Closed,

    /// The transport behind the track rejected the sample.
    #[error("{0}")]
    Transport(String),
}

/// Convenience alias for `Result<T, BridgeError>`.
pub type Result<T> = std::result::Result<T, BridgeError>;
