//! Per-pipeline session state.
//!
//! A session ties one native pipeline to the tracks it feeds.
//!
//! ## Session lifecycle
//!
//! ```text
//! create_session -> Created
//! start          -> Running
//! stop           -> Stopped   (registry entry removed)
//! track failure  -> Failed    (registry entry removed, pipeline released,
//!                              owner notified)
//! end of stream  -> Failed    (same as a failure)
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec::{Codec, CodecProfile};
use crate::error::Result;
use crate::pipeline::MediaPipeline;
use crate::registry::SessionId;
use crate::track::Track;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Pipeline built and registered, not yet producing buffers.
    Created,
    /// Buffers are being delivered to tracks.
    Running,
    /// Stopped by its owner.
    Stopped,
    /// Torn down after a delivery or pipeline error.
    Failed,
}

/// Bridge-side state for one native pipeline.
///
/// Shared between the registry, the owner's [`SessionHandle`](crate::SessionHandle)
/// and in-flight buffer deliveries. The native pipeline sits behind a mutex
/// so lifecycle transitions never overlap.
pub struct PipelineSession {
    id: SessionId,
    codec: Codec,
    tracks: Vec<Arc<dyn Track>>,
    pipeline: Mutex<Box<dyn MediaPipeline>>,
    state: RwLock<SessionState>,
    failure: RwLock<Option<String>>,
}

impl PipelineSession {
    pub fn new(
        id: SessionId,
        codec: Codec,
        tracks: Vec<Arc<dyn Track>>,
        pipeline: Box<dyn MediaPipeline>,
    ) -> Self {
        Self {
            id,
            codec,
            tracks,
            pipeline: Mutex::new(pipeline),
            state: RwLock::new(SessionState::Created),
            failure: RwLock::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn profile(&self) -> &'static CodecProfile {
        self.codec.profile()
    }

    pub fn tracks(&self) -> &[Arc<dyn Track>] {
        &self.tracks
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        *self.state.read() == SessionState::Running
    }

    /// Reason recorded when the session failed.
    pub fn failure(&self) -> Option<String> {
        self.failure.read().clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        tracing::debug!(session_id = self.id, old_state = ?*current, new_state = ?state, "state transition");
        *current = state;
    }

    /// Mark the session failed. Returns `false` if it had already failed or
    /// stopped, so teardown and notification happen once.
    pub(crate) fn fail(&self, reason: String) -> bool {
        let mut state = self.state.write();
        if matches!(*state, SessionState::Failed | SessionState::Stopped) {
            return false;
        }
        tracing::debug!(session_id = self.id, old_state = ?*state, new_state = ?SessionState::Failed, "state transition");
        *state = SessionState::Failed;
        *self.failure.write() = Some(reason);
        true
    }

    /// Mark the session stopped by its owner, in one step against concurrent
    /// failure. A failed session keeps `Failed`. Returns `false` if it was
    /// already stopped.
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            SessionState::Stopped => false,
            SessionState::Failed => true,
            SessionState::Created | SessionState::Running => {
                tracing::debug!(session_id = self.id, old_state = ?*state, new_state = ?SessionState::Stopped, "state transition");
                *state = SessionState::Stopped;
                true
            }
        }
    }

    pub(crate) fn start_pipeline(&self) -> Result<()> {
        self.pipeline.lock().start()
    }

    pub(crate) fn stop_pipeline(&self) -> Result<()> {
        self.pipeline.lock().stop()
    }
}

impl fmt::Debug for PipelineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSession")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl MediaPipeline for Idle {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> PipelineSession {
        PipelineSession::new(3, Codec::Opus, Vec::new(), Box::new(Idle))
    }

    #[test]
    fn stop_keeps_failure() {
        let session = session();
        session.set_state(SessionState::Running);
        assert!(session.fail("peer gone".into()));

        assert!(session.mark_stopped());
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.failure().as_deref(), Some("peer gone"));
    }

    #[test]
    fn stop_then_fail() {
        let session = session();
        session.set_state(SessionState::Running);

        assert!(session.mark_stopped());
        assert!(!session.mark_stopped());
        assert!(!session.fail("too late".into()));
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.failure().is_none());
    }
}
