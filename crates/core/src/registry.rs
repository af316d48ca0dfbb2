//! Registry of live pipeline sessions keyed by integer id.
//!
//! Every bridge owns its own registry; there is no process-wide table.
//! A single coarse lock covers insertion, lookup and removal. Lookups happen
//! once per encoded buffer, so nothing slow runs under it: lookups clone an
//! `Arc` out, and sessions are built between two short critical sections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::session::PipelineSession;

/// Identifier of a pipeline session. Assigned sequentially from 0.
pub type SessionId = u64;

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Arc<PipelineSession>>,
    /// Next id to hand out. Never decremented, so removed ids stay retired.
    next_id: SessionId,
}

/// Thread-safe map from [`SessionId`] to [`PipelineSession`].
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id, build a session for it and register the result.
    ///
    /// `build` runs without the registry lock held, so constructing a slow
    /// native pipeline never stalls delivery to other sessions. If it fails,
    /// nothing is registered and the reserved id is retired.
    pub fn insert_with<F>(&self, build: F) -> Result<Arc<PipelineSession>>
    where
        F: FnOnce(SessionId) -> Result<PipelineSession>,
    {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };

        let session = Arc::new(build(id).inspect_err(|e| {
            tracing::debug!(session_id = id, error = %e, "session build failed, id retired");
        })?);
        debug_assert_eq!(session.id(), id);

        let mut inner = self.inner.lock();
        inner.sessions.insert(id, session.clone());
        tracing::debug!(session_id = id, total_sessions = inner.sessions.len(), "session registered");
        Ok(session)
    }

    /// Look up a session by id. A miss is expected during teardown races.
    pub fn lookup(&self, id: SessionId) -> Option<Arc<PipelineSession>> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    /// Remove a session. Its id is never handed out again.
    pub fn remove(&self, id: SessionId) -> Option<Arc<PipelineSession>> {
        let mut inner = self.inner.lock();
        let removed = inner.sessions.remove(&id);
        if removed.is_some() {
            tracing::debug!(session_id = id, total_sessions = inner.sessions.len(), "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    /// Ids of all registered sessions, ascending.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.inner.lock().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::error::BridgeError;
    use crate::pipeline::MediaPipeline;
    use std::thread;

    struct Idle;

    impl MediaPipeline for Idle {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn register(registry: &PipelineRegistry) -> SessionId {
        registry
            .insert_with(|id| Ok(PipelineSession::new(id, Codec::Vp8, Vec::new(), Box::new(Idle))))
            .unwrap()
            .id()
    }

    #[test]
    fn sequential_ids() {
        let registry = PipelineRegistry::new();
        let ids: Vec<_> = (0..5).map(|_| register(&registry)).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn concurrent_inserts_get_distinct_ids() {
        let registry = PipelineRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || (0..25).map(|_| register(&registry)).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..200).collect::<Vec<_>>());
        assert_eq!(registry.ids(), ids);
    }

    #[test]
    fn lookup_unknown_id() {
        let registry = PipelineRegistry::new();
        register(&registry);
        assert!(registry.lookup(0).is_some());
        assert!(registry.lookup(42).is_none());
    }

    #[test]
    fn failed_build_registers_nothing() {
        let registry = PipelineRegistry::new();
        let err = registry
            .insert_with(|_| Err(BridgeError::PipelineConstruction("no element".into())))
            .unwrap_err();
        assert!(matches!(err, BridgeError::PipelineConstruction(_)));
        assert!(registry.is_empty());
        assert_eq!(register(&registry), 1);
    }

    #[test]
    fn build_runs_without_the_lock() {
        let registry = PipelineRegistry::new();
        register(&registry);

        let session = registry
            .insert_with(|id| {
                // Deadlocks if the registry lock is held while building.
                assert!(registry.lookup(0).is_some());
                assert!(registry.lookup(id).is_none());
                Ok(PipelineSession::new(id, Codec::Opus, Vec::new(), Box::new(Idle)))
            })
            .unwrap();
        assert_eq!(session.id(), 1);
        assert_eq!(registry.ids(), vec![0, 1]);
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let registry = PipelineRegistry::new();
        register(&registry);
        register(&registry);
        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.lookup(1).is_none());

        assert_eq!(register(&registry), 2);
        assert_eq!(registry.ids(), vec![0, 2]);
    }
}
