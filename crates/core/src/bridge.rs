use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::RwLock;

use crate::codec::{self, Codec};
use crate::error::{BridgeError, Result, Transition};
use crate::pipeline::{self, PipelineFactory};
use crate::registry::{PipelineRegistry, SessionId};
use crate::session::{PipelineSession, SessionState};
use crate::track::{QueuedTrack, Sample, Track, TrackQueueConfig};

pub const DEFAULT_SINK_NAME: &str = "appsink";

/// Bridge-level configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Name of the sink element appended to every pipeline description.
    pub sink_name: String,
    /// When set, every track is wrapped in a bounded [`QueuedTrack`] so slow
    /// transports do not stall the pipeline's streaming thread.
    pub track_queue: Option<TrackQueueConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sink_name: DEFAULT_SINK_NAME.to_string(),
            track_queue: None,
        }
    }
}

/// Callback invoked once when a session fails.
pub type FailureHook = Box<dyn Fn(SessionId, &BridgeError) + Send + Sync>;

/// Result of handing one encoded buffer to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Written to `tracks` tracks with a duration of `samples` clock ticks.
    Delivered { tracks: usize, samples: u32 },
    /// No running session owns the buffer; it was dropped.
    Discarded,
}

struct Inner {
    registry: PipelineRegistry,
    factory: Box<dyn PipelineFactory>,
    config: BridgeConfig,
    failure_hooks: RwLock<Vec<FailureHook>>,
}

/// Routes encoded pipeline output onto media tracks.
///
/// Owns the session registry and a [`PipelineFactory`]. Cloning is cheap
/// and every clone shares the same sessions.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    pub fn new(factory: impl PipelineFactory + 'static) -> Self {
        Self::with_config(factory, BridgeConfig::default())
    }

    pub fn with_config(factory: impl PipelineFactory + 'static, config: BridgeConfig) -> Self {
        Self::with_registry(factory, PipelineRegistry::new(), config)
    }

    /// Create a bridge over an existing registry.
    pub fn with_registry(
        factory: impl PipelineFactory + 'static,
        registry: PipelineRegistry,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                factory: Box::new(factory),
                config,
                failure_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Register a callback for sessions torn down after a failure or an end
    /// of stream ([`BridgeError::EndOfStream`]).
    ///
    /// Hooks run on the thread that observed the failure, usually a
    /// pipeline streaming thread or bus watcher. They must not register
    /// further hooks.
    pub fn on_session_failed(&self, hook: impl Fn(SessionId, &BridgeError) + Send + Sync + 'static) {
        self.inner.failure_hooks.write().push(Box::new(hook));
    }

    /// Build a pipeline feeding `tracks` with `source` encoded as `codec_name`
    /// and register it.
    ///
    /// The session is created stopped; call [`SessionHandle::start`] to begin
    /// delivery. Unknown codecs and malformed descriptions fail here and
    /// leave nothing registered.
    pub fn create_session(
        &self,
        codec_name: &str,
        tracks: Vec<Arc<dyn Track>>,
        source: &str,
    ) -> Result<SessionHandle> {
        let (codec, profile) = codec::resolve(codec_name)?;
        let config = &self.inner.config;

        if tracks.is_empty() {
            tracing::warn!(%codec, "creating session without tracks");
        }

        let tracks = match &config.track_queue {
            Some(queue) => tracks
                .into_iter()
                .map(|track| Arc::new(QueuedTrack::new(track, queue)) as Arc<dyn Track>)
                .collect(),
            None => tracks,
        };

        let description = pipeline::describe(source, profile, &config.sink_name);

        let session = self.inner.registry.insert_with(|id| {
            let sink = BufferSink {
                id,
                bridge: Arc::downgrade(&self.inner),
            };
            let native = self
                .inner
                .factory
                .create(&description, &config.sink_name, sink)?;
            Ok(PipelineSession::new(id, codec, tracks, native))
        })?;

        tracing::info!(
            session_id = session.id(),
            %codec,
            tracks = session.tracks().len(),
            pipeline = %description,
            "session created"
        );

        Ok(SessionHandle {
            session,
            bridge: self.clone(),
        })
    }

    /// Deliver one encoded buffer produced by pipeline `pipeline_id`.
    ///
    /// Buffers for unknown or non-running sessions are discarded. A track
    /// write failure fails and unregisters the owning session, releases its
    /// pipeline in the background and is returned so the native pipeline can
    /// halt; other sessions carry on.
    pub fn on_buffer(
        &self,
        payload: &[u8],
        duration_nanos: u64,
        pipeline_id: SessionId,
    ) -> Result<BufferOutcome> {
        self.inner.on_buffer(payload, duration_nanos, pipeline_id)
    }
}

impl Inner {
    fn on_buffer(
        &self,
        payload: &[u8],
        duration_nanos: u64,
        id: SessionId,
    ) -> Result<BufferOutcome> {
        let Some(session) = self.registry.lookup(id) else {
            tracing::debug!(session_id = id, "discarding buffer, no pipeline with id");
            return Ok(BufferOutcome::Discarded);
        };
        if !session.is_running() {
            tracing::debug!(session_id = id, state = ?session.state(), "discarding buffer, session not running");
            return Ok(BufferOutcome::Discarded);
        }

        let samples = session.profile().samples_for(duration_nanos);
        let sample = Sample::new(payload, samples);

        for track in session.tracks() {
            if let Err(source) = track.write_sample(&sample) {
                let err = BridgeError::TrackWrite {
                    id,
                    track: track.name().to_string(),
                    source,
                };
                self.fail(&session, &err);
                return Err(err);
            }
        }

        tracing::trace!(
            session_id = id,
            bytes = payload.len(),
            samples,
            "buffer delivered"
        );

        Ok(BufferOutcome::Delivered {
            tracks: session.tracks().len(),
            samples,
        })
    }

    fn fail(&self, session: &Arc<PipelineSession>, err: &BridgeError) {
        if !session.fail(err.to_string()) {
            return;
        }
        self.registry.remove(session.id());
        match err {
            BridgeError::EndOfStream { .. } => {
                tracing::info!(session_id = session.id(), "session reached end of stream")
            }
            _ => tracing::error!(session_id = session.id(), error = %err, "session failed"),
        }

        release(session.clone());

        for hook in self.failure_hooks.read().iter() {
            hook(session.id(), err);
        }
    }
}

/// Stop a torn-down session's pipeline on its own thread.
///
/// Failures are observed on the pipeline's streaming thread or bus watcher,
/// and a native stop joins both, so it cannot run there.
fn release(session: Arc<PipelineSession>) {
    let id = session.id();
    let spawned = thread::Builder::new()
        .name(format!("teardown-{id}"))
        .spawn(move || match session.stop_pipeline() {
            Ok(()) => tracing::debug!(session_id = id, "pipeline released"),
            Err(e) => tracing::warn!(session_id = id, error = %e, "failed to release pipeline"),
        });

    if let Err(e) = spawned {
        tracing::error!(session_id = id, error = %e, "failed to spawn teardown thread");
    }
}

/// Delivery endpoint handed to a native pipeline at construction.
///
/// Carries the session id so every buffer is routed to its owner. Holds
/// only a weak reference to the bridge; once the bridge is gone, buffers
/// are discarded.
#[derive(Clone)]
pub struct BufferSink {
    id: SessionId,
    bridge: Weak<Inner>,
}

impl BufferSink {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Hand one encoded chunk to the bridge. Called from the pipeline's
    /// streaming thread.
    pub fn deliver(&self, payload: &[u8], duration_nanos: u64) -> Result<BufferOutcome> {
        match self.bridge.upgrade() {
            Some(bridge) => bridge.on_buffer(payload, duration_nanos, self.id),
            None => Ok(BufferOutcome::Discarded),
        }
    }

    /// Report an asynchronous pipeline error. The session is failed and
    /// unregistered as if a track write had failed.
    pub fn report_error(&self, reason: &str) {
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };
        if let Some(session) = bridge.registry.lookup(self.id) {
            let err = BridgeError::Pipeline {
                id: self.id,
                reason: reason.to_string(),
            };
            bridge.fail(&session, &err);
        }
    }

    /// Report that the pipeline drained its source. The session is torn down
    /// like a failed one and hooks receive [`BridgeError::EndOfStream`].
    pub fn report_end_of_stream(&self) {
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };
        if let Some(session) = bridge.registry.lookup(self.id) {
            bridge.fail(&session, &BridgeError::EndOfStream { id: self.id });
        }
    }
}

/// Owner's handle on a created session.
///
/// `start` and `stop` on the same handle must not race. Dropping the handle
/// does not stop the pipeline.
pub struct SessionHandle {
    session: Arc<PipelineSession>,
    bridge: Bridge,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn codec(&self) -> Codec {
        self.session.codec()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Why the session failed, if it did.
    pub fn failure(&self) -> Option<String> {
        self.session.failure()
    }

    /// Start the native pipeline. Buffers may be delivered concurrently
    /// from the moment this is called until [`stop`](Self::stop) returns.
    pub fn start(&self) -> Result<()> {
        let id = self.id();
        match self.session.state() {
            SessionState::Running => return Ok(()),
            state @ (SessionState::Stopped | SessionState::Failed) => {
                return Err(BridgeError::SessionUnavailable { id, state });
            }
            SessionState::Created => {}
        }

        // Running must be visible before the first buffer can arrive.
        self.session.set_state(SessionState::Running);
        if let Err(e) = self.session.start_pipeline() {
            let err = match e {
                err @ BridgeError::StateChange { .. } => err,
                other => BridgeError::StateChange {
                    id,
                    target: Transition::Start,
                    reason: other.to_string(),
                },
            };
            self.bridge.inner.fail(&self.session, &err);
            return Err(err);
        }

        tracing::info!(session_id = id, codec = %self.codec(), "session started");
        Ok(())
    }

    /// Stop the native pipeline and unregister the session.
    ///
    /// The registry entry is removed first, so once this returns no new
    /// buffer for this session reaches a track. Stopping twice is a no-op.
    /// A failed session keeps its `Failed` state; stopping it waits for the
    /// native pipeline to be released.
    pub fn stop(&self) -> Result<()> {
        let id = self.id();
        if !self.session.mark_stopped() {
            return Ok(());
        }
        self.bridge.registry().remove(id);

        self.session.stop_pipeline().map_err(|e| {
            tracing::error!(session_id = id, error = %e, "pipeline failed to stop");
            match e {
                err @ BridgeError::StateChange { .. } => err,
                other => BridgeError::StateChange {
                    id,
                    target: Transition::Stop,
                    reason: other.to_string(),
                },
            }
        })?;

        tracing::info!(session_id = id, "session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackError;
    use crate::pipeline::MediaPipeline;
    use parking_lot::Mutex;

    struct Idle;

    impl MediaPipeline for Idle {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Records descriptions and keeps each sink for the test to drive.
    #[derive(Default)]
    struct Capture {
        descriptions: Arc<Mutex<Vec<String>>>,
        sinks: Arc<Mutex<Vec<BufferSink>>>,
    }

    impl PipelineFactory for Capture {
        fn create(
            &self,
            description: &str,
            _sink_name: &str,
            sink: BufferSink,
        ) -> Result<Box<dyn MediaPipeline>> {
            self.descriptions.lock().push(description.to_string());
            self.sinks.lock().push(sink);
            Ok(Box::new(Idle))
        }
    }

    struct Counting(Mutex<usize>);

    impl Track for Counting {
        fn write_sample(&self, _sample: &Sample) -> std::result::Result<(), TrackError> {
            *self.0.lock() += 1;
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn description_uses_configured_sink_name() {
        let factory = Capture::default();
        let descriptions = factory.descriptions.clone();
        let bridge = Bridge::with_config(
            factory,
            BridgeConfig {
                sink_name: "out".into(),
                track_queue: None,
            },
        );

        bridge.create_session("Opus", Vec::new(), "audiotestsrc").unwrap();
        assert_eq!(
            descriptions.lock()[0],
            "audiotestsrc ! opusenc ! appsink name=out"
        );
    }

    #[test]
    fn sink_carries_session_id() {
        let factory = Capture::default();
        let sinks = factory.sinks.clone();
        let bridge = Bridge::new(factory);

        let a = bridge.create_session("VP8", Vec::new(), "videotestsrc").unwrap();
        let b = bridge.create_session("VP9", Vec::new(), "videotestsrc").unwrap();

        let ids: Vec<_> = sinks.lock().iter().map(BufferSink::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn buffers_before_start_are_discarded() {
        let factory = Capture::default();
        let sinks = factory.sinks.clone();
        let bridge = Bridge::new(factory);
        let track = Arc::new(Counting(Mutex::new(0)));

        let session = bridge
            .create_session("H264", vec![track.clone()], "videotestsrc")
            .unwrap();
        let sink = sinks.lock()[0].clone();

        assert_eq!(sink.deliver(b"early", 0).unwrap(), BufferOutcome::Discarded);
        session.start().unwrap();
        assert!(matches!(
            sink.deliver(b"frame", 16_000_000).unwrap(),
            BufferOutcome::Delivered { tracks: 1, samples: 1440 }
        ));
        assert_eq!(*track.0.lock(), 1);
    }

    #[test]
    fn sink_outliving_bridge_discards() {
        let factory = Capture::default();
        let sinks = factory.sinks.clone();
        let bridge = Bridge::new(factory);
        let session = bridge.create_session("VP8", Vec::new(), "videotestsrc").unwrap();
        session.start().unwrap();
        let sink = sinks.lock()[0].clone();

        drop(session);
        drop(bridge);
        assert_eq!(sink.deliver(b"late", 0).unwrap(), BufferOutcome::Discarded);
    }

    #[test]
    fn report_error_fails_session() {
        let factory = Capture::default();
        let sinks = factory.sinks.clone();
        let bridge = Bridge::new(factory);
        let session = bridge.create_session("VP8", Vec::new(), "videotestsrc").unwrap();
        session.start().unwrap();

        sinks.lock()[0].report_error("internal data stream error");

        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.failure().unwrap().contains("internal data stream error"));
        assert!(bridge.registry().lookup(session.id()).is_none());
        assert!(matches!(
            session.start(),
            Err(BridgeError::SessionUnavailable { .. })
        ));
    }

    #[test]
    fn end_of_stream_notifies_owner_once() {
        let factory = Capture::default();
        let sinks = factory.sinks.clone();
        let bridge = Bridge::new(factory);
        let ended = Arc::new(Mutex::new(Vec::new()));
        let seen = ended.clone();
        bridge.on_session_failed(move |id, err| {
            seen.lock().push((id, matches!(err, BridgeError::EndOfStream { .. })));
        });

        let session = bridge.create_session("Opus", Vec::new(), "audiotestsrc").unwrap();
        session.start().unwrap();
        let sink = sinks.lock()[0].clone();

        sink.report_end_of_stream();
        sink.report_end_of_stream();

        assert_eq!(*ended.lock(), vec![(session.id(), true)]);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(bridge.registry().is_empty());
        assert_eq!(sink.deliver(b"late", 20_000_000).unwrap(), BufferOutcome::Discarded);
        session.stop().unwrap();
    }
}
