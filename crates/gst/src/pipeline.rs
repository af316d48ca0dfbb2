use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use gst::prelude::*;

use bridge::{
    BridgeError, BufferSink, MediaPipeline, PipelineFactory, Result, SessionId, Transition,
};

use crate::CAT;

/// Poll interval of the bus watcher, so `stop` can end it promptly.
const BUS_POLL_MS: u64 = 100;

/// Builds [`GstPipeline`]s from `gst-launch` style descriptions.
#[derive(Debug, Default, Clone, Copy)]
pub struct GstPipelineFactory;

impl GstPipelineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineFactory for GstPipelineFactory {
    fn create(
        &self,
        description: &str,
        sink_name: &str,
        sink: BufferSink,
    ) -> Result<Box<dyn MediaPipeline>> {
        Ok(Box::new(GstPipeline::launch(description, sink_name, sink)?))
    }
}

/// A parsed GStreamer pipeline whose `appsink` feeds one bridge session.
///
/// While playing, a watcher thread pops `Error`/`Eos` messages off the bus
/// and reports them to the bridge, which tears the session down and
/// notifies its owner.
pub struct GstPipeline {
    id: SessionId,
    pipeline: gst::Pipeline,
    sink: BufferSink,
    watching: Arc<AtomicBool>,
    bus_watch: Option<JoinHandle<()>>,
}

impl GstPipeline {
    /// Parse `description` and attach the bridge to the appsink named
    /// `sink_name`.
    pub fn launch(description: &str, sink_name: &str, sink: BufferSink) -> Result<Self> {
        let id = sink.id();

        let pipeline = gst::parse::launch(description)
            .map_err(|e| BridgeError::PipelineConstruction(format!("{e}: {description}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| {
                BridgeError::PipelineConstruction(format!(
                    "description is a single element, not a pipeline: {description}"
                ))
            })?;

        let appsink = pipeline
            .by_name(sink_name)
            .ok_or_else(|| {
                BridgeError::PipelineConstruction(format!("no element named {sink_name}"))
            })?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| {
                BridgeError::PipelineConstruction(format!("{sink_name} is not an appsink"))
            })?;

        let delivery = sink.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| render(appsink, &delivery))
                .build(),
        );

        gst::debug!(CAT, obj = &pipeline, "session {} pipeline constructed", id);

        Ok(Self {
            id,
            pipeline,
            sink,
            watching: Arc::new(AtomicBool::new(false)),
            bus_watch: None,
        })
    }

    fn state_error(&self, target: Transition, err: gst::StateChangeError) -> BridgeError {
        BridgeError::StateChange {
            id: self.id,
            target,
            reason: err.to_string(),
        }
    }

    fn spawn_bus_watch(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };

        self.watching.store(true, Ordering::SeqCst);
        let watching = self.watching.clone();
        let sink = self.sink.clone();

        match thread::Builder::new()
            .name(format!("bus-{}", self.id))
            .spawn(move || watch_bus(bus, sink, watching))
        {
            Ok(handle) => self.bus_watch = Some(handle),
            Err(e) => tracing::warn!(session_id = self.id, error = %e, "failed to spawn bus watcher"),
        }
    }

    fn stop_bus_watch(&mut self) {
        self.watching.store(false, Ordering::SeqCst);
        if let Some(handle) = self.bus_watch.take() {
            // A failure hook may stop the session from the watcher itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl MediaPipeline for GstPipeline {
    fn start(&mut self) -> Result<()> {
        if let Err(e) = self.pipeline.set_state(gst::State::Playing) {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(self.state_error(Transition::Start, e));
        }
        self.spawn_bus_watch();

        gst::info!(CAT, obj = &self.pipeline, "session {} playing", self.id);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_bus_watch();

        // NULL joins the streaming threads: no appsink callback runs after this.
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| self.state_error(Transition::Stop, e))?;

        gst::info!(CAT, obj = &self.pipeline, "session {} stopped", self.id);
        Ok(())
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        self.stop_bus_watch();
        if self.pipeline.current_state() != gst::State::Null {
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

/// appsink `new-sample` handler, run on the pipeline's streaming thread.
fn render(
    appsink: &gst_app::AppSink,
    sink: &BufferSink,
) -> std::result::Result<gst::FlowSuccess, gst::FlowError> {
    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;

    let buffer = sample.buffer().ok_or_else(|| {
        gst::error!(CAT, obj = appsink, "Sample without buffer");
        gst::FlowError::Error
    })?;

    let map = buffer.map_readable().map_err(|_| {
        gst::error!(CAT, obj = appsink, "Failed to map buffer readable");
        gst::FlowError::Error
    })?;

    let duration = buffer.duration().map(|d| d.nseconds()).unwrap_or(0);

    match sink.deliver(map.as_slice(), duration) {
        Ok(_) => Ok(gst::FlowSuccess::Ok),
        Err(e) => {
            gst::error!(CAT, obj = appsink, "{}", e);
            Err(gst::FlowError::Error)
        }
    }
}

fn watch_bus(bus: gst::Bus, sink: BufferSink, watching: Arc<AtomicBool>) {
    let interval = gst::ClockTime::from_mseconds(BUS_POLL_MS);

    while watching.load(Ordering::SeqCst) {
        let Some(message) = bus.timed_pop_filtered(
            interval,
            &[gst::MessageType::Error, gst::MessageType::Eos],
        ) else {
            continue;
        };

        match message.view() {
            gst::MessageView::Error(err) => {
                let reason = match err.debug() {
                    Some(debug) => format!("{} ({})", err.error(), debug),
                    None => err.error().to_string(),
                };
                tracing::error!(session_id = sink.id(), %reason, "pipeline error");
                sink.report_error(&reason);
                break;
            }
            gst::MessageView::Eos(_) => {
                tracing::info!(session_id = sink.id(), "end of stream");
                sink.report_end_of_stream();
                break;
            }
            _ => {}
        }
    }

    tracing::debug!(session_id = sink.id(), "bus watcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use bridge::{Bridge, Sample, Track, TrackError};

    struct Recording(Mutex<Vec<Sample>>);

    impl Track for Recording {
        fn write_sample(&self, sample: &Sample) -> std::result::Result<(), TrackError> {
            self.0.lock().unwrap().push(sample.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn malformed_description_is_construction_error() {
        crate::init().unwrap();
        let bridge = Bridge::new(GstPipelineFactory::new());

        let err = bridge
            .create_session("VP8", Vec::new(), "videotestsrc ! ((")
            .err()
            .expect("parse must fail");
        assert!(matches!(err, BridgeError::PipelineConstruction(_)));
        assert!(bridge.registry().is_empty());
    }

    #[test]
    #[ignore = "requires gst-plugins-base and gst-plugins-good (vp8enc)"]
    fn videotestsrc_vp8_delivers_samples_until_eos() {
        crate::init().unwrap();
        let bridge = Bridge::new(GstPipelineFactory::new());
        let track = Arc::new(Recording(Mutex::new(Vec::new())));

        let (ended_tx, ended_rx) = std::sync::mpsc::channel();
        bridge.on_session_failed(move |id, err| {
            let _ = ended_tx.send((id, matches!(err, BridgeError::EndOfStream { .. })));
        });

        let session = bridge
            .create_session(
                "VP8",
                vec![track.clone()],
                "videotestsrc num-buffers=10 ! video/x-raw,framerate=30/1",
            )
            .unwrap();
        session.start().unwrap();

        let ended = ended_rx.recv_timeout(Duration::from_secs(10));
        session.stop().unwrap();
        assert_eq!(ended.unwrap(), (session.id(), true));

        let samples = track.0.lock().unwrap();
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|s| s.samples == 3000 && !s.data.is_empty()));
    }
}
