mod tracks;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use bridge::{Bridge, BridgeConfig, BridgeError, OverflowPolicy, Track, TrackQueueConfig};
use bridge_gst::GstPipelineFactory;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tracks::{FileTrack, StatsTrack};

#[derive(Parser)]
#[command(
    name = "media-bridge",
    about = "Encode a GStreamer source and bridge its buffers onto tracks"
)]
struct Args {
    /// Codec: VP8, VP9, H264, Opus or G722
    #[arg(long, short, default_value = "H264")]
    codec: String,

    /// Source part of the pipeline description
    #[arg(long, short, default_value = "videotestsrc is-live=true")]
    source: String,

    /// How long to run before stopping
    #[arg(long, short, default_value_t = 5)]
    duration_secs: u64,

    /// Also write raw encoded payloads to this file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Queue samples per track with this capacity instead of writing inline
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Drop the oldest queued sample when a track queue is full
    #[arg(long, requires = "queue_capacity")]
    drop_oldest: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("media-bridge: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    bridge_gst::init()?;

    let config = BridgeConfig {
        track_queue: args.queue_capacity.map(|capacity| TrackQueueConfig {
            capacity,
            overflow: if args.drop_oldest {
                OverflowPolicy::DropOldest
            } else {
                OverflowPolicy::Block
            },
        }),
        ..BridgeConfig::default()
    };
    let bridge = Bridge::with_config(GstPipelineFactory::new(), config);

    let (ended_tx, ended_rx) = mpsc::channel();
    bridge.on_session_failed(move |id, err| {
        let eos = matches!(err, BridgeError::EndOfStream { .. });
        let _ = ended_tx.send((id, eos, err.to_string()));
    });

    let stats = Arc::new(StatsTrack::new("stats", 100));
    let mut tracks: Vec<Arc<dyn Track>> = vec![stats.clone()];
    if let Some(path) = &args.output {
        tracks.push(Arc::new(FileTrack::create(path)?));
    }

    let session = bridge.create_session(&args.codec, tracks, &args.source)?;
    session.start()?;

    println!(
        "session {} ({}) running for {}s",
        session.id(),
        session.codec(),
        args.duration_secs
    );

    // Finite sources end the run early.
    let outcome = match ended_rx.recv_timeout(Duration::from_secs(args.duration_secs)) {
        Ok((id, true, _)) => {
            println!("session {id} reached end of stream");
            Ok(())
        }
        Ok((id, false, reason)) => Err(format!("session {id} failed: {reason}")),
        Err(_) => Ok(()),
    };

    session.stop()?;

    let (samples, bytes, ticks) = stats.totals();
    println!("delivered {samples} samples, {bytes} bytes, {ticks} clock ticks");

    outcome.map_err(Into::into)
}
