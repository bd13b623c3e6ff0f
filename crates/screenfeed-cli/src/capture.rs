//! Session wiring for a capture run.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, instrument, warn};

use screenfeed_audio::LoopbackCapturer;
use screenfeed_core::{
    ensure_com_initialized, CaptureConfig, CaptureResult, CaptureSession, SessionId,
    SessionRegistry, SourceSelector,
};
use screenfeed_video::{DisplayCapturer, WindowCapturer};

use crate::output::OutputChannel;

/// How often the main thread checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Queued frames before new ones are dropped.
const VIDEO_QUEUE_DEPTH: usize = 8;

/// Queued audio packets, roughly two seconds at 10 ms packets.
const AUDIO_QUEUE_DEPTH: usize = 200;

type Sessions = SessionRegistry<Box<dyn CaptureSession>>;

fn launch(
    sessions: &mut Sessions,
    mut session: Box<dyn CaptureSession>,
    config: &CaptureConfig,
    output: &OutputChannel,
) -> CaptureResult<SessionId> {
    session.initialize(config)?;
    session.start(output.sink())?;
    let kind = session.kind();
    let id = sessions.insert(session);
    info!(session = %id, ?kind, "Capture session running");
    Ok(id)
}

/// Capture until Ctrl-C, a write failure, or the video source ends.
#[instrument(name = "capture_run", skip_all)]
pub fn run(config: CaptureConfig, audio: bool) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    ensure_com_initialized()?;

    info!(
        width = config.width,
        height = config.height,
        fps = config.fps,
        audio,
        "Starting capture"
    );

    let video_out = OutputChannel::spawn("video", io::stdout(), VIDEO_QUEUE_DEPTH, running.clone())?;
    let audio_out = if audio {
        Some(OutputChannel::spawn(
            "audio",
            io::stderr(),
            AUDIO_QUEUE_DEPTH,
            running.clone(),
        )?)
    } else {
        None
    };

    let mut sessions = Sessions::new();

    if let Some(out) = &audio_out {
        let loopback = Box::new(LoopbackCapturer::new());
        if let Err(e) = launch(&mut sessions, loopback, &CaptureConfig::system_audio(), out) {
            warn!("Audio capture unavailable, continuing without it: {}", e);
        }
    }

    let video: Box<dyn CaptureSession> = match config.source {
        SourceSelector::Window { .. } => Box::new(WindowCapturer::new()),
        _ => Box::new(DisplayCapturer::new()),
    };
    let video_id = match launch(&mut sessions, video, &config, &video_out) {
        Ok(id) => Some(id),
        Err(e) => {
            error!("Failed to start video capture: {}", e);
            None
        }
    };

    if let Some(id) = video_id {
        while running.load(Ordering::SeqCst)
            && sessions.get(id).is_some_and(|session| session.is_running())
        {
            thread::sleep(POLL_INTERVAL);
        }
    }

    for (id, session) in sessions.iter_mut() {
        if let Err(e) = session.stop() {
            warn!(session = %id, "Stop failed: {}", e);
        }
    }
    drop(sessions.drain());

    let video_stats = video_out.finish()?;
    let audio_stats = audio_out.map(OutputChannel::finish).transpose()?;

    info!(
        frames = video_stats.units,
        dropped_frames = video_stats.dropped,
        audio_packets = audio_stats.map_or(0, |stats| stats.units),
        "Capture stopped"
    );

    if video_id.is_none() {
        bail!("failed to start capture");
    }
    Ok(())
}
