//! Lockstep - audio-mastered A/V playback
//!
//! Plays an audio file (or a generated tone) against a generated color-bar
//! picture, pacing the picture to the audio device.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use lockstep_core::{PipelineConfig, VideoFrame};
use lockstep_engine::{
    AudioDevice, Player, PlayerEvent, RenderExit, SharedSyncClock, SinkEvent, VideoSink,
};
use lockstep_media::{file_source, synthetic_source, NullAudioDevice, SyntheticConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceKind {
    /// Real-time playback into nothing.
    Null,
    /// The system's default output device.
    Cpal,
}

#[derive(Debug, Parser)]
#[command(name = "lockstep", version, about = "Audio-mastered A/V playback")]
struct Cli {
    /// Audio file to play. A generated tone is used when omitted.
    input: Option<PathBuf>,

    /// Pipeline configuration (JSON). Missing fields take defaults.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Length of the generated streams in seconds. Ignored for files that
    /// declare their length.
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    #[arg(long, default_value_t = 25)]
    fps: u32,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Output sample rate. Defaults to the source rate.
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Keep the render loop alive after both streams end.
    #[arg(long)]
    no_exit_at_end: bool,

    #[arg(long, value_enum, default_value_t = DeviceKind::Null)]
    device: DeviceKind,
}

impl Cli {
    fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            duration_secs: self.duration,
            fps: self.fps,
            width: self.width,
            height: self.height,
            ..SyntheticConfig::default()
        }
    }

    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if self.no_exit_at_end {
            config.exit_at_end = false;
        }
        Ok(config)
    }
}

/// Headless presentation surface: counts frames and reports sync once per
/// interval.
struct StatsSink {
    clock: SharedSyncClock,
    quit: Arc<AtomicBool>,
    frames: u64,
    report_every: Duration,
    last_report: Instant,
}

impl StatsSink {
    fn new(clock: SharedSyncClock, quit: Arc<AtomicBool>, report_every: Duration) -> Self {
        Self {
            clock,
            quit,
            frames: 0,
            report_every,
            last_report: Instant::now(),
        }
    }
}

impl VideoSink for StatsSink {
    fn present(&mut self, frame: &VideoFrame) -> lockstep_core::Result<()> {
        self.frames += 1;
        if self.last_report.elapsed() >= self.report_every {
            self.last_report = Instant::now();
            info!(
                "Frame {} ({}x{}): video {}ms, audio {}ms, drift {}ms",
                self.frames,
                frame.width,
                frame.height,
                self.clock.video_pts() / 1_000,
                self.clock.audio_pts() / 1_000,
                self.clock.drift() / 1_000
            );
        }
        Ok(())
    }

    fn pump_events(&mut self) -> SinkEvent {
        if self.quit.load(Ordering::Relaxed) {
            SinkEvent::Quit
        } else {
            SinkEvent::Continue
        }
    }
}

fn open_device(kind: DeviceKind, frames_per_callback: u32) -> anyhow::Result<Box<dyn AudioDevice>> {
    match kind {
        DeviceKind::Null => Ok(Box::new(NullAudioDevice::new(frames_per_callback))),
        #[cfg(feature = "cpal")]
        DeviceKind::Cpal => Ok(Box::new(lockstep_media::CpalAudioDevice::new(
            frames_per_callback,
        ))),
        #[cfg(not(feature = "cpal"))]
        DeviceKind::Cpal => bail!("Built without cpal support; rebuild with --features cpal"),
    }
}

fn log_events(events: &Receiver<PlayerEvent>) {
    for event in events {
        match event {
            PlayerEvent::StageFailed { stage, error } => error!("{stage} failed: {error}"),
            PlayerEvent::StageFinished { stage, reason } => info!("{stage} finished: {reason:?}"),
            PlayerEvent::EndOfStream(kind) => info!("End of {kind} stream"),
            PlayerEvent::StageStarted(stage) => info!("{stage} started"),
        }
    }
}

fn play(cli: &Cli) -> anyhow::Result<()> {
    let pipeline = cli.pipeline_config()?;
    let video = cli.synthetic_config();
    let source = match &cli.input {
        Some(path) => file_source(path, &video, cli.sample_rate)
            .with_context(|| format!("Failed to open {}", path.display()))?,
        None => synthetic_source(&video, cli.sample_rate).context("Failed to build test source")?,
    };
    let device = open_device(cli.device, pipeline.device_frames)?;

    let mut player = Player::open(pipeline, source, device).context("Failed to start player")?;

    let events = player.events();
    let logger = std::thread::Builder::new()
        .name("lockstep-events".to_string())
        .spawn(move || log_events(&events))
        .context("Failed to spawn event logger")?;

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        let shutdown = player.shutdown_handle();
        ctrlc::set_handler(move || {
            quit.store(true, Ordering::Relaxed);
            shutdown.abort();
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let mut sink = StatsSink::new(player.clock(), quit.clone(), Duration::from_secs(1));
    let summary = player.run(&mut sink)?;
    player.shutdown();
    if logger.join().is_err() {
        warn!("Event logger panicked");
    }

    info!(
        "Playback ended ({:?}): {} of {} frames shown, {} skipped, max drift {}ms, {} underruns",
        summary.exit,
        summary.frames_presented,
        summary.frames_dequeued,
        summary.frames_skipped,
        summary.max_abs_drift_us / 1_000,
        summary.audio_underruns
    );
    info!(
        "Final position: audio {}ms, video {}ms",
        summary.final_audio_pts_us / 1_000,
        summary.final_video_pts_us / 1_000
    );

    match summary.exit {
        RenderExit::Failed => bail!("Playback failed"),
        RenderExit::Aborted if !quit.load(Ordering::Relaxed) => bail!("Playback aborted"),
        _ => Ok(()),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockstep=info,lockstep_engine=info,lockstep_media=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting Lockstep v{}", env!("CARGO_PKG_VERSION"));

    play(&cli)
}
