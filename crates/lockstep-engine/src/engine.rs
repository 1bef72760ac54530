//! Player: builds the pipeline, runs the render loop, tears everything down.

use crossbeam_channel::{unbounded, Receiver};
use lockstep_core::{Error, Packet, PipelineConfig, Result, StreamItem, VideoFrame};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::backoff::Backoff;
use crate::buffer::{shared_ring_buffer, BoundedQueue, SharedQueue, SharedRingBuffer};
use crate::clock::{SharedSyncClock, SyncClock};
use crate::pipeline::{
    AudioCallback, AudioDecodeStage, FramePacer, OutputStats, PipelineStatus, PlaybackSummary,
    PlayerEvent, ReaderStage, RenderLoop, Stage, VideoDecodeStage,
};
use crate::source::{AudioDevice, MediaSource, VideoSink};

/// Aborts every primitive of a running player. Cheap to clone, usable from
/// any thread (signal handlers included).
#[derive(Clone)]
pub struct ShutdownHandle {
    audio_packets: SharedQueue<StreamItem<Packet>>,
    video_packets: SharedQueue<StreamItem<Packet>>,
    frames: SharedQueue<StreamItem<VideoFrame>>,
    ring: SharedRingBuffer,
}

impl ShutdownHandle {
    /// Wake every blocked stage and make all further transfers fail.
    pub fn abort(&self) {
        self.audio_packets.abort();
        self.video_packets.abort();
        self.frames.abort();
        self.ring.abort();
    }
}

/// A running A/V pipeline.
///
/// `open` starts the reader and both decode threads and the audio device;
/// `run` drives the render loop on the calling thread.
pub struct Player {
    shutdown: ShutdownHandle,
    clock: SharedSyncClock,
    output_stats: Arc<OutputStats>,
    events: Receiver<PlayerEvent>,
    render: Option<RenderLoop>,
    threads: Vec<(Stage, JoinHandle<()>)>,
    device: Box<dyn AudioDevice>,
    closed: bool,
}

impl Player {
    /// Open the audio device and start the pipeline threads.
    ///
    /// Nothing is left running when this fails.
    pub fn open(
        config: PipelineConfig,
        source: MediaSource,
        mut device: Box<dyn AudioDevice>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let spec = source.audio.filter.output_spec().validate()?;
        let time_base = source.video.time_base.validate()?;
        debug!(
            "Opening player: video {} ({}x{}, {}/{}), audio {} ({} Hz, {} ch)",
            source.video.id,
            source.video.width,
            source.video.height,
            time_base.num,
            time_base.den,
            source.audio.id,
            spec.sample_rate,
            spec.channels
        );

        let audio_packets = Arc::new(BoundedQueue::new("audio queue", config.audio_packet_queue));
        let video_packets = Arc::new(BoundedQueue::new("video queue", config.video_packet_queue));
        let frames = Arc::new(BoundedQueue::new(
            "video frame queue",
            config.video_frame_queue,
        ));
        let ring = shared_ring_buffer(config.ring_buffer_bytes);
        let clock = Arc::new(SyncClock::new());
        let status = Arc::new(PipelineStatus::new());
        let (event_tx, events) = unbounded();

        let callback = AudioCallback::new(ring.clone(), clock.clone(), status.clone(), spec);
        let output_stats = callback.stats();
        device.open(spec, callback)?;

        let shutdown = ShutdownHandle {
            audio_packets: audio_packets.clone(),
            video_packets: video_packets.clone(),
            frames: frames.clone(),
            ring: ring.clone(),
        };

        let render = RenderLoop::new(
            frames.clone(),
            ring.clone(),
            clock.clone(),
            status.clone(),
            event_tx.clone(),
            FramePacer::new(clock.clone(), time_base, config.max_render_sleep()),
            config.max_render_sleep(),
            config.exit_at_end,
        );

        let mut player = Self {
            shutdown,
            clock,
            output_stats,
            events,
            render: Some(render),
            threads: Vec::with_capacity(3),
            device,
            closed: false,
        };

        let reader = ReaderStage {
            demuxer: source.demuxer,
            audio_stream: source.audio.id,
            video_stream: source.video.id,
            audio_packets: audio_packets.clone(),
            video_packets: video_packets.clone(),
            status: status.clone(),
            events: event_tx.clone(),
        };
        let video = VideoDecodeStage {
            decoder: source.video.decoder,
            packets: video_packets,
            frames,
            status: status.clone(),
            events: event_tx.clone(),
        };
        let audio = AudioDecodeStage {
            decoder: source.audio.decoder,
            filter: source.audio.filter,
            packets: audio_packets,
            ring,
            backoff: Backoff::new(config.audio_backoff),
            status,
            events: event_tx,
        };

        // On error `player` drops here, which aborts and joins what started.
        player.spawn(Stage::Reader, move || reader.run())?;
        player.spawn(Stage::VideoDecode, move || video.run())?;
        player.spawn(Stage::AudioDecode, move || audio.run())?;

        player.device.start()?;
        info!("Player started");
        Ok(player)
    }

    fn spawn(&mut self, stage: Stage, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = std::thread::Builder::new()
            .name(stage.thread_name().to_string())
            .spawn(body)
            .map_err(|e| Error::Internal(format!("Failed to spawn {stage} thread: {e}")))?;
        self.threads.push((stage, handle));
        Ok(())
    }

    /// Run the render loop on this thread until the end of playback, a quit
    /// request from the sink, or a shutdown.
    pub fn run(&mut self, sink: &mut dyn VideoSink) -> Result<PlaybackSummary> {
        let mut render = self.render.take().ok_or(Error::Aborted)?;
        let mut summary = render.run(sink);
        summary.audio_underruns = self.output_stats.underruns();
        Ok(summary)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events.clone()
    }

    pub fn clock(&self) -> SharedSyncClock {
        self.clock.clone()
    }

    pub fn output_stats(&self) -> Arc<OutputStats> {
        self.output_stats.clone()
    }

    /// Abort every primitive, join the pipeline threads, close the device.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.render = None;

        self.shutdown.abort();
        for (stage, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("{stage} thread panicked");
            }
        }
        self.device.close();
        info!("Player shut down");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
