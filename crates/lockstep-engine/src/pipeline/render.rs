//! Render loop: paces decoded frames against the audio clock.
//!
//! The decision of *when* to show a frame lives in [`FramePacer`], which
//! takes the current time as an argument so it can be driven by a fake
//! clock. [`RenderLoop`] wires it to the frame queue, the sink, and the
//! wall clock.

use crossbeam_channel::Sender;
use lockstep_core::{StreamItem, StreamKind, TimeBase, VideoFrame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::{ExitReason, PipelineStatus, PlayerEvent, Stage};
use crate::buffer::{SharedQueue, SharedRingBuffer};
use crate::clock::SharedSyncClock;
use crate::source::{SinkEvent, VideoSink};

/// Outcome of one pacing check.
#[derive(Debug)]
pub enum Pace {
    /// The frame is due: show it now.
    Present(VideoFrame),
    /// The frame is not due yet; sleep this long and check again.
    Wait(Duration),
    /// No frame is scheduled.
    Empty,
}

struct Scheduled {
    frame: VideoFrame,
    pts_us: i64,
    raw_delay: i64,
}

/// Decides when each frame is displayed.
pub struct FramePacer {
    clock: SharedSyncClock,
    time_base: TimeBase,
    max_sleep: Duration,
    pending: Option<Scheduled>,
    last_pts_us: Option<i64>,
    last_raw_delay: i64,
    last_display_us: Option<i64>,
}

impl FramePacer {
    pub const fn new(clock: SharedSyncClock, time_base: TimeBase, max_sleep: Duration) -> Self {
        Self {
            clock,
            time_base,
            max_sleep,
            pending: None,
            last_pts_us: None,
            last_raw_delay: 0,
            last_display_us: None,
        }
    }

    /// True while a frame waits to be displayed.
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Queue `frame` as the next one to display.
    ///
    /// Its spacing from the previously displayed frame becomes the clock's
    /// acceptable delay. A frame without pts keeps the previous spacing.
    pub fn schedule(&mut self, frame: VideoFrame) {
        let pts_us = match (frame.pts, self.last_pts_us) {
            (Some(pts), _) => self.time_base.to_micros(pts),
            (None, Some(last)) => last.saturating_add(self.last_raw_delay),
            (None, None) => 0,
        };
        let raw_delay = self
            .last_pts_us
            .map_or(0, |last| pts_us.saturating_sub(last));
        if self.last_pts_us.is_some() {
            self.clock.set_acceptable_delay(raw_delay);
        }
        self.pending = Some(Scheduled {
            frame,
            pts_us,
            raw_delay,
        });
    }

    /// Check the scheduled frame against `now_us`.
    ///
    /// The first frame is due immediately. Every later frame is due at the
    /// previous display time plus the clock-corrected spacing, re-evaluated
    /// on each call so audio progress is picked up while waiting.
    pub fn poll(&mut self, now_us: i64) -> Pace {
        let Some(scheduled) = &self.pending else {
            return Pace::Empty;
        };

        let due_us = self.last_display_us.map_or(now_us, |last| {
            last.saturating_add(self.clock.adjust_delay(scheduled.raw_delay))
        });
        if now_us < due_us {
            let wait = Duration::from_micros(due_us.abs_diff(now_us));
            return Pace::Wait(wait.min(self.max_sleep));
        }

        let Some(scheduled) = self.pending.take() else {
            return Pace::Empty;
        };
        self.clock.set_video_pts(scheduled.pts_us);
        self.last_pts_us = Some(scheduled.pts_us);
        self.last_raw_delay = scheduled.raw_delay;
        self.last_display_us = Some(now_us);
        Pace::Present(scheduled.frame)
    }
}

/// How the render loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderExit {
    /// Both streams drained and the audio buffer played out.
    EndOfStream,
    /// The sink asked to quit.
    Quit,
    /// The frame queue was shut down.
    Aborted,
    /// A stage reported a fatal error.
    Failed,
}

/// Statistics collected by the render loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub exit: RenderExit,
    pub frames_dequeued: u64,
    pub frames_presented: u64,
    /// Frames dropped because their planes did not match their size.
    pub frames_skipped: u64,
    /// Largest |video − audio| seen right after a frame was shown.
    pub max_abs_drift_us: i64,
    pub final_audio_pts_us: i64,
    pub final_video_pts_us: i64,
    /// Output callbacks that found the ring buffer short of data.
    pub audio_underruns: u64,
}

/// The render loop. Runs on the thread that owns the sink.
pub struct RenderLoop {
    frames: SharedQueue<StreamItem<VideoFrame>>,
    ring: SharedRingBuffer,
    clock: SharedSyncClock,
    status: Arc<PipelineStatus>,
    events: Sender<PlayerEvent>,
    pacer: FramePacer,
    max_sleep: Duration,
    exit_at_end: bool,
}

impl RenderLoop {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        frames: SharedQueue<StreamItem<VideoFrame>>,
        ring: SharedRingBuffer,
        clock: SharedSyncClock,
        status: Arc<PipelineStatus>,
        events: Sender<PlayerEvent>,
        pacer: FramePacer,
        max_sleep: Duration,
        exit_at_end: bool,
    ) -> Self {
        Self {
            frames,
            ring,
            clock,
            status,
            events,
            pacer,
            max_sleep,
            exit_at_end,
        }
    }

    pub fn run(&mut self, sink: &mut dyn VideoSink) -> PlaybackSummary {
        info!("Render loop started");
        let _ = self.events.send(PlayerEvent::StageStarted(Stage::Render));

        let mut summary = PlaybackSummary {
            exit: RenderExit::EndOfStream,
            frames_dequeued: 0,
            frames_presented: 0,
            frames_skipped: 0,
            max_abs_drift_us: 0,
            final_audio_pts_us: 0,
            final_video_pts_us: 0,
            audio_underruns: 0,
        };
        summary.exit = self.render(sink, &mut summary);
        summary.final_audio_pts_us = self.clock.audio_pts();
        summary.final_video_pts_us = self.clock.video_pts();

        info!(
            "Render loop exited: {:?} ({} frames presented)",
            summary.exit, summary.frames_presented
        );
        let reason = match summary.exit {
            RenderExit::EndOfStream => ExitReason::EndOfStream,
            RenderExit::Quit | RenderExit::Aborted => ExitReason::Aborted,
            RenderExit::Failed => ExitReason::Failed,
        };
        let _ = self.events.send(PlayerEvent::StageFinished {
            stage: Stage::Render,
            reason,
        });
        summary
    }

    fn render(&mut self, sink: &mut dyn VideoSink, summary: &mut PlaybackSummary) -> RenderExit {
        let started = Instant::now();
        let mut end_of_stream = false;

        loop {
            if sink.pump_events() == SinkEvent::Quit {
                debug!("Sink requested quit");
                return RenderExit::Quit;
            }
            if self.status.has_failed() {
                return RenderExit::Failed;
            }
            if self.frames.is_aborted() && !self.pacer.is_pending() && self.frames.is_empty() {
                return RenderExit::Aborted;
            }

            if !self.pacer.is_pending() && !end_of_stream {
                // Bounded wait so quit requests are seen while the queue is empty.
                match self.frames.get_timeout(self.max_sleep) {
                    Ok(None) => continue,
                    Ok(Some(StreamItem::Data(frame))) => {
                        summary.frames_dequeued += 1;
                        if !frame.is_well_formed() {
                            warn!("Skipping malformed frame {frame:?}");
                            summary.frames_skipped += 1;
                            continue;
                        }
                        self.pacer.schedule(frame);
                    }
                    Ok(Some(StreamItem::EndOfStream)) => {
                        debug!("Video end of stream reached");
                        end_of_stream = true;
                    }
                    Err(_) if self.status.has_failed() => return RenderExit::Failed,
                    Err(_) => return RenderExit::Aborted,
                }
            }

            let now_us = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
            match self.pacer.poll(now_us) {
                Pace::Present(frame) => {
                    if let Err(e) = sink.present(&frame) {
                        if e.is_fatal() {
                            error!("Presentation failed: {e}");
                            self.status.mark_failed();
                            self.frames.abort();
                            return RenderExit::Failed;
                        }
                        warn!("Could not present frame pts={:?}: {e}", frame.pts);
                        continue;
                    }
                    summary.frames_presented += 1;
                    let drift = self.clock.drift();
                    summary.max_abs_drift_us = summary.max_abs_drift_us.max(drift.saturating_abs());
                    trace!("Presented frame pts={:?}, drift {drift}us", frame.pts);
                }
                Pace::Wait(delay) => std::thread::sleep(delay),
                Pace::Empty => {
                    if self.exit_at_end && self.playback_finished() {
                        return RenderExit::EndOfStream;
                    }
                    std::thread::sleep(self.max_sleep);
                }
            }
        }
    }

    /// Audio drained from its decoder and fully played out.
    fn playback_finished(&self) -> bool {
        self.status.is_drained(StreamKind::Audio) && self.ring.is_empty()
    }
}
