//! Reader stage: demuxes packets into the per-stream queues.

use crossbeam_channel::Sender;
use lockstep_core::{Packet, StreamId, StreamItem};
use tracing::{debug, error, info, trace, warn};

use super::{ExitReason, PipelineStatus, PlayerEvent, Stage};
use crate::buffer::{PacketQueue, SharedQueue};
use crate::source::Demuxer;
use std::sync::Arc;

/// Reads packets and routes them by stream id.
pub struct ReaderStage {
    pub demuxer: Box<dyn Demuxer>,
    pub audio_stream: StreamId,
    pub video_stream: StreamId,
    pub audio_packets: SharedQueue<StreamItem<Packet>>,
    pub video_packets: SharedQueue<StreamItem<Packet>>,
    pub status: Arc<PipelineStatus>,
    pub events: Sender<PlayerEvent>,
}

impl ReaderStage {
    pub fn run(mut self) {
        info!("Reader stage started");
        let _ = self.events.send(PlayerEvent::StageStarted(Stage::Reader));

        let reason = self.read_loop();

        info!("Reader stage exited: {reason:?}");
        let _ = self.events.send(PlayerEvent::StageFinished {
            stage: Stage::Reader,
            reason,
        });
    }

    fn read_loop(&mut self) -> ExitReason {
        let mut routed = 0u64;
        loop {
            match self.demuxer.read_packet() {
                Ok(Some(packet)) => {
                    let Some(queue) = self.route(&packet) else {
                        trace!("Dropping packet of unselected stream {}", packet.stream);
                        continue;
                    };
                    trace!(
                        "{}: packet pts={:?}, {} bytes",
                        queue.name(),
                        packet.pts,
                        packet.data.len()
                    );
                    if queue.put(StreamItem::Data(packet)).is_err() {
                        return ExitReason::Aborted;
                    }
                    routed += 1;
                }
                Ok(None) => {
                    debug!("End of input after {routed} packets");
                    return self.signal_end_of_stream();
                }
                Err(e) if e.is_fatal() => {
                    error!("Demuxer failed: {e}");
                    let _ = self.events.send(PlayerEvent::StageFailed {
                        stage: Stage::Reader,
                        error: e.to_string(),
                    });
                    self.status.mark_failed();
                    self.audio_packets.abort();
                    self.video_packets.abort();
                    return ExitReason::Failed;
                }
                Err(e) => {
                    warn!("Skipping unreadable packet: {e}");
                }
            }
        }
    }

    fn route(&self, packet: &Packet) -> Option<&PacketQueue> {
        if packet.stream == self.audio_stream {
            Some(self.audio_packets.as_ref())
        } else if packet.stream == self.video_stream {
            Some(self.video_packets.as_ref())
        } else {
            None
        }
    }

    fn signal_end_of_stream(&self) -> ExitReason {
        let audio = self.audio_packets.put(StreamItem::EndOfStream);
        let video = self.video_packets.put(StreamItem::EndOfStream);
        if audio.is_ok() && video.is_ok() {
            ExitReason::EndOfStream
        } else {
            ExitReason::Aborted
        }
    }
}
