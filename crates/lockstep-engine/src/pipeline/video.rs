//! Video decode stage: packets in, pictures out.

use crossbeam_channel::Sender;
use lockstep_core::{Error, Packet, StreamItem, StreamKind, VideoFrame};
use std::sync::Arc;
use tracing::{error, info, trace, warn};

use super::{ExitReason, PipelineStatus, PlayerEvent, Stage};
use crate::buffer::SharedQueue;
use crate::source::VideoDecoder;

pub struct VideoDecodeStage {
    pub decoder: Box<dyn VideoDecoder>,
    pub packets: SharedQueue<StreamItem<Packet>>,
    pub frames: SharedQueue<StreamItem<VideoFrame>>,
    pub status: Arc<PipelineStatus>,
    pub events: Sender<PlayerEvent>,
}

impl VideoDecodeStage {
    pub fn run(mut self) {
        info!("Video decode stage started");
        let _ = self.events.send(PlayerEvent::StageStarted(Stage::VideoDecode));

        let reason = self.decode_loop();
        if reason != ExitReason::EndOfStream {
            // Nothing more will reach the render loop.
            self.frames.abort();
        }
        self.decoder.close();

        info!("Video decode stage exited: {reason:?}");
        let _ = self.events.send(PlayerEvent::StageFinished {
            stage: Stage::VideoDecode,
            reason,
        });
    }

    fn decode_loop(&mut self) -> ExitReason {
        loop {
            let packet = match self.packets.get() {
                Ok(StreamItem::Data(packet)) => packet,
                Ok(StreamItem::EndOfStream) => return self.finish(),
                Err(_) => return ExitReason::Aborted,
            };

            if let Err(e) = self.decoder.send_packet(&packet) {
                if e.is_fatal() {
                    return self.fail(&e);
                }
                warn!("Skipping undecodable video packet pts={:?}: {e}", packet.pts);
                continue;
            }

            if let Err(reason) = self.forward_frames() {
                return reason;
            }
        }
    }

    /// Move every frame the decoder has ready into the frame queue.
    fn forward_frames(&mut self) -> Result<(), ExitReason> {
        loop {
            match self.decoder.receive_frame() {
                Ok(Some(frame)) => {
                    trace!("Decoded video frame pts={:?}", frame.pts);
                    self.frames
                        .put(StreamItem::Data(frame))
                        .map_err(|_| ExitReason::Aborted)?;
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(self.fail(&e)),
                Err(e) => {
                    warn!("Dropping undecodable video frame: {e}");
                    return Ok(());
                }
            }
        }
    }

    fn finish(&mut self) -> ExitReason {
        if let Err(e) = self.decoder.flush() {
            if e.is_fatal() {
                return self.fail(&e);
            }
            warn!("Video decoder flush failed: {e}");
        }
        if let Err(reason) = self.forward_frames() {
            return reason;
        }
        if self.frames.put(StreamItem::EndOfStream).is_err() {
            return ExitReason::Aborted;
        }
        self.status.mark_drained(StreamKind::Video);
        let _ = self.events.send(PlayerEvent::EndOfStream(StreamKind::Video));
        ExitReason::EndOfStream
    }

    fn fail(&self, e: &Error) -> ExitReason {
        error!("Video decoder failed: {e}");
        let _ = self.events.send(PlayerEvent::StageFailed {
            stage: Stage::VideoDecode,
            error: e.to_string(),
        });
        self.status.mark_failed();
        self.packets.abort();
        self.frames.abort();
        ExitReason::Failed
    }
}
