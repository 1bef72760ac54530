//! Audio decode stage: packets in, filtered PCM bytes into the ring buffer.

use crossbeam_channel::Sender;
use lockstep_core::{AudioBlock, Error, Packet, StreamItem, StreamKind};
use std::sync::Arc;
use tracing::{error, info, trace, warn};

use super::{ExitReason, PipelineStatus, PlayerEvent, Stage};
use crate::backoff::Backoff;
use crate::buffer::{SharedQueue, SharedRingBuffer};
use crate::source::{AudioDecoder, AudioFilter};

pub struct AudioDecodeStage {
    pub decoder: Box<dyn AudioDecoder>,
    pub filter: Box<dyn AudioFilter>,
    pub packets: SharedQueue<StreamItem<Packet>>,
    pub ring: SharedRingBuffer,
    pub backoff: Backoff,
    pub status: Arc<PipelineStatus>,
    pub events: Sender<PlayerEvent>,
}

impl AudioDecodeStage {
    pub fn run(mut self) {
        info!("Audio decode stage started");
        let _ = self.events.send(PlayerEvent::StageStarted(Stage::AudioDecode));

        let reason = self.decode_loop();
        if reason != ExitReason::EndOfStream {
            self.ring.abort();
        }
        self.decoder.close();

        info!("Audio decode stage exited: {reason:?}");
        let _ = self.events.send(PlayerEvent::StageFinished {
            stage: Stage::AudioDecode,
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
                warn!("Skipping undecodable audio packet pts={:?}: {e}", packet.pts);
                continue;
            }

            if let Err(reason) = self.forward_blocks() {
                return reason;
            }
        }
    }

    fn forward_blocks(&mut self) -> Result<(), ExitReason> {
        loop {
            match self.decoder.receive_block() {
                Ok(Some(block)) => self.filter_block(block)?,
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(self.fail(&e)),
                Err(e) => {
                    warn!("Dropping undecodable audio block: {e}");
                    return Ok(());
                }
            }
        }
    }

    fn filter_block(&mut self, block: AudioBlock) -> Result<(), ExitReason> {
        trace!("Decoded audio block: {} frames", block.frames());
        match self.filter.push(block) {
            Ok(()) => self.drain_filter(),
            Err(e) if e.is_fatal() => Err(self.fail(&e)),
            Err(e) => {
                warn!("Audio filter rejected block: {e}");
                Ok(())
            }
        }
    }

    fn drain_filter(&mut self) -> Result<(), ExitReason> {
        loop {
            match self.filter.pull() {
                Ok(Some(bytes)) => self.write_all(&bytes)?,
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(self.fail(&e)),
                Err(e) => {
                    warn!("Audio filter output dropped: {e}");
                    return Ok(());
                }
            }
        }
    }

    /// Push `bytes` into the ring buffer, backing off while it is full.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ExitReason> {
        let mut offset = 0;
        while offset < bytes.len() {
            match self.ring.push(&bytes[offset..]) {
                Ok(0) => self.backoff.snooze(),
                Ok(written) => {
                    offset += written;
                    self.backoff.reset();
                }
                Err(_) => return Err(ExitReason::Aborted),
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ExitReason {
        let drained = self
            .flush_decoder()
            .and_then(|()| self.forward_blocks())
            .and_then(|()| self.flush_filter())
            .and_then(|()| self.drain_filter());
        if let Err(reason) = drained {
            return reason;
        }

        self.status.mark_drained(StreamKind::Audio);
        let _ = self.events.send(PlayerEvent::EndOfStream(StreamKind::Audio));
        ExitReason::EndOfStream
    }

    fn flush_decoder(&mut self) -> Result<(), ExitReason> {
        match self.decoder.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(self.fail(&e)),
            Err(e) => {
                warn!("Audio decoder flush failed: {e}");
                Ok(())
            }
        }
    }

    fn flush_filter(&mut self) -> Result<(), ExitReason> {
        match self.filter.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(self.fail(&e)),
            Err(e) => {
                warn!("Audio filter flush failed: {e}");
                Ok(())
            }
        }
    }

    fn fail(&self, e: &Error) -> ExitReason {
        error!("Audio pipeline failed: {e}");
        let _ = self.events.send(PlayerEvent::StageFailed {
            stage: Stage::AudioDecode,
            error: e.to_string(),
        });
        self.status.mark_failed();
        self.packets.abort();
        self.ring.abort();
        ExitReason::Failed
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::buffer::{shared_ring_buffer, BoundedQueue};
    use crate::testing::{ByteAudioDecoder, ByteFilter, BROKEN, CORRUPT};
    use crossbeam_channel::unbounded;
    use lockstep_core::{BackoffConfig, StreamId};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn stage(ring_capacity: usize) -> (AudioDecodeStage, Arc<std::sync::atomic::AtomicBool>) {
        let decoder = ByteAudioDecoder::default();
        let closed = decoder.closed.clone();
        let (tx, _rx) = unbounded();
        let stage = AudioDecodeStage {
            decoder: Box::new(decoder),
            filter: Box::new(ByteFilter::default()),
            packets: Arc::new(BoundedQueue::new("audio queue", 16)),
            ring: shared_ring_buffer(ring_capacity),
            backoff: Backoff::new(BackoffConfig {
                initial_us: 100,
                max_us: 1_000,
                factor: 2,
            }),
            status: Arc::new(PipelineStatus::new()),
            events: tx,
        };
        (stage, closed)
    }

    fn packet(payload: &[u8]) -> StreamItem<Packet> {
        StreamItem::Data(Packet::new(StreamId(1), None, payload.to_vec()))
    }

    #[test]
    fn test_filtered_bytes_reach_ring_in_order() {
        let (stage, closed) = stage(64);
        let packets = stage.packets.clone();
        let ring = stage.ring.clone();
        let status = stage.status.clone();

        packets.put(packet(&[1, 2, 3])).unwrap();
        packets.put(packet(&[CORRUPT, 9])).unwrap();
        packets.put(packet(&[4, 5])).unwrap();
        packets.put(StreamItem::EndOfStream).unwrap();
        stage.run();

        let mut output = [0u8; 16];
        let read = ring.pull(&mut output).unwrap();
        assert_eq!(&output[..read], &[1, 2, 3, 4, 5]);
        assert!(status.is_drained(StreamKind::Audio));
        assert!(!ring.is_aborted());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_full_ring_retries_until_consumer_pulls() {
        let (stage, _closed) = stage(4);
        let packets = stage.packets.clone();
        let ring = stage.ring.clone();

        packets.put(packet(&[10, 11, 12, 13, 14, 15, 16, 17, 18, 19])).unwrap();
        packets.put(StreamItem::EndOfStream).unwrap();
        let worker = std::thread::spawn(move || stage.run());

        let mut received = Vec::new();
        let mut output = [0u8; 3];
        while received.len() < 10 {
            let read = ring.pull(&mut output).unwrap();
            received.extend_from_slice(&output[..read]);
            std::thread::sleep(Duration::from_millis(1));
        }
        worker.join().unwrap();
        assert_eq!(received, (10..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_abort_while_ring_full() {
        let (stage, closed) = stage(2);
        let packets = stage.packets.clone();
        let ring = stage.ring.clone();

        packets.put(packet(&[1, 2, 3, 4])).unwrap();
        let worker = std::thread::spawn(move || stage.run());
        std::thread::sleep(Duration::from_millis(20));
        ring.abort();
        packets.abort();
        worker.join().unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(ring.available(), 2);
    }

    #[test]
    fn test_fatal_decoder_error() {
        let (stage, _closed) = stage(8);
        let packets = stage.packets.clone();
        let ring = stage.ring.clone();
        let status = stage.status.clone();

        packets.put(packet(&[BROKEN])).unwrap();
        stage.run();

        assert!(status.has_failed());
        assert!(ring.is_aborted());
        assert!(packets.is_aborted());
    }
}
