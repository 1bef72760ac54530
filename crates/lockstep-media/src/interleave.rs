//! Merge two demuxers into one packet sequence in presentation order.

use lockstep_core::{Packet, Result, TimeBase};
use lockstep_engine::Demuxer;
use tracing::trace;

struct Lane {
    demuxer: Box<dyn Demuxer>,
    time_base: TimeBase,
    head: Option<Packet>,
    /// Presentation time of the last packet handed out, in microseconds.
    last_us: i64,
    finished: bool,
}

impl Lane {
    fn new(demuxer: Box<dyn Demuxer>, time_base: TimeBase) -> Self {
        Self {
            demuxer,
            time_base,
            head: None,
            last_us: i64::MIN,
            finished: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.head.is_none() && !self.finished {
            self.head = self.demuxer.read_packet()?;
            self.finished = self.head.is_none();
        }
        Ok(())
    }

    /// Sort key of the head packet. Packets without pts stay next to their
    /// predecessor.
    fn head_micros(&self) -> Option<i64> {
        let head = self.head.as_ref()?;
        Some(head.pts.map_or(self.last_us, |pts| self.time_base.to_micros(pts)))
    }

    fn take(&mut self) -> Option<Packet> {
        let key = self.head_micros()?;
        self.last_us = key;
        self.head.take()
    }
}

/// Demuxer that always yields the earlier of its two inputs' next packets.
///
/// Errors from either input are passed through; the failed read is retried
/// on the next call.
pub struct Interleave {
    lanes: [Lane; 2],
}

impl Interleave {
    pub fn new(
        first: Box<dyn Demuxer>,
        first_time_base: TimeBase,
        second: Box<dyn Demuxer>,
        second_time_base: TimeBase,
    ) -> Self {
        Self {
            lanes: [
                Lane::new(first, first_time_base),
                Lane::new(second, second_time_base),
            ],
        }
    }
}

impl Demuxer for Interleave {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        for lane in &mut self.lanes {
            lane.fill()?;
        }

        let [first, second] = &mut self.lanes;
        let lane = match (first.head_micros(), second.head_micros()) {
            (Some(a), Some(b)) if b < a => second,
            (Some(_), _) => first,
            (None, Some(_)) => second,
            (None, None) => return Ok(None),
        };
        let packet = lane.take();
        if let Some(packet) = &packet {
            trace!("Interleaved packet of stream {} at {}us", packet.stream, lane.last_us);
        }
        Ok(packet)
    }
}
