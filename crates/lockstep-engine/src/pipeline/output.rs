//! Audio output callback: drains the ring buffer and advances the clock.

use lockstep_core::{AudioSpec, StreamKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::PipelineStatus;
use crate::buffer::SharedRingBuffer;
use crate::clock::SharedSyncClock;

/// Counters updated by the output callback, readable from any thread.
#[derive(Debug, Default)]
pub struct OutputStats {
    consumed_bytes: AtomicU64,
    underruns: AtomicU64,
}

impl OutputStats {
    /// Bytes handed to the device so far, silence excluded.
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes.load(Ordering::Acquire)
    }

    /// Callbacks that ran short of data mid-playback. The gap before the
    /// first byte and the tail after audio has drained are not counted.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Fills device buffers from the ring buffer.
///
/// Called on the device's thread. Never blocks: missing data is replaced by
/// silence, and the audio clock is derived from the bytes actually played.
pub struct AudioCallback {
    ring: SharedRingBuffer,
    clock: SharedSyncClock,
    status: Arc<PipelineStatus>,
    spec: AudioSpec,
    consumed: u64,
    stats: Arc<OutputStats>,
}

impl AudioCallback {
    pub fn new(
        ring: SharedRingBuffer,
        clock: SharedSyncClock,
        status: Arc<PipelineStatus>,
        spec: AudioSpec,
    ) -> Self {
        Self {
            ring,
            clock,
            status,
            spec,
            consumed: 0,
            stats: Arc::new(OutputStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<OutputStats> {
        self.stats.clone()
    }

    /// Fill `out` completely, padding with silence when the buffer runs dry.
    pub fn fill(&mut self, out: &mut [u8]) {
        let mut filled = 0;
        while filled < out.len() {
            match self.ring.pull(&mut out[filled..]) {
                Ok(0) => {
                    if self.is_playing(filled) {
                        trace!("Audio underrun: {} of {} bytes", filled, out.len());
                        self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                    break;
                }
                Ok(read) => filled += read,
                // Shut down and empty: play silence until the device closes.
                Err(_) => break,
            }
        }
        out[filled..].fill(0);

        self.consumed += filled as u64;
        self.stats
            .consumed_bytes
            .store(self.consumed, Ordering::Release);
        self.clock
            .set_audio_pts(self.spec.bytes_to_micros(self.consumed));
    }

    /// Audio has started and more is still expected.
    fn is_playing(&self, filled: usize) -> bool {
        self.consumed + filled as u64 > 0 && !self.status.is_drained(StreamKind::Audio)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::buffer::shared_ring_buffer;
    use crate::clock::SyncClock;

    fn callback(capacity: usize) -> (AudioCallback, SharedRingBuffer, SharedSyncClock) {
        let (callback, ring, clock, _status) = callback_with_status(capacity);
        (callback, ring, clock)
    }

    fn callback_with_status(
        capacity: usize,
    ) -> (AudioCallback, SharedRingBuffer, SharedSyncClock, Arc<PipelineStatus>) {
        let ring = shared_ring_buffer(capacity);
        let clock = Arc::new(SyncClock::new());
        let status = Arc::new(PipelineStatus::new());
        // 48 kHz stereo s16: 192 000 bytes per second.
        let callback = AudioCallback::new(
            ring.clone(),
            clock.clone(),
            status.clone(),
            AudioSpec::s16(48_000, 2),
        );
        (callback, ring, clock, status)
    }

    #[test]
    fn test_full_fill_advances_clock() {
        let (mut callback, ring, clock) = callback(8192);
        ring.push(&[7u8; 4096]).unwrap();

        let mut out = [0u8; 1920];
        callback.fill(&mut out);

        assert!(out.iter().all(|b| *b == 7));
        assert_eq!(clock.audio_pts(), 10_000);
        assert_eq!(callback.stats().consumed_bytes(), 1920);
        assert_eq!(callback.stats().underruns(), 0);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let (mut callback, ring, clock) = callback(8192);
        ring.push(&[9u8; 192]).unwrap();

        let mut out = [1u8; 384];
        callback.fill(&mut out);

        assert!(out[..192].iter().all(|b| *b == 9));
        assert!(out[192..].iter().all(|b| *b == 0));
        // Only real audio moves the clock.
        assert_eq!(clock.audio_pts(), 1_000);
        assert_eq!(callback.stats().underruns(), 1);
    }

    #[test]
    fn test_startup_gap_is_not_an_underrun() {
        let (mut callback, ring, clock) = callback(8192);
        let mut out = [1u8; 384];
        callback.fill(&mut out);
        callback.fill(&mut out);
        assert_eq!(out, [0u8; 384]);
        assert_eq!(clock.audio_pts(), 0);
        assert_eq!(callback.stats().underruns(), 0);

        // Once audio has played, running dry counts.
        ring.push(&[4u8; 384]).unwrap();
        callback.fill(&mut out);
        callback.fill(&mut out);
        assert_eq!(callback.stats().underruns(), 1);
    }

    #[test]
    fn test_tail_after_drain_is_not_an_underrun() {
        let (mut callback, ring, _clock, status) = callback_with_status(8192);
        ring.push(&[5u8; 192]).unwrap();
        status.mark_drained(StreamKind::Audio);

        let mut out = [1u8; 384];
        callback.fill(&mut out);
        callback.fill(&mut out);
        assert_eq!(callback.stats().consumed_bytes(), 192);
        assert_eq!(callback.stats().underruns(), 0);
    }

    #[test]
    fn test_reads_across_wraparound() {
        let (mut callback, ring, _clock) = callback(8);
        ring.push(&[1, 2, 3, 4, 5, 6]).unwrap();
        let mut scratch = [0u8; 4];
        ring.pull(&mut scratch).unwrap();
        ring.push(&[7, 8, 9, 10]).unwrap();

        let mut out = [0u8; 6];
        callback.fill(&mut out);
        assert_eq!(out, [5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_aborted_ring_plays_silence() {
        let (mut callback, ring, clock) = callback(64);
        ring.push(&[3u8; 4]).unwrap();
        ring.abort();

        let mut out = [1u8; 8];
        callback.fill(&mut out);
        assert_eq!(out, [3, 3, 3, 3, 0, 0, 0, 0]);

        callback.fill(&mut out);
        assert_eq!(out, [0u8; 8]);
        assert_eq!(callback.stats().consumed_bytes(), 4);
        assert_eq!(clock.audio_pts(), AudioSpec::s16(48_000, 2).bytes_to_micros(4));
        assert_eq!(callback.stats().underruns(), 0);
    }

    #[test]
    fn test_callback_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioCallback>();
    }
}
