//! Audio-mastered clock that paces video presentation.
//!
//! The audio output callback publishes how much audio has been played; the
//! render loop publishes the pts of the last frame it showed and asks the
//! clock how long to wait before the next one. Each field has exactly one
//! writer, so plain atomics are enough.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Lower bound of the slow-down cap, in microseconds.
///
/// When video runs ahead the extra delay is limited to
/// `max(2 * acceptable_delay, MIN_SLOWDOWN_CAP_US)`, so a single large pts
/// jump cannot freeze the picture.
pub const MIN_SLOWDOWN_CAP_US: i64 = 40_000;

/// Presentation clock pair plus the jitter band derived from frame spacing.
#[derive(Debug, Default)]
pub struct SyncClock {
    /// Written by the audio output callback.
    audio_pts: AtomicI64,
    /// Written by the render loop.
    video_pts: AtomicI64,
    /// Written by the render loop.
    acceptable_delay: AtomicI64,
}

impl SyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_audio_pts(&self, micros: i64) {
        self.audio_pts.store(micros, Ordering::Release);
    }

    pub fn set_video_pts(&self, micros: i64) {
        self.video_pts.store(micros, Ordering::Release);
    }

    pub fn audio_pts(&self) -> i64 {
        self.audio_pts.load(Ordering::Acquire)
    }

    pub fn video_pts(&self) -> i64 {
        self.video_pts.load(Ordering::Acquire)
    }

    /// Record the nominal spacing of the current frame.
    pub fn set_acceptable_delay(&self, micros: i64) {
        self.acceptable_delay
            .store(micros.saturating_abs(), Ordering::Release);
    }

    pub fn acceptable_delay(&self) -> i64 {
        self.acceptable_delay.load(Ordering::Acquire)
    }

    /// Video minus audio; positive while video runs ahead.
    pub fn drift(&self) -> i64 {
        self.video_pts().saturating_sub(self.audio_pts())
    }

    /// Correct a frame delay so video converges on the audio clock.
    pub fn adjust_delay(&self, raw_delay: i64) -> i64 {
        correct_delay(
            self.audio_pts(),
            self.video_pts(),
            self.acceptable_delay(),
            raw_delay,
        )
    }
}

/// Thread-safe reference to a sync clock.
pub type SharedSyncClock = Arc<SyncClock>;

/// Single-step proportional correction.
///
/// - inside the band: `raw_delay` unchanged,
/// - video ahead: delay grows by the drift, capped,
/// - video behind: delay shrinks by the lag, down to zero.
pub fn correct_delay(audio_pts: i64, video_pts: i64, acceptable_delay: i64, raw_delay: i64) -> i64 {
    let band = acceptable_delay.saturating_abs();
    let drift = video_pts.saturating_sub(audio_pts);

    if drift.saturating_abs() <= band {
        raw_delay
    } else if drift > 0 {
        let cap = band.saturating_mul(2).max(MIN_SLOWDOWN_CAP_US);
        raw_delay.max(0).saturating_add(drift.min(cap))
    } else {
        raw_delay.saturating_add(drift).max(0)
    }
}
