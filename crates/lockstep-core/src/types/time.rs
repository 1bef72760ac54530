//! Time base and PCM layout conversions.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Rational unit of a stream's timestamps (seconds per tick).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const MICROSECONDS: Self = Self::new(1, 1_000_000);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Check that the time base can convert timestamps.
    pub fn validate(self) -> Result<Self> {
        if self.num == 0 || self.den == 0 {
            return Err(Error::Config(format!(
                "invalid time base {}/{}",
                self.num, self.den
            )));
        }
        Ok(self)
    }

    /// Microseconds per tick.
    pub fn micros_per_tick(self) -> f64 {
        f64::from(self.num) * MICROS_PER_SECOND / f64::from(self.den)
    }

    /// Convert a timestamp in this time base to microseconds.
    pub fn to_micros(self, pts: i64) -> i64 {
        (pts as f64 * self.micros_per_tick()).round() as i64
    }
}

/// Layout of the interleaved PCM written into the ring buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl AudioSpec {
    /// Signed 16-bit interleaved PCM.
    pub const fn s16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bytes_per_sample: 2,
        }
    }

    pub fn validate(self) -> Result<Self> {
        if self.sample_rate == 0 || self.channels == 0 || self.bytes_per_sample == 0 {
            return Err(Error::Config(format!("invalid audio spec {self:?}")));
        }
        Ok(self)
    }

    /// Bytes in one sample frame (all channels).
    pub const fn bytes_per_frame(self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    pub const fn bytes_per_second(self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// Playback time covered by `bytes` bytes of PCM.
    pub fn bytes_to_micros(self, bytes: u64) -> i64 {
        let micros = u128::from(bytes) * 1_000_000 / u128::from(self.bytes_per_second());
        i64::try_from(micros).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_time_base_to_micros() {
        let tb = TimeBase::new(1, 90_000);
        assert_eq!(tb.to_micros(90_000), 1_000_000);
        assert_eq!(tb.to_micros(3_003), 33_367);

        let tb = TimeBase::new(1, 25);
        assert_eq!(tb.to_micros(1), 40_000);
    }

    #[test]
    fn test_time_base_validate() {
        assert!(TimeBase::new(0, 25).validate().is_err());
        assert!(TimeBase::new(1, 0).validate().is_err());
        assert!(TimeBase::new(1, 25).validate().is_ok());
    }

    #[test]
    fn test_audio_spec_rates() {
        let spec = AudioSpec::s16(48_000, 2);
        assert_eq!(spec.bytes_per_frame(), 4);
        assert_eq!(spec.bytes_per_second(), 192_000);
        assert_eq!(spec.bytes_to_micros(192_000), 1_000_000);
        assert_eq!(spec.bytes_to_micros(8_192), 42_666);
    }

    #[test]
    fn test_audio_spec_validate() {
        assert!(AudioSpec::s16(0, 2).validate().is_err());
        assert!(AudioSpec::s16(44_100, 0).validate().is_err());
        assert!(AudioSpec::s16(44_100, 1).validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_bytes_to_micros_monotonic(
            a in 0u64..10_000_000_000,
            b in 0u64..10_000_000_000,
            rate in 1u32..200_000,
            channels in 1u16..9,
        ) {
            let spec = AudioSpec::s16(rate, channels);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(spec.bytes_to_micros(lo) <= spec.bytes_to_micros(hi));
            // Whole seconds of audio convert exactly.
            prop_assert_eq!(spec.bytes_to_micros(spec.bytes_per_second() * 3), 3_000_000);
        }
    }
}
