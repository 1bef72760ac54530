//! Pipeline configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Audio frames requested by the output device per callback.
pub const DEFAULT_DEVICE_FRAMES: u32 = 2048;

/// Retry policy for a producer that found the ring buffer full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    /// First sleep after a zero-length write, in microseconds.
    pub initial_us: u64,
    /// Upper bound of a single sleep, in microseconds.
    pub max_us: u64,
    /// Growth factor applied after each consecutive zero-length write.
    pub factor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_us: 1_000,
            max_us: 20_000,
            factor: 2,
        }
    }
}

impl BackoffConfig {
    pub const fn initial(&self) -> Duration {
        Duration::from_micros(self.initial_us)
    }

    pub const fn max(&self) -> Duration {
        Duration::from_micros(self.max_us)
    }
}

/// Capacities and pacing knobs consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Audio packet queue capacity, in packets.
    pub audio_packet_queue: usize,
    /// Video packet queue capacity, in packets.
    pub video_packet_queue: usize,
    /// Decoded frame queue capacity, in frames.
    pub video_frame_queue: usize,
    /// Ring buffer capacity, in bytes.
    pub ring_buffer_bytes: usize,
    /// Sample frames the audio device pulls per callback.
    pub device_frames: u32,
    /// Longest single sleep of the render loop, in microseconds.
    pub max_render_sleep_us: u64,
    /// Ring-full retry policy of the audio decode stage.
    pub audio_backoff: BackoffConfig,
    /// Return from the render loop once both streams have drained.
    pub exit_at_end: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_packet_queue: 500,
            video_packet_queue: 300,
            video_frame_queue: 8,
            ring_buffer_bytes: 240 * DEFAULT_DEVICE_FRAMES as usize,
            device_frames: DEFAULT_DEVICE_FRAMES,
            max_render_sleep_us: 10_000,
            audio_backoff: BackoffConfig::default(),
            exit_at_end: true,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(self) -> Result<Self> {
        let capacities = [
            ("audio_packet_queue", self.audio_packet_queue),
            ("video_packet_queue", self.video_packet_queue),
            ("video_frame_queue", self.video_frame_queue),
            ("ring_buffer_bytes", self.ring_buffer_bytes),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be non-zero")));
        }
        if self.device_frames == 0 {
            return Err(Error::Config("device_frames must be non-zero".into()));
        }
        if self.max_render_sleep_us == 0 {
            return Err(Error::Config("max_render_sleep_us must be non-zero".into()));
        }
        if self.audio_backoff.initial_us == 0 || self.audio_backoff.factor == 0 {
            return Err(Error::Config(
                "audio_backoff needs a non-zero initial sleep and factor".into(),
            ));
        }
        if self.audio_backoff.max_us < self.audio_backoff.initial_us {
            return Err(Error::Config(
                "audio_backoff.max_us is below audio_backoff.initial_us".into(),
            ));
        }
        Ok(self)
    }

    pub const fn max_render_sleep(&self) -> Duration {
        Duration::from_micros(self.max_render_sleep_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.audio_packet_queue, 500);
        assert_eq!(config.video_packet_queue, 300);
        assert_eq!(config.ring_buffer_bytes, 491_520);
        assert_eq!(config.max_render_sleep(), Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = PipelineConfig::from_json(r#"{ "video_frame_queue": 4 }"#).unwrap();
        assert_eq!(config.video_frame_queue, 4);
        assert_eq!(config.audio_packet_queue, 500);
        assert_eq!(config.audio_backoff, BackoffConfig::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = PipelineConfig::from_json(r#"{ "ring_buffer_bytes": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("ring_buffer_bytes"));
    }

    #[test]
    fn test_backoff_bounds_rejected() {
        let config = PipelineConfig {
            audio_backoff: BackoffConfig {
                initial_us: 5_000,
                max_us: 1_000,
                factor: 2,
            },
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
