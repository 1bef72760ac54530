//! # lockstep-media
//!
//! Concrete collaborators for the Lockstep engine.
//!
//! Features:
//! - Synthetic tone + color-bar source for running without media files
//! - Symphonia-based audio file demuxing and decoding
//! - Rubato resampling and s16 conversion for the output device
//! - A real-time null output device, and cpal output behind the `cpal` feature

pub mod device;
pub mod file;
pub mod filter;
pub mod interleave;
pub mod synthetic;

pub use device::NullAudioDevice;
#[cfg(feature = "cpal")]
pub use device::CpalAudioDevice;
pub use file::{file_source, FileAudioSource};
pub use filter::S16Filter;
pub use interleave::Interleave;
pub use synthetic::{synthetic_source, SyntheticConfig, AUDIO_STREAM, VIDEO_STREAM};
