//! # lockstep-engine
//!
//! Multi-threaded audio/video synchronization engine for Lockstep.
//!
//! Features:
//! - Blocking bounded queues for packets and decoded frames
//! - Non-blocking byte ring buffer between audio decode and output
//! - Audio-mastered sync clock driving video presentation
//! - Reader, decode, and render stages with abort-based shutdown

pub mod backoff;
pub mod buffer;
pub mod clock;
pub mod engine;
pub mod pipeline;
pub mod source;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use clock::{correct_delay, SharedSyncClock, SyncClock};
pub use engine::{Player, ShutdownHandle};
pub use pipeline::{
    AudioCallback, ExitReason, PlaybackSummary, PlayerEvent, RenderExit, Stage,
};
pub use source::{
    AudioDecoder, AudioDevice, AudioFilter, AudioStream, Demuxer, MediaSource, SinkEvent,
    VideoDecoder, VideoSink, VideoStream,
};
