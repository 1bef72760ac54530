//! Core domain types for Lockstep.

pub mod media;
pub mod time;

pub use media::{AudioBlock, Packet, StreamId, StreamItem, StreamKind, VideoFrame};
pub use time::{AudioSpec, TimeBase, MICROS_PER_SECOND};
