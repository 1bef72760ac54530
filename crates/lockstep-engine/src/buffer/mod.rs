//! Buffering primitives shared between pipeline threads.

pub mod queue;
pub mod ring;

pub use queue::{BoundedQueue, FrameQueue, PacketQueue, SharedQueue};
pub use ring::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
