//! Byte ring buffer between the audio decode thread and the output callback.
//!
//! Transfers are partial: `push` writes as much as fits and `pull` reads as
//! much as is buffered. Neither ever blocks, so the device callback always
//! returns on time and the producer picks its own retry policy.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use lockstep_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Inner {
    buffer: Box<[u8]>,
    /// Next byte to read.
    read_pos: usize,
    /// Next byte to write.
    write_pos: usize,
    /// Bytes buffered, in `[0, capacity]`.
    available: usize,
}

/// Fixed-capacity circular byte store for interleaved PCM.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    aborted: AtomicBool,
}

impl RingBuffer {
    /// Create a new ring buffer holding exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                available: 0,
            }),
            capacity,
            aborted: AtomicBool::new(false),
        }
    }

    /// Get the buffer capacity in bytes.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of bytes available for reading.
    pub fn available(&self) -> usize {
        self.inner.lock().available
    }

    /// Get the number of bytes that can be written.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Write bytes to the buffer.
    ///
    /// Returns the number of bytes written, which is 0 when the buffer is
    /// full. Fails with `Aborted` once the buffer has been aborted.
    pub fn push(&self, data: &[u8]) -> Result<usize> {
        if self.is_aborted() {
            return Err(Error::Aborted);
        }

        let mut inner = self.inner.lock();
        let to_write = data.len().min(self.capacity - inner.available);
        if to_write == 0 {
            return Ok(0);
        }

        let start = inner.write_pos;
        let first_chunk = to_write.min(self.capacity - start);
        inner.buffer[start..start + first_chunk].copy_from_slice(&data[..first_chunk]);
        if first_chunk < to_write {
            // Wrap-around write
            inner.buffer[..to_write - first_chunk].copy_from_slice(&data[first_chunk..to_write]);
        }

        inner.write_pos = (start + to_write) % self.capacity;
        inner.available += to_write;

        Ok(to_write)
    }

    /// Read bytes from the buffer.
    ///
    /// Returns the number of bytes read, which is 0 when nothing is buffered.
    /// An aborted buffer keeps handing out what it holds and fails with
    /// `Aborted` only once it is empty.
    pub fn pull(&self, output: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let to_read = output.len().min(inner.available);
        if to_read == 0 {
            return if self.is_aborted() {
                Err(Error::Aborted)
            } else {
                Ok(0)
            };
        }

        let start = inner.read_pos;
        let first_chunk = to_read.min(self.capacity - start);
        output[..first_chunk].copy_from_slice(&inner.buffer[start..start + first_chunk]);
        if first_chunk < to_read {
            // Wrap-around read
            output[first_chunk..to_read].copy_from_slice(&inner.buffer[..to_read - first_chunk]);
        }

        inner.read_pos = (start + to_read) % self.capacity;
        inner.available -= to_read;

        Ok(to_read)
    }

    /// Shut the buffer down. Buffered bytes stay readable.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

/// Thread-safe reference to a ring buffer.
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer.
pub fn shared_ring_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
