//! Blocking bounded FIFO shared by one producer and one consumer thread.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use lockstep_core::{Error, Packet, Result, StreamItem, VideoFrame};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct State<T> {
    items: VecDeque<T>,
    aborted: bool,
}

/// Bounded blocking queue with a one-way abort.
///
/// `put` waits while the queue is full, `get` waits while it is empty.
/// After `abort` neither waits again: `put` fails, and `get` hands out what
/// is left before failing.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                aborted: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item, waiting for room if the queue is full.
    pub fn put(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.aborted {
            self.not_full.wait(&mut state);
        }
        if state.aborted {
            return Err(Error::Aborted);
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, waiting for one if the queue is empty.
    pub fn get(&self) -> Result<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.aborted {
            self.not_empty.wait(&mut state);
        }

        let item = state.items.pop_front().ok_or(Error::Aborted)?;
        drop(state);
        self.not_full.notify_one();
        Ok(item)
    }

    /// Like [`get`](Self::get), but gives up after `timeout` and returns
    /// `None` if nothing arrived.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.aborted {
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.not_full.notify_one();
                Ok(Some(item))
            }
            None if state.aborted => Err(Error::Aborted),
            None => Ok(None),
        }
    }

    /// Shut the queue down and wake every waiter. Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.aborted {
            state.aborted = true;
            debug!("{}: aborted with {} items queued", self.name, state.items.len());
        }
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Current item count. Advisory: may be stale as soon as it returns.
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}

/// Compressed packets for one stream.
pub type PacketQueue = BoundedQueue<StreamItem<Packet>>;

/// Decoded pictures waiting for the render loop.
pub type FrameQueue = BoundedQueue<StreamItem<VideoFrame>>;

/// Thread-safe reference to a queue.
pub type SharedQueue<T> = Arc<BoundedQueue<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new("test", 4);
        queue.put(1).unwrap();
        queue.put(2).unwrap();
        queue.put(3).unwrap();
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.capacity(), 4);

        assert_eq!(queue.get().unwrap(), 1);
        assert_eq!(queue.get().unwrap(), 2);
        assert_eq!(queue.get().unwrap(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_put_blocks_until_get_then_abort() {
        let queue = Arc::new(BoundedQueue::new("test", 2));
        queue.put('a').unwrap();
        queue.put('b').unwrap();

        // Third put blocks until a get frees a slot.
        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let result = queue.put('c');
                tx.send(result.is_ok()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(queue.get().unwrap(), 'a');
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        producer.join().unwrap();
        assert_eq!(queue.size(), 2);

        // A fourth put blocks on the full queue and is released by abort.
        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                tx.send(queue.put('d')).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        queue.abort();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
        producer.join().unwrap();
    }

    #[test]
    fn test_get_on_empty_released_by_abort() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new("test", 3));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.get())
        };
        thread::sleep(Duration::from_millis(50));
        queue.abort();
        assert!(matches!(consumer.join().unwrap(), Err(Error::Aborted)));
    }

    #[test]
    fn test_get_timeout() {
        let queue = Arc::new(BoundedQueue::new("test", 2));
        let started = Instant::now();
        assert_eq!(queue.get_timeout(Duration::from_millis(20)).unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(20));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.put(5).unwrap();
            })
        };
        assert_eq!(queue.get_timeout(Duration::from_secs(5)).unwrap(), Some(5));
        producer.join().unwrap();

        queue.put(6).unwrap();
        queue.abort();
        assert_eq!(queue.get_timeout(Duration::ZERO).unwrap(), Some(6));
        assert!(matches!(queue.get_timeout(Duration::from_secs(5)), Err(Error::Aborted)));
    }

    #[test]
    fn test_aborted_queue_drains() {
        let queue = BoundedQueue::new("test", 3);
        queue.put(StreamItem::Data(10)).unwrap();
        queue.put(StreamItem::EndOfStream).unwrap();
        queue.abort();
        queue.abort();

        assert!(queue.is_aborted());
        assert!(matches!(queue.put(StreamItem::Data(11)), Err(Error::Aborted)));
        assert_eq!(queue.get().unwrap(), StreamItem::Data(10));
        assert_eq!(queue.get().unwrap(), StreamItem::EndOfStream);
        assert!(matches!(queue.get(), Err(Error::Aborted)));
    }

    #[test]
    fn test_producer_consumer_threads() {
        let queue = Arc::new(BoundedQueue::new("test", 5));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    queue.put(StreamItem::Data(i)).unwrap();
                }
                queue.put(StreamItem::EndOfStream).unwrap();
            })
        };

        let mut received = Vec::new();
        loop {
            assert!(queue.size() <= 5);
            match queue.get().unwrap() {
                StreamItem::Data(i) => received.push(i),
                StreamItem::EndOfStream => break,
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..1000).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn prop_count_bounded_and_fifo(
            capacity in 1usize..8,
            ops in proptest::collection::vec(any::<bool>(), 0..200),
        ) {
            // true = put if not full, false = get if not empty; never blocks.
            let queue = BoundedQueue::new("prop", capacity);
            let mut next = 0u32;
            let mut expected = VecDeque::new();

            for op in ops {
                if op && queue.size() < capacity {
                    queue.put(next).unwrap();
                    expected.push_back(next);
                    next += 1;
                } else if !op && !queue.is_empty() {
                    prop_assert_eq!(queue.get().unwrap(), expected.pop_front().unwrap());
                }
                prop_assert!(queue.size() <= capacity);
                prop_assert_eq!(queue.size(), expected.len());
            }
        }
    }
}
