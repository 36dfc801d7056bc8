//! Bounded event queues between the simulation thread and the log file.
//!
//! Each queue owns one background thread and the file handle; the caller
//! only ever touches the in-memory buffer.
//!
//! ```text
//!  sim thread                      background thread
//!  ──────────                      ─────────────────
//!  WriteQueue::enqueue ──▶ [buffer] ──▶ encode ──▶ file   (lossy: oldest evicted)
//!  ReadQueue::peek/consume ◀── [buffer] ◀── decode ◀── file (lossless: reader stalls)
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::error;
use pblog_core::Event;

pub mod read;
pub mod write;

pub use read::ReadQueue;
pub use write::WriteQueue;

/// Default capacity of a recording queue
pub const WRITE_QUEUE_CAPACITY: usize = 4096;

/// Default capacity of a replay queue
pub const READ_QUEUE_CAPACITY: usize = 1024;

/// Writes between explicit flushes of the log file
pub const FLUSH_INTERVAL: u64 = 1024;

/// Longest a background thread sleeps without rechecking its stop flag
const IDLE_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Write => write!(f, "write"),
            Direction::Read => write!(f, "read"),
        }
    }
}

/// Counters of a queue, updated by its background thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Events written to or read from the file
    pub processed: u64,
    /// Events evicted before reaching the file
    pub dropped: u64,
    /// Events lost to I/O errors
    pub failed: u64,
}

/// Common surface of both queue directions
pub trait EventChannel {
    fn direction(&self) -> Direction;

    fn path(&self) -> &std::path::Path;

    fn capacity(&self) -> usize;

    /// Events currently buffered in memory
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False when the file could not be opened
    fn is_valid(&self) -> bool;

    fn stats(&self) -> QueueStats;

    /// Stop the background thread and close the file.
    ///
    /// A write queue drains its buffer to disk first. Calling this twice is
    /// harmless; the second call just returns the final counters.
    fn clear(&mut self) -> QueueStats;
}

/// FIFO with a hard capacity
#[derive(Debug)]
pub struct BoundedBuffer {
    events: VecDeque<Event>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(READ_QUEUE_CAPACITY)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    /// Push, evicting the oldest event when full. Returns the evicted event.
    pub fn push_evicting(&mut self, event: Event) -> Option<Event> {
        let evicted = if self.is_full() {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Push only if there is room, handing the event back otherwise
    pub fn try_push(&mut self, event: Event) -> Result<(), Event> {
        if self.is_full() {
            return Err(event);
        }
        self.events.push_back(event);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn front(&self) -> Option<&Event> {
        self.events.front()
    }
}

/// Lock a queue mutex. A panic on the other side cannot leave the buffer
/// half-mutated, so a poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_worker<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to spawn {} thread: {}", name, e);
            None
        }
    }
}

fn join_worker(handle: Option<JoinHandle<()>>, name: &str) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            error!("{} thread panicked", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(i: i64) -> Event {
        Event::new("LOCATION", vec![i as u8], i).unwrap()
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let capacity = 4;
        let mut buffer = BoundedBuffer::new(capacity);

        for i in 0..capacity as i64 {
            assert!(buffer.push_evicting(event(i)).is_none());
        }
        let evicted = buffer.push_evicting(event(capacity as i64)).unwrap();
        assert_eq!(evicted.timestamp_us(), 0);
        assert_eq!(buffer.len(), capacity);

        let remaining: Vec<i64> = std::iter::from_fn(|| buffer.pop_front())
            .map(|e| e.timestamp_us())
            .collect();
        assert_eq!(remaining, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut buffer = BoundedBuffer::new(3);
        for i in 0..100 {
            buffer.push_evicting(event(i));
            assert!(buffer.len() <= 3);
        }
        assert_eq!(buffer.front().map(|e| e.timestamp_us()), Some(97));
    }

    #[test]
    fn test_try_push_rejects_when_full() {
        let mut buffer = BoundedBuffer::new(2);
        assert!(buffer.try_push(event(0)).is_ok());
        assert!(buffer.try_push(event(1)).is_ok());
        let rejected = buffer.try_push(event(2)).unwrap_err();
        assert_eq!(rejected.timestamp_us(), 2);
        assert_eq!(buffer.front().map(|e| e.timestamp_us()), Some(0));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = BoundedBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
