//! Replay queue: lossless buffer filled from disk by a reader thread.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use pblog_core::{codec, Event};

use super::{
    join_worker, lock, spawn_worker, BoundedBuffer, Direction, EventChannel, QueueStats,
    IDLE_WAIT,
};

const THREAD_NAME: &str = "pblog-reader";

struct ReadState {
    buffer: BoundedBuffer,
    /// The reader thread has exited; nothing more will be pushed
    finished: bool,
}

struct Shared {
    state: Mutex<ReadState>,
    not_empty: Condvar,
    not_full: Condvar,
    stop: AtomicBool,
    read: AtomicU64,
    failed: AtomicU64,
}

/// Queue fed from one log file.
///
/// The reader thread never drops an event: when the buffer is full it waits
/// for the consumer. The consumer side never blocks except in
/// [`wait`](ReadQueue::wait).
pub struct ReadQueue {
    path: PathBuf,
    capacity: usize,
    valid: bool,
    closed: bool,
    /// Event taken off the buffer by `peek` but not yet consumed
    front: Option<Event>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ReadQueue {
    /// Open `path` and start the reader thread.
    ///
    /// Never fails. If the file cannot be opened the queue is invalid and
    /// behaves as an already exhausted stream.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let source = match File::open(&path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) => {
                error!("Cannot open log file {}: {}", path.display(), e);
                None
            }
        };
        Self::start(path, capacity, source)
    }

    /// Like [`open`](ReadQueue::open), but an unopenable file is an error.
    pub fn try_open(path: impl Into<PathBuf>, capacity: usize) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self::start(path, capacity, Some(BufReader::new(file))))
    }

    fn start(path: PathBuf, capacity: usize, source: Option<BufReader<File>>) -> Self {
        let buffer = BoundedBuffer::new(capacity);
        let capacity = buffer.capacity();
        let has_source = source.is_some();
        let shared = Arc::new(Shared {
            state: Mutex::new(ReadState {
                buffer,
                finished: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            stop: AtomicBool::new(false),
            read: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker = {
            let shared = shared.clone();
            let path = path.clone();
            spawn_worker(THREAD_NAME, move || reader_loop(source, &shared, &path))
        };
        if worker.is_none() {
            lock(&shared.state).finished = true;
        }
        let valid = has_source && worker.is_some();

        debug!(
            "Opened {} for reading (capacity {}, valid {})",
            path.display(),
            capacity,
            valid
        );

        Self {
            path,
            capacity,
            valid,
            closed: false,
            front: None,
            shared,
            worker,
        }
    }

    /// The next event without removing it, `None` if nothing is buffered yet.
    pub fn peek(&mut self) -> Option<&Event> {
        if self.front.is_none() {
            self.front = self.pop();
        }
        self.front.as_ref()
    }

    /// Remove and return the next event, `None` if nothing is buffered yet.
    pub fn consume(&mut self) -> Option<Event> {
        self.front.take().or_else(|| self.pop())
    }

    /// Block up to `timeout` for an event. Returns true if one is available,
    /// false on timeout or when the stream is exhausted.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if self.front.is_some() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(event) = state.buffer.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                self.front = Some(event);
                return true;
            }
            if state.finished {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// True once every event in the file has been consumed, or the file
    /// could not be read at all.
    pub fn is_exhausted(&self) -> bool {
        if self.front.is_some() {
            return false;
        }
        let state = lock(&self.shared.state);
        state.finished && state.buffer.is_empty()
    }

    fn pop(&self) -> Option<Event> {
        let event = lock(&self.shared.state).buffer.pop_front();
        if event.is_some() {
            self.shared.not_full.notify_one();
        }
        event
    }
}

impl EventChannel for ReadQueue {
    fn direction(&self) -> Direction {
        Direction::Read
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        lock(&self.shared.state).buffer.len() + usize::from(self.front.is_some())
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.shared.read.load(Ordering::Relaxed),
            dropped: 0,
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    fn clear(&mut self) -> QueueStats {
        if !self.closed {
            {
                let _state = lock(&self.shared.state);
                self.shared.stop.store(true, Ordering::Release);
            }
            self.shared.not_full.notify_all();
            join_worker(self.worker.take(), THREAD_NAME);

            {
                let mut state = lock(&self.shared.state);
                state.buffer = BoundedBuffer::new(self.capacity);
                state.finished = true;
            }
            self.front = None;
            self.closed = true;

            let stats = self.stats();
            info!(
                "Closed {}: {} events read, {} failed",
                self.path.display(),
                stats.processed,
                stats.failed
            );
        }
        self.stats()
    }
}

impl Drop for ReadQueue {
    fn drop(&mut self) {
        self.clear();
    }
}

fn reader_loop(source: Option<BufReader<File>>, shared: &Shared, path: &Path) {
    if let Some(mut reader) = source {
        loop {
            let event = match codec::read_event(&mut reader) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("Reached end of {}", path.display());
                    break;
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Stopped reading {}: {}", path.display(), e);
                    break;
                }
            };

            if !push_blocking(shared, event) {
                debug!("Reader for {} stopped", path.display());
                break;
            }
            shared.read.fetch_add(1, Ordering::Relaxed);
        }
    }

    lock(&shared.state).finished = true;
    shared.not_empty.notify_all();
}

/// Push an event, waiting while the buffer is full. False if stopped first.
fn push_blocking(shared: &Shared, event: Event) -> bool {
    let mut pending = event;
    let mut state = lock(&shared.state);
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return false;
        }
        match state.buffer.try_push(pending) {
            Ok(()) => {
                drop(state);
                shared.not_empty.notify_one();
                return true;
            }
            Err(event) => {
                pending = event;
                state = shared
                    .not_full
                    .wait_timeout(state, IDLE_WAIT)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}
