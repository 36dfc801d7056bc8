//! Recording queue: lossy buffer drained to disk by a writer thread.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};
use pblog_core::{codec, Event};

use super::{
    join_worker, lock, spawn_worker, BoundedBuffer, Direction, EventChannel, QueueStats,
    FLUSH_INTERVAL, IDLE_WAIT,
};

const THREAD_NAME: &str = "pblog-writer";

struct Shared {
    buffer: Mutex<BoundedBuffer>,
    /// Signalled when an event is pushed or the queue is stopped
    ready: Condvar,
    stop: AtomicBool,
    written: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Queue feeding one log file.
///
/// [`enqueue`](WriteQueue::enqueue) never blocks: when the buffer is full the
/// oldest event is evicted. The writer thread appends events in order and
/// flushes every [`FLUSH_INTERVAL`] records; on [`clear`](EventChannel::clear)
/// whatever is still buffered is written before the file is closed.
pub struct WriteQueue {
    path: PathBuf,
    capacity: usize,
    valid: bool,
    closed: bool,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl WriteQueue {
    /// Create (or truncate) `path` and start the writer thread.
    ///
    /// Never fails. If the file cannot be created the queue is invalid: it
    /// still accepts events, which are counted as failed and discarded.
    pub fn create(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let sink = match File::create(&path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                error!("Cannot create log file {}: {}", path.display(), e);
                None
            }
        };
        Self::start(path, capacity, sink)
    }

    /// Like [`create`](WriteQueue::create), but an unopenable file is an error.
    pub fn try_create(path: impl Into<PathBuf>, capacity: usize) -> io::Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self::start(path, capacity, Some(BufWriter::new(file))))
    }

    fn start(path: PathBuf, capacity: usize, sink: Option<BufWriter<File>>) -> Self {
        let buffer = BoundedBuffer::new(capacity);
        let capacity = buffer.capacity();
        let has_sink = sink.is_some();
        let shared = Arc::new(Shared {
            buffer: Mutex::new(buffer),
            ready: Condvar::new(),
            stop: AtomicBool::new(false),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker = {
            let shared = shared.clone();
            let path = path.clone();
            spawn_worker(THREAD_NAME, move || writer_loop(sink, &shared, &path))
        };
        let valid = has_sink && worker.is_some();

        debug!(
            "Opened {} for writing (capacity {}, valid {})",
            path.display(),
            capacity,
            valid
        );

        Self {
            path,
            capacity,
            valid,
            closed: false,
            shared,
            worker,
        }
    }

    /// Queue an event for writing, evicting the oldest one if the buffer is full.
    pub fn enqueue(&self, event: Event) {
        if self.closed || self.shared.stop.load(Ordering::Acquire) {
            self.record_drop(event.channel());
            return;
        }

        let evicted = lock(&self.shared.buffer).push_evicting(event);
        self.shared.ready.notify_one();

        if let Some(evicted) = evicted {
            self.record_drop(evicted.channel());
        }
    }

    fn record_drop(&self, channel: &str) {
        let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 1000 == 0 {
            warn!(
                "Write queue for {} overloaded, dropped '{}' ({} dropped so far)",
                self.path.display(),
                channel,
                dropped
            );
        }
    }
}

impl EventChannel for WriteQueue {
    fn direction(&self) -> Direction {
        Direction::Write
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        lock(&self.shared.buffer).len()
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn stats(&self) -> QueueStats {
        self.shared.stats()
    }

    fn clear(&mut self) -> QueueStats {
        if !self.closed {
            {
                let _buffer = lock(&self.shared.buffer);
                self.shared.stop.store(true, Ordering::Release);
            }
            self.shared.ready.notify_all();
            join_worker(self.worker.take(), THREAD_NAME);
            self.closed = true;

            let stats = self.stats();
            info!(
                "Closed {}: {} events written, {} dropped, {} failed",
                self.path.display(),
                stats.processed,
                stats.dropped,
                stats.failed
            );
        }
        self.stats()
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.clear();
    }
}

fn writer_loop(mut sink: Option<BufWriter<File>>, shared: &Shared, path: &Path) {
    let mut since_flush = 0u64;

    while let Some(event) = next_event(shared) {
        let Some(writer) = sink.as_mut() else {
            record_failure(shared, path, "log file is not open");
            continue;
        };

        match codec::write_event(writer, &event) {
            Ok(()) => {
                shared.written.fetch_add(1, Ordering::Relaxed);
                since_flush += 1;
                if since_flush >= FLUSH_INTERVAL {
                    since_flush = 0;
                    if let Err(e) = writer.flush() {
                        error!("Failed to flush {}: {}", path.display(), e);
                    }
                }
            }
            Err(e) => record_failure(shared, path, &e.to_string()),
        }
    }

    if let Some(mut writer) = sink {
        if let Err(e) = writer.flush() {
            error!("Failed to flush {}: {}", path.display(), e);
        }
    }
    debug!("Writer for {} finished", path.display());
}

/// Next buffered event, or `None` once stopped and drained
fn next_event(shared: &Shared) -> Option<Event> {
    let mut buffer = lock(&shared.buffer);
    loop {
        if let Some(event) = buffer.pop_front() {
            return Some(event);
        }
        if shared.stop.load(Ordering::Acquire) {
            return None;
        }
        buffer = shared
            .ready
            .wait_timeout(buffer, IDLE_WAIT)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

fn record_failure(shared: &Shared, path: &Path, reason: &str) {
    let failed = shared.failed.fetch_add(1, Ordering::Relaxed) + 1;
    if failed == 1 || failed % 1000 == 0 {
        error!(
            "Lost event for {}: {} ({} lost so far)",
            path.display(),
            reason,
            failed
        );
    }
}
