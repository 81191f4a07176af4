//! Frame store interface and read/prune adapter
//!
//! The external frame store buffers captured frames keyed by capture
//! timestamp (milliseconds from a fixed origin, strictly increasing). The
//! adapter is a thin facade the analysis loop reads and prunes through; it
//! also enforces the capacity policy when the store reports overflow.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Capture timestamp of a buffered frame, the only identity used by the core.
pub type FrameTime = i64;

/// The external frame store.
pub trait FrameStore: Send + Sync {
    fn start_capturing(&self);

    fn stop_capturing(&self);

    /// Buffered capture timestamps in ascending order.
    fn frame_times(&self) -> Vec<FrameTime>;

    /// Delete frames with timestamps strictly less than `frame_time`.
    fn prune_before(&self, frame_time: FrameTime);

    /// Delete the single frame stored under `frame_time`.
    fn prune_one(&self, frame_time: FrameTime);

    /// Delete frames with timestamps in `[from, to)`.
    fn prune_range(&self, from: FrameTime, to: FrameTime);

    fn capacity(&self) -> usize;

    fn is_at_capacity(&self) -> bool;
}

/// Read/prune facade over the frame store.
pub struct FrameSource {
    store: Arc<dyn FrameStore>,
}

impl FrameSource {
    pub fn new(store: Arc<dyn FrameStore>) -> Self {
        Self { store }
    }

    /// Buffered frame timestamps, ascending.
    ///
    /// If the store reports it is at capacity, everything strictly before the
    /// newest frame is dropped first. This loses not-yet-analyzed
    /// intermediate frames (and with them backward-search context) in
    /// exchange for a hard memory ceiling.
    pub fn frame_times(&self) -> Vec<FrameTime> {
        let times = self.store.frame_times();
        if self.store.is_at_capacity() {
            if let Some(&newest) = times.last() {
                log::warn!(
                    "frame store at capacity ({}), dropping {} frames older than {}",
                    self.store.capacity(),
                    times.len().saturating_sub(1),
                    newest
                );
                self.store.prune_before(newest);
                return vec![newest];
            }
        }
        times
    }

    pub fn prune_before(&self, frame_time: FrameTime) {
        self.store.prune_before(frame_time);
    }

    pub fn prune_one(&self, frame_time: FrameTime) {
        self.store.prune_one(frame_time);
    }

    pub fn prune_range(&self, from: FrameTime, to: FrameTime) {
        self.store.prune_range(from, to);
    }

    /// Delete every buffered frame.
    pub fn clear(&self) {
        self.store.prune_before(FrameTime::MAX);
    }

    pub fn start_capturing(&self) {
        self.store.start_capturing();
    }

    pub fn stop_capturing(&self) {
        self.store.stop_capturing();
    }
}

/// In-memory frame store keeping timestamps only.
///
/// Backs sequence replay and the test suites; a host plugin would normally
/// supply its own store holding the actual frame data.
pub struct MemoryFrameStore {
    frames: Mutex<BTreeSet<FrameTime>>,
    capacity: usize,
    capturing: AtomicBool,
}

impl MemoryFrameStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(BTreeSet::new()),
            capacity,
            capturing: AtomicBool::new(false),
        }
    }

    /// Record a captured frame. Ignored while capturing is stopped.
    pub fn push(&self, frame_time: FrameTime) {
        if self.capturing.load(Ordering::SeqCst) {
            self.frames.lock().insert(frame_time);
        }
    }
}

impl FrameStore for MemoryFrameStore {
    fn start_capturing(&self) {
        self.capturing.store(true, Ordering::SeqCst);
    }
    fn stop_capturing(&self) {
        self.capturing.store(false, Ordering::SeqCst);
    }
    fn frame_times(&self) -> Vec<FrameTime> {
        self.frames.lock().iter().copied().collect()
    }
    fn prune_before(&self, frame_time: FrameTime) {
        self.frames.lock().retain(|&t| t >= frame_time);
    }
    fn prune_one(&self, frame_time: FrameTime) {
        self.frames.lock().remove(&frame_time);
    }
    fn prune_range(&self, from: FrameTime, to: FrameTime) {
        self.frames.lock().retain(|&t| t < from || t >= to);
    }
    fn capacity(&self) -> usize {
        self.capacity
    }
    fn is_at_capacity(&self) -> bool {
        self.frames.lock().len() >= self.capacity
    }
}
