//! Host timer command relay and observed host state
//!
//! Commands to the host run controller are dispatched from a dedicated
//! thread, fire-and-forget with per-call-site ordering preserved. The
//! analysis thread only enqueues; it never waits for the host, because the
//! host may itself be blocked waiting for analysis to stop (settings
//! teardown). Awaiting the host from the analysis thread is therefore
//! structurally impossible, not just avoided.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::Result;

/// The external run controller (segment list, timer display).
pub trait TimerHost: Send {
    fn start(&self);
    fn split(&self);
    fn undo_split(&self);
    fn reset(&self);
    fn set_game_time(&self, ms: i64);
    fn set_game_time_paused(&self, paused: bool);
}

/// A command the state machine decided to send to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Start,
    Split,
    UndoSplit,
    Reset,
    SetGameTime(i64),
    SetGameTimePaused(bool),
}

/// Anything that accepts host commands. The state machine emits through this
/// seam; production wiring points it at the asynchronous `HostRelay`.
pub trait CommandSink {
    fn send(&self, command: HostCommand);
}

/// Marshals commands to the host on a dedicated dispatcher thread.
pub struct HostRelay {
    tx: Mutex<Option<Sender<HostCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HostRelay {
    pub fn new(host: Box<dyn TimerHost>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<HostCommand>();
        let worker = thread::Builder::new()
            .name("host-relay".to_string())
            .spawn(move || {
                for command in rx {
                    log::debug!("dispatching host command: {:?}", command);
                    deliver(&*host, command);
                }
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Close the channel and wait for queued commands to drain.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl CommandSink for HostRelay {
    fn send(&self, command: HostCommand) {
        if let Some(tx) = &*self.tx.lock() {
            let _ = tx.send(command);
        }
    }
}

impl Drop for HostRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver(host: &dyn TimerHost, command: HostCommand) {
    match command {
        HostCommand::Start => host.start(),
        HostCommand::Split => host.split(),
        HostCommand::UndoSplit => host.undo_split(),
        HostCommand::Reset => host.reset(),
        HostCommand::SetGameTime(ms) => host.set_game_time(ms),
        HostCommand::SetGameTimePaused(paused) => host.set_game_time_paused(paused),
    }
}

/// Read-only mirror of the host's run position, updated by a narrow event
/// listener so the analysis loop never touches host UI state directly.
pub struct HostStateMirror {
    current_split_index: AtomicI32,
    segment_count: AtomicUsize,
}

/// The host state as observed at the start of one analysis tick.
#[derive(Debug, Clone, Copy)]
pub struct HostSnapshot {
    /// Index of the segment the run is on; -1 when the run has not started.
    pub current_split_index: i32,
    pub segment_count: usize,
}

impl HostSnapshot {
    /// Whether the run is on its final segment.
    pub fn on_last_segment(&self) -> bool {
        self.current_split_index >= 0
            && self.segment_count > 0
            && self.current_split_index as usize == self.segment_count - 1
    }
}

impl HostStateMirror {
    pub fn new() -> Self {
        Self {
            current_split_index: AtomicI32::new(-1),
            segment_count: AtomicUsize::new(0),
        }
    }

    pub fn set_current_split_index(&self, index: i32) {
        self.current_split_index.store(index, Ordering::SeqCst);
    }

    pub fn set_segment_count(&self, count: usize) {
        self.segment_count.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            current_split_index: self.current_split_index.load(Ordering::SeqCst),
            segment_count: self.segment_count.load(Ordering::SeqCst),
        }
    }
}

impl Default for HostStateMirror {
    fn default() -> Self {
        Self::new()
    }
}
