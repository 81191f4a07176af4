//! Analysis result publish/subscribe registry
//!
//! Every `AnalysisResult`, successful or not, is delivered to zero or more
//! subscribers (diagnostics, preview, the on-screen time display). The
//! registry is owned by one analyzer instance; there is no process-wide
//! consumer set.

use parking_lot::Mutex;

use crate::recognition::AnalysisResult;

/// A subscriber to per-frame analysis results.
pub trait ResultObserver: Send {
    /// Called for every analyzed frame. Return `false` to be unsubscribed.
    fn on_frame_analyzed(&self, result: &AnalysisResult) -> bool;

    /// Whether this observer wants the visualization payload produced.
    fn wants_visualization(&self) -> bool {
        false
    }
}

/// Registry of result observers, scoped to one analyzer.
pub struct ObserverRegistry {
    observers: Mutex<Vec<Box<dyn ResultObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Box<dyn ResultObserver>) {
        self.observers.lock().push(observer);
    }

    /// Deliver a result to all observers, dropping the ones that decline
    /// further delivery.
    pub fn publish(&self, result: &AnalysisResult) {
        self.observers.lock().retain(|o| o.on_frame_analyzed(result));
    }

    /// Whether any subscriber wants visualization payloads.
    pub fn wants_visualization(&self) -> bool {
        self.observers.lock().iter().any(|o| o.wants_visualization())
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
