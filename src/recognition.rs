//! Recognition engine interface and gateway
//!
//! The recognition engine is an external, possibly-wrong oracle that turns a
//! captured frame into a classified `AnalysisResult`. The gateway serializes
//! all calls into it behind a fair lock so that a settings-driven engine swap
//! can never tear the engine down mid-analysis, and a continuous stream of
//! analysis ticks can never starve a pending swap.

use parking_lot::{FairMutex, FairMutexGuard};

use crate::frames::FrameTime;

/// Why the engine could not produce a reading for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorReason {
    #[default]
    None,
    /// The frame was classified but no timer digits were legible.
    NoTimeOnScreen,
    /// The capture source produced nothing (disconnected, black feed).
    VideoDisconnected,
}

/// Per-frame classification produced by the recognition engine.
///
/// A score screen also carries recognized digits; black/white screens do not.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Capture timestamp of the analyzed frame; the frame's only identity.
    pub frame_time: FrameTime,
    /// On-screen timer converted to milliseconds, if the digits were legible.
    pub recognized_time: Option<i64>,
    /// The raw on-screen string, e.g. `1'08"23`. Diagnostics only.
    pub time_string: String,
    /// End-of-stage results display.
    pub is_score_screen: bool,
    /// Ordinary stage transition screen.
    pub is_black_screen: bool,
    /// Special-stage / time-travel transition screen.
    pub is_white_screen: bool,
    /// False when the engine could not classify the frame at all.
    pub is_successful: bool,
    pub error_reason: ErrorReason,
    /// Optional rendering of what the engine matched. Diagnostics only.
    pub visualization: Option<Vec<u8>>,
}

impl AnalysisResult {
    /// A result for a frame the engine could not classify.
    pub fn unsuccessful(frame_time: FrameTime, reason: ErrorReason) -> Self {
        Self {
            frame_time,
            recognized_time: None,
            time_string: String::new(),
            is_score_screen: false,
            is_black_screen: false,
            is_white_screen: false,
            is_successful: false,
            error_reason: reason,
            visualization: None,
        }
    }

    /// A successful result with recognized timer digits.
    pub fn with_time(frame_time: FrameTime, time_ms: i64) -> Self {
        Self {
            frame_time,
            recognized_time: Some(time_ms),
            time_string: String::new(),
            is_score_screen: false,
            is_black_screen: false,
            is_white_screen: false,
            is_successful: true,
            error_reason: ErrorReason::None,
            visualization: None,
        }
    }

    /// A successful result for a single-color transition screen.
    pub fn transition(frame_time: FrameTime, white: bool) -> Self {
        Self {
            frame_time,
            recognized_time: None,
            time_string: String::new(),
            is_score_screen: false,
            is_black_screen: !white,
            is_white_screen: white,
            is_successful: true,
            error_reason: ErrorReason::None,
            visualization: None,
        }
    }

    /// The recognized reading, if the frame was classified and digits were legible.
    pub fn recognized(&self) -> Option<i64> {
        if self.is_successful {
            self.recognized_time
        } else {
            None
        }
    }
}

/// The external recognition engine.
///
/// Implementations are expected to cache digit-location heuristics between
/// calls; `recalibrate` discards those caches so the next `analyze`
/// re-searches the frame from scratch.
pub trait Recognizer: Send {
    /// Classify the frame stored under `frame_time`.
    fn analyze(
        &mut self,
        frame_time: FrameTime,
        check_for_score_screen: bool,
        visualize: bool,
    ) -> AnalysisResult;

    /// Discard cached digit-location heuristics.
    fn recalibrate(&mut self);

    /// Probe the newest frame for the game's reset screen.
    fn check_for_reset_screen(&mut self) -> bool;
}

/// Serializes access to the engine instance.
///
/// Analysis ticks hold the guard for their whole duration; a settings change
/// swaps the engine under the same lock, so ticks never observe a torn
/// engine. The fair (ticket-ordered) unlock guarantees a pending swap is not
/// starved by back-to-back ticks.
pub struct RecognitionGateway {
    engine: FairMutex<Box<dyn Recognizer>>,
}

impl RecognitionGateway {
    pub fn new(engine: Box<dyn Recognizer>) -> Self {
        Self {
            engine: FairMutex::new(engine),
        }
    }

    /// Acquire the engine for a full analysis tick (or a reset-screen probe).
    pub fn lock(&self) -> FairMutexGuard<'_, Box<dyn Recognizer>> {
        self.engine.lock()
    }

    /// Swap the underlying engine instance. Blocks until no analysis call is
    /// in flight.
    pub fn replace(&self, engine: Box<dyn Recognizer>) {
        let mut slot = self.engine.lock();
        *slot = engine;
        log::info!("recognition engine replaced");
    }
}
