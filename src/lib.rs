//! Vision-based autosplitter core.
//!
//! Reconstructs in-game time from OCR'd video frames of a running game and
//! drives a speedrun timer from it: starting the run, setting game time,
//! splitting on stage ends, and undoing splits that turn out to be premature.
//!
//! The crate is host- and vision-agnostic. The embedding plugin supplies a
//! [`frames::FrameStore`] buffering captured frames, a
//! [`settings::RecognizerFactory`] producing the OCR engine, and a
//! [`host::TimerHost`] bound to the actual timer; everything in between —
//! the periodic analysis loop, the consistency filtering, the transition
//! searches and the split logic — lives here, centered on
//! [`timeline::SegmentTimeline`] and wired up by [`analyzer::FrameAnalyzer`].

pub mod analyzer;
pub mod error;
pub mod frames;
pub mod host;
pub mod observers;
pub mod policy;
pub mod recognition;
pub mod settings;
pub mod task;
pub mod timeline;

pub use analyzer::FrameAnalyzer;
pub use error::{Result, SplitterError};
pub use frames::{FrameSource, FrameStore, FrameTime, MemoryFrameStore};
pub use host::{CommandSink, HostCommand, HostSnapshot, HostStateMirror, TimerHost};
pub use observers::{ObserverRegistry, ResultObserver};
pub use policy::{GamePolicy, PolicyTable};
pub use recognition::{AnalysisResult, ErrorReason, RecognitionGateway, Recognizer};
pub use settings::{AnalysisSettings, RecognizerFactory};
pub use task::PeriodicTask;
pub use timeline::SegmentTimeline;
