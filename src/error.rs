//! Error types for the autosplitter core

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, SplitterError>;

/// Errors surfaced by lifecycle and configuration operations.
///
/// Recognition failures are deliberately not represented here; a frame the
/// engine cannot classify is normal data (`AnalysisResult::is_successful`)
/// and is recovered from inside the analysis loop.
#[derive(Debug, Error)]
pub enum SplitterError {
    #[error("analysis is already running")]
    AlreadyRunning,

    #[error("unknown game id: {0}")]
    UnknownGame(String),

    #[error("invalid game policy: {0}")]
    InvalidPolicy(String),

    #[error("failed to parse policy file: {0}")]
    PolicyParse(#[from] toml::de::Error),

    #[error("failed to create recognizer: {0}")]
    Recognizer(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
