//! Analysis settings and recognizer construction

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::recognition::Recognizer;

/// User-facing capture/recognition settings. Changing these recreates the
/// recognition engine under the gateway's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Game variant identifier, e.g. "sonic-1". Also selects the policy.
    pub game_id: String,
    /// Directory with the digit/label template images for this variant.
    pub templates_directory: PathBuf,
    /// Whether the capture is stretched to 16:9.
    #[serde(default)]
    pub stretched: bool,
    /// Composite-video color templates instead of RGB.
    #[serde(default)]
    pub composite: bool,
}

/// Builds recognition engines from settings. The host plugin supplies the
/// real OCR-backed implementation; tests supply scripted ones.
pub trait RecognizerFactory: Send + Sync {
    fn create(&self, settings: &AnalysisSettings) -> Result<Box<dyn Recognizer>>;
}
