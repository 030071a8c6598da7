use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::region::TextRegion;

/// Image handed to an engine. `Bytes` carries an encoded image (PNG for crops).
#[derive(Debug, Clone)]
pub enum OcrInput {
    FilePath(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    /// Recognized strings joined with newlines, for display.
    pub text: String,
    pub regions: Vec<TextRegion>,
}

impl OcrOutput {
    pub fn from_regions(regions: Vec<TextRegion>) -> Self {
        let text = regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { text, regions }
    }

    /// Recognized strings in detection order, concatenated with no separator.
    pub fn concatenated(&self) -> String {
        self.regions.iter().map(|r| r.text.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("unsupported operation")]
    Unsupported,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("engine error: {0}")]
    EngineError(String),
    #[error("failed to run recognizer: {0}")]
    Io(#[from] std::io::Error),
}

/// A text-recognition capability. Implementations may be heavyweight and
/// single-instance; callers decide how many calls run at once.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError>;
}
