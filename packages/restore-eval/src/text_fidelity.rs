//! Text fidelity: how well the text in a region survives restoration,
//! judged from recognized strings rather than pixels.
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use restore_eval_ocr::{OcrEngine, OcrInput, OcrOutput};
use tokio::sync::Semaphore;

use crate::error::{EvalError, Result};
use crate::region_metrics::RegionCrop;
use crate::sequence_matcher::sequence_ratio;

const BACKEND: &str = "recognition";

/// What the prediction's recognized text is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFidelityMode {
    /// Text recognized in the ground-truth crop.
    #[default]
    CrossImage,
    /// Text recognized in the prediction crop a second time, so both sides
    /// come from the prediction. Kept for comparability with older reports.
    PredictionOnly,
    /// The region's annotated text.
    AnnotationText,
}

impl TextFidelityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossImage => "cross-image",
            Self::PredictionOnly => "prediction-only",
            Self::AnnotationText => "annotation-text",
        }
    }
}

/// Shared access to a recognizer with bounded concurrency and a per-call timeout.
#[derive(Clone)]
pub struct RecognizerHandle {
    engine: Arc<dyn OcrEngine>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl RecognizerHandle {
    pub fn new(engine: Arc<dyn OcrEngine>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Recognized strings of `image`, concatenated in detection order and trimmed.
    pub async fn recognize_text(&self, image: &RgbImage) -> Result<String> {
        let input = OcrInput::Bytes(encode_png(image)?);
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EvalError::dependency(BACKEND, e))?;
        let output = tokio::time::timeout(self.timeout, self.engine.recognize(&input))
            .await
            .map_err(|_| {
                EvalError::dependency(BACKEND, format!("no answer within {:?}", self.timeout))
            })?
            .map_err(|e| EvalError::dependency(BACKEND, e))?;
        Ok(concat_recognized(&output))
    }

    /// Similarity of the prediction's text to the reference chosen by `mode`.
    pub async fn score_region(&self, crop: &RegionCrop, mode: TextFidelityMode) -> Result<f64> {
        let predicted = self.recognize_text(&crop.prediction).await?;
        let reference = match mode {
            TextFidelityMode::CrossImage => self.recognize_text(&crop.ground_truth).await?,
            TextFidelityMode::PredictionOnly => self.recognize_text(&crop.prediction).await?,
            TextFidelityMode::AnnotationText => crop.text.trim().to_string(),
        };
        Ok(sequence_ratio(&predicted, &reference))
    }
}

/// Detected strings joined without a separator, surrounding whitespace removed.
pub fn concat_recognized(output: &OcrOutput) -> String {
    output.concatenated().trim().to_string()
}

/// Encodes a crop as PNG for engines that take encoded images.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| EvalError::dependency(BACKEND, format!("cannot encode crop: {e}")))?;
    Ok(buffer.into_inner())
}
