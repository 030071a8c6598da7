//! # restore-eval
//!
//! Scores restored (deblurred or upscaled) images against their ground truth,
//! over the whole image and inside annotated text regions, and writes one CSV
//! row per image pair.
//!
//! ## Features
//!
//! - **Pairing**: positional pairing of sorted directory listings, or keyed by file stem
//! - **Alignment**: predictions are resampled (bicubic) to the ground-truth size
//! - **Pixel Metrics**: PSNR and windowed SSIM, globally and per region
//! - **Perceptual Distance**: pluggable backend, ONNX Runtime behind the `onnx` feature
//! - **Text Fidelity**: recognized-text similarity through any [`restore_eval_ocr::OcrEngine`]
//! - **Ordered Reports**: rows stream to CSV in pair order while pairs run concurrently
//!
//! ## Quick Start
//!
//! ```ignore
//! use restore_eval::prelude::*;
//!
//! let options = EvaluationOptions {
//!     gt_dir: "data/gt".into(),
//!     pred_dir: "data/pred".into(),
//!     box_dir: "data/boxes".into(),
//!     ..Default::default()
//! };
//!
//! let result = Evaluator::new(options).run().await?;
//! for row in &result.rows {
//!     println!("{}: {:?}", row.image, row.global.get(Metric::Psnr));
//! }
//! ```

pub mod alignment;
pub mod annotation;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod pairing;
pub mod region_metrics;
pub mod report;
pub mod sequence_matcher;
pub mod text_fidelity;

// Re-export commonly used types at the root level
pub use alignment::{align_to, decode_rgb, load_pair, AlignedPair};
pub use annotation::{load_annotations, parse_annotations, BoundingBox, PixelRect, RegionAnnotation};
pub use error::{EvalError, Result};
pub use evaluator::{EvaluationOptions, EvaluationResult, Evaluator};
pub use metrics::perceptual::{PerceptualBackbone, PerceptualDistance, SignedUnitImage};
pub use metrics::{compute_pixel_metrics, Metric, MetricConfiguration, MetricResult, Scope};
pub use pairing::{resolve_pairs, ImagePairPaths, PairingOptions, PairingStrategy};
pub use region_metrics::{crop_regions, RegionCrop};
pub use report::{columns_for, write_report, RegionReport, ReportColumn, ReportRow, ReportWriter};
pub use sequence_matcher::sequence_ratio;
pub use text_fidelity::TextFidelityMode;

#[cfg(feature = "onnx")]
pub use metrics::perceptual::OnnxPerceptualDistance;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```ignore
/// use restore_eval::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        columns_for, sequence_ratio, write_report, EvalError, EvaluationOptions, EvaluationResult,
        Evaluator, Metric, MetricConfiguration, MetricResult, PairingOptions, PairingStrategy,
        PerceptualBackbone, PerceptualDistance, RegionAnnotation, ReportRow, SignedUnitImage,
        TextFidelityMode,
    };
}
