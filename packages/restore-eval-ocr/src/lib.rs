//! Text-recognition capability for restore-eval.
//!
//! The evaluator only depends on the [`OcrEngine`] trait; [`CommandOcrEngine`]
//! is the bundled backend that drives an external recognizer process.

pub mod command;
pub mod engine;
pub mod region;

pub use command::{CommandOcrEngine, OutputFormat};
pub use engine::{OcrEngine, OcrError, OcrInput, OcrOutput};
pub use region::{BoundingBox, TextRegion};
