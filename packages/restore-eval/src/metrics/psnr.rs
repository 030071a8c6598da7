//! Peak signal-to-noise ratio over the full 8-bit range.
use image::RgbImage;

use crate::error::{EvalError, Result};

pub const PEAK: f64 = 255.0;

/// `10 * log10(PEAK^2 / MSE)` over every channel of every pixel.
///
/// Bit-identical inputs have no error to measure; they yield
/// `f64::INFINITY`, which reports serialize as `inf`.
pub fn psnr(ground_truth: &RgbImage, prediction: &RgbImage) -> Result<f64> {
    if ground_truth.dimensions() != prediction.dimensions() {
        return Err(EvalError::metric(
            "psnr",
            format!(
                "dimension mismatch {:?} vs {:?}",
                ground_truth.dimensions(),
                prediction.dimensions()
            ),
        ));
    }
    let samples = ground_truth.as_raw().len();
    if samples == 0 {
        return Err(EvalError::metric("psnr", "empty image"));
    }

    let squared_error: f64 = ground_truth
        .as_raw()
        .iter()
        .zip(prediction.as_raw())
        .map(|(&a, &b)| {
            let diff = f64::from(a) - f64::from(b);
            diff * diff
        })
        .sum();

    if squared_error == 0.0 {
        return Ok(f64::INFINITY);
    }
    let mse = squared_error / samples as f64;
    Ok(10.0 * (PEAK * PEAK / mse).log10())
}
