//! Mean structural similarity with a uniform window.
//!
//! Each channel is scored separately and the channel means are averaged.
//! Local statistics use a 7x7 uniform window with sample covariance, and the
//! mean is taken over the positions where the whole window lies inside the
//! image. Filtering with a reflected border and then discarding a 3-pixel
//! margin gives the same value, so the border convention is identical for
//! both inputs and for crops of any size of at least 7x7.
use image::RgbImage;

use crate::error::{EvalError, Result};

pub const WINDOW: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

pub fn ssim(ground_truth: &RgbImage, prediction: &RgbImage) -> Result<f64> {
    if ground_truth.dimensions() != prediction.dimensions() {
        return Err(EvalError::metric(
            "ssim",
            format!(
                "dimension mismatch {:?} vs {:?}",
                ground_truth.dimensions(),
                prediction.dimensions()
            ),
        ));
    }
    let (width, height) = ground_truth.dimensions();
    let (width, height) = (width as usize, height as usize);
    if width < WINDOW || height < WINDOW {
        return Err(EvalError::metric(
            "ssim",
            format!("{width}x{height} is smaller than the {WINDOW}x{WINDOW} window"),
        ));
    }

    let a = ground_truth.as_raw();
    let b = prediction.as_raw();
    let total: f64 = (0..3)
        .map(|channel| channel_ssim(a, b, width, height, channel))
        .sum();
    Ok(total / 3.0)
}

/// Summed-area tables of x, y, x^2, y^2 and xy for one channel. Values are
/// integers well below 2^53, so the sums are exact.
struct Moments {
    stride: usize,
    sx: Vec<f64>,
    sy: Vec<f64>,
    sxx: Vec<f64>,
    syy: Vec<f64>,
    sxy: Vec<f64>,
}

impl Moments {
    fn build(a: &[u8], b: &[u8], width: usize, height: usize, channel: usize) -> Self {
        let stride = width + 1;
        let len = stride * (height + 1);
        let mut moments = Self {
            stride,
            sx: vec![0.0; len],
            sy: vec![0.0; len],
            sxx: vec![0.0; len],
            syy: vec![0.0; len],
            sxy: vec![0.0; len],
        };

        for row in 0..height {
            let (mut rx, mut ry, mut rxx, mut ryy, mut rxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for col in 0..width {
                let idx = (row * width + col) * 3 + channel;
                let x = f64::from(a[idx]);
                let y = f64::from(b[idx]);
                rx += x;
                ry += y;
                rxx += x * x;
                ryy += y * y;
                rxy += x * y;

                let here = (row + 1) * stride + col + 1;
                let above = row * stride + col + 1;
                moments.sx[here] = moments.sx[above] + rx;
                moments.sy[here] = moments.sy[above] + ry;
                moments.sxx[here] = moments.sxx[above] + rxx;
                moments.syy[here] = moments.syy[above] + ryy;
                moments.sxy[here] = moments.sxy[above] + rxy;
            }
        }
        moments
    }

    fn window_sum(&self, table: &[f64], row: usize, col: usize) -> f64 {
        let top = row * self.stride;
        let bottom = (row + WINDOW) * self.stride;
        table[bottom + col + WINDOW] - table[top + col + WINDOW] - table[bottom + col]
            + table[top + col]
    }
}

fn channel_ssim(a: &[u8], b: &[u8], width: usize, height: usize, channel: usize) -> f64 {
    let moments = Moments::build(a, b, width, height, channel);

    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let rows = height - WINDOW + 1;
    let cols = width - WINDOW + 1;
    let mut total = 0.0;
    for row in 0..rows {
        for col in 0..cols {
            let ux = moments.window_sum(&moments.sx, row, col) / n;
            let uy = moments.window_sum(&moments.sy, row, col) / n;
            let uxx = moments.window_sum(&moments.sxx, row, col) / n;
            let uyy = moments.window_sum(&moments.syy, row, col) / n;
            let uxy = moments.window_sum(&moments.sxy, row, col) / n;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
        }
    }
    total / (rows * cols) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 37 + y * 91) % 251) as u8;
            Rgb([v, v.wrapping_mul(3), 255 - v])
        })
    }

    #[test]
    fn test_identical_images_score_one() {
        let img = textured(32, 20);
        let value = ssim(&img, &img.clone()).unwrap();
        assert!((value - 1.0).abs() < 1e-9, "ssim = {value}");
    }

    #[test]
    fn test_identical_minimum_size() {
        let img = textured(7, 7);
        assert!((ssim(&img, &img.clone()).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_image_scores_lower() {
        let img = textured(24, 24);
        let flat = RgbImage::from_pixel(24, 24, Rgb([128, 128, 128]));
        let value = ssim(&img, &flat).unwrap();
        assert!(value < 0.5, "ssim = {value}");
        assert!(value > -1.0);
    }

    #[test]
    fn test_uniform_images_with_offset() {
        // Zero variance on both sides leaves only the luminance term.
        let a = RgbImage::from_pixel(10, 10, Rgb([100, 100, 100]));
        let b = RgbImage::from_pixel(10, 10, Rgb([110, 110, 110]));
        let c1 = (K1 * DATA_RANGE).powi(2);
        let expected = (2.0 * 100.0 * 110.0 + c1) / (100.0f64.powi(2) + 110.0f64.powi(2) + c1);
        assert!((ssim(&a, &b).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_too_small_is_metric_error() {
        let img = textured(6, 30);
        assert!(matches!(
            ssim(&img, &img.clone()),
            Err(EvalError::MetricComputation { metric: "ssim", .. })
        ));
    }

    #[test]
    fn test_symmetric() {
        let a = textured(16, 12);
        let b = RgbImage::from_fn(16, 12, |x, y| Rgb([(x * y) as u8, x as u8, y as u8]));
        let ab = ssim(&a, &b).unwrap();
        let ba = ssim(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-12);
    }
}
