//! Decoding and geometric alignment of an image pair.
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};

use crate::error::{EvalError, Result};
use crate::pairing::ImagePairPaths;

/// Bicubic-equivalent kernel used for every resample.
pub const ALIGNMENT_FILTER: FilterType = FilterType::CatmullRom;

/// A pair whose prediction has the ground truth's exact dimensions.
#[derive(Debug, Clone)]
pub struct AlignedPair {
    pub ground_truth: RgbImage,
    pub prediction: RgbImage,
}

impl AlignedPair {
    pub fn dimensions(&self) -> (u32, u32) {
        self.ground_truth.dimensions()
    }
}

/// Decodes any supported raster into 8-bit RGB. Alpha is dropped and
/// grayscale is expanded.
pub fn decode_rgb(path: &Path) -> Result<RgbImage> {
    let decode_error = |reason: String| EvalError::Decode {
        path: path.to_path_buf(),
        reason,
    };
    let image = ImageReader::open(path)
        .map_err(|e| decode_error(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_error(e.to_string()))?
        .decode()
        .map_err(|e| decode_error(e.to_string()))?;
    Ok(image.to_rgb8())
}

/// Resamples `prediction` to the size of `ground_truth`. A prediction that
/// already has the right size is returned unchanged.
pub fn align_to(ground_truth: &RgbImage, prediction: RgbImage) -> RgbImage {
    let (width, height) = ground_truth.dimensions();
    if prediction.dimensions() == (width, height) {
        return prediction;
    }
    imageops::resize(&prediction, width, height, ALIGNMENT_FILTER)
}

/// Decodes both rasters of a pair and aligns the prediction.
pub fn load_pair(paths: &ImagePairPaths) -> Result<AlignedPair> {
    let ground_truth = decode_rgb(&paths.ground_truth)?;
    let prediction = decode_rgb(&paths.prediction)?;
    if ground_truth.width() == 0 || ground_truth.height() == 0 {
        return Err(EvalError::Decode {
            path: paths.ground_truth.clone(),
            reason: "image has no pixels".to_string(),
        });
    }
    let prediction = align_to(&ground_truth, prediction);
    Ok(AlignedPair {
        ground_truth,
        prediction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_align_resizes_to_ground_truth() {
        let gt = gradient(100, 80);
        let aligned = align_to(&gt, gradient(50, 40));
        assert_eq!(aligned.dimensions(), (100, 80));
    }

    #[test]
    fn test_align_is_identity_for_matching_size() {
        let gt = gradient(64, 48);
        let pred = gradient(64, 48);
        let aligned = align_to(&gt, pred.clone());
        assert_eq!(aligned.as_raw(), pred.as_raw());
        let twice = align_to(&gt, aligned.clone());
        assert_eq!(twice.as_raw(), aligned.as_raw());
    }

    #[test]
    fn test_uniform_image_stays_uniform() {
        let gt = gradient(30, 30);
        let gray = RgbImage::from_pixel(10, 10, Rgb([128, 128, 128]));
        let aligned = align_to(&gt, gray);
        assert!(aligned.pixels().all(|p| *p == Rgb([128, 128, 128])));
    }

    #[test]
    fn test_load_pair_decodes_and_aligns() {
        let dir = tempfile::tempdir().unwrap();
        let gt_path = dir.path().join("gt.png");
        let pred_path = dir.path().join("pred.png");
        gradient(40, 20).save(&gt_path).unwrap();
        gradient(20, 10).save(&pred_path).unwrap();

        let pair = load_pair(&ImagePairPaths {
            index: 0,
            base_name: "gt".into(),
            ground_truth: gt_path,
            prediction: pred_path,
        })
        .unwrap();
        assert_eq!(pair.dimensions(), (40, 20));
        assert_eq!(pair.prediction.dimensions(), (40, 20));
    }

    #[test]
    fn test_undecodable_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = decode_rgb(&path).unwrap_err();
        assert!(matches!(err, EvalError::Decode { .. }));
    }
}
