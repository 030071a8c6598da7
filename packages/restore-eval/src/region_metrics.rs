//! Region-level scoring over annotation boxes.
//!
//! Regions whose clamped box has zero area are dropped from every list, so
//! list lengths vary between pairs. [`RegionCrop::index`] keeps the position
//! of each surviving region in the annotation file.
use image::imageops;
use image::RgbImage;
use tracing::debug;

use crate::alignment::AlignedPair;
use crate::annotation::{PixelRect, RegionAnnotation};
use crate::metrics::{compute_pixel_metrics, MetricConfiguration, MetricResult, Scope};

#[derive(Debug, Clone)]
pub struct RegionCrop {
    /// Position of the region in its annotation file.
    pub index: usize,
    pub rect: PixelRect,
    pub text: String,
    pub ground_truth: RgbImage,
    pub prediction: RgbImage,
}

pub fn crop(image: &RgbImage, rect: PixelRect) -> RgbImage {
    imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Crops both rasters to every surviving region, in annotation order.
pub fn crop_regions(pair: &AlignedPair, annotations: &[RegionAnnotation]) -> Vec<RegionCrop> {
    let (width, height) = pair.dimensions();
    annotations
        .iter()
        .enumerate()
        .filter_map(|(index, annotation)| match annotation.bbox.clamp(width, height) {
            Some(rect) => Some(RegionCrop {
                index,
                rect,
                text: annotation.text.clone(),
                ground_truth: crop(&pair.ground_truth, rect),
                prediction: crop(&pair.prediction, rect),
            }),
            None => {
                debug!(region = index, bbox = ?annotation.bbox, "region has no area inside the image; dropped");
                None
            }
        })
        .collect()
}

/// Pixel metrics for each crop, one result per crop.
pub fn compute_region_pixel_metrics(
    crops: &[RegionCrop],
    config: &MetricConfiguration,
) -> Vec<MetricResult> {
    crops
        .iter()
        .map(|c| compute_pixel_metrics(&c.ground_truth, &c.prediction, config, Scope::Region(c.index)))
        .collect()
}
