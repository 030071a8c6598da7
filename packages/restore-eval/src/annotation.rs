//! Per-image region annotations: `<box_dir>/<stem>.json` holding
//! `[{ "bbox": [x1, y1, x2, y2], "text": "..." }, ...]`.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{EvalError, Result};

/// Box corners in pixel coordinates of the ground-truth raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

/// A box clamped to raster bounds with non-zero area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Clamps the box to `[0, width] x [0, height]`. Boxes left with zero
    /// width or height (inverted boxes included) yield `None`.
    pub fn clamp(&self, width: u32, height: u32) -> Option<PixelRect> {
        let clamp_axis = |lo: i64, hi: i64, limit: u32| {
            let limit = i64::from(limit);
            (lo.clamp(0, limit), hi.clamp(0, limit))
        };
        let (x1, x2) = clamp_axis(self.x1, self.x2, width);
        let (y1, y2) = clamp_axis(self.y1, self.y2, height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(PixelRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionAnnotation {
    pub bbox: BoundingBox,
    /// Text the region is expected to show.
    pub text: String,
}

#[derive(Deserialize)]
struct RawRegion {
    bbox: Vec<f64>,
    text: String,
}

/// Location of the annotation file for an image with the given base name.
pub fn annotation_path(box_dir: &Path, base_name: &str) -> PathBuf {
    box_dir.join(format!("{base_name}.json"))
}

/// Reads and parses one annotation file.
pub async fn load_annotations(path: &Path) -> Result<Vec<RegionAnnotation>> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| annotation_error(path, e.to_string()))?;
    parse_annotations(&contents, path)
}

/// Parses annotation records, preserving file order. Fractional coordinates
/// are truncated toward zero.
pub fn parse_annotations(contents: &str, path: &Path) -> Result<Vec<RegionAnnotation>> {
    let raw: Vec<RawRegion> =
        serde_json::from_str(contents).map_err(|e| annotation_error(path, e.to_string()))?;

    raw.into_iter()
        .enumerate()
        .map(|(idx, record)| {
            let [x1, y1, x2, y2] = <[f64; 4]>::try_from(record.bbox.as_slice()).map_err(|_| {
                annotation_error(
                    path,
                    format!(
                        "record {idx}: bbox needs 4 coordinates, found {}",
                        record.bbox.len()
                    ),
                )
            })?;
            if [x1, y1, x2, y2].iter().any(|v| !v.is_finite()) {
                return Err(annotation_error(
                    path,
                    format!("record {idx}: non-finite coordinate"),
                ));
            }
            Ok(RegionAnnotation {
                bbox: BoundingBox::new(x1 as i64, y1 as i64, x2 as i64, y2 as i64),
                text: record.text,
            })
        })
        .collect()
}

fn annotation_error(path: &Path, reason: String) -> EvalError {
    EvalError::Annotation {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<Vec<RegionAnnotation>> {
        parse_annotations(contents, Path::new("fig.json"))
    }

    #[test]
    fn test_parse_preserves_order_and_truncates() {
        let regions = parse(
            r#"[
                {"bbox": [10, 10, 40, 40], "text": "A"},
                {"bbox": [5.9, 0.2, 20.7, 8.99], "text": "Fig. 2", "score": 0.7}
            ]"#,
        )
        .unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].bbox, BoundingBox::new(10, 10, 40, 40));
        assert_eq!(regions[0].text, "A");
        assert_eq!(regions[1].bbox, BoundingBox::new(5, 0, 20, 8));
    }

    #[test]
    fn test_empty_list_is_valid() {
        assert!(parse("[]").unwrap().is_empty());
    }

    #[test]
    fn test_non_numeric_coordinate_is_annotation_error() {
        let err = parse(r#"[{"bbox": ["a", 0, 4, 4], "text": "x"}]"#).unwrap_err();
        assert!(matches!(err, EvalError::Annotation { .. }));
    }

    #[test]
    fn test_wrong_arity_is_annotation_error() {
        let err = parse(r#"[{"bbox": [0, 0, 4], "text": "x"}]"#).unwrap_err();
        match err {
            EvalError::Annotation { reason, .. } => assert!(reason.contains("4 coordinates")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_text_is_annotation_error() {
        assert!(parse(r#"[{"bbox": [0, 0, 4, 4]}]"#).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_annotation_error() {
        let err = load_annotations(Path::new("/no/such/dir/fig.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Annotation { .. }));
    }

    #[test]
    fn test_clamp_to_bounds() {
        let rect = BoundingBox::new(-5, 90, 30, 120).clamp(100, 100).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 0,
                y: 90,
                width: 30,
                height: 10
            }
        );
    }

    #[test]
    fn test_clamp_drops_zero_area() {
        assert_eq!(BoundingBox::new(100, 10, 140, 40).clamp(100, 100), None);
        assert_eq!(BoundingBox::new(10, 10, 10, 40).clamp(100, 100), None);
        assert_eq!(BoundingBox::new(40, 40, 10, 10).clamp(100, 100), None);
    }

    #[test]
    fn test_annotation_path_uses_stem() {
        assert_eq!(
            annotation_path(Path::new("boxes"), "page_003"),
            PathBuf::from("boxes/page_003.json")
        );
    }
}
