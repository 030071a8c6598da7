//! Discovers ground-truth/prediction image pairs in two directories.
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{EvalError, Result};

/// Default image extensions (without dot, lowercase).
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png"];

/// How ground-truth and prediction files are matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PairingStrategy {
    /// Sort both listings by file name and zip by position. Unequal counts
    /// truncate to the shorter listing. Identifiers are not compared.
    #[default]
    Positional,
    /// Match by shared file stem; any stem present on one side only is an error.
    ByStem,
}

#[derive(Debug, Clone)]
pub struct PairingOptions {
    pub strategy: PairingStrategy,
    pub extensions: HashSet<String>,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            strategy: PairingStrategy::default(),
            extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePairPaths {
    /// Position in the pair list; becomes the report's `index` column.
    pub index: usize,
    /// Ground-truth file stem, used to find the annotation file.
    pub base_name: String,
    pub ground_truth: PathBuf,
    pub prediction: PathBuf,
}

/// Resolves the ordered pair list. Fails only if a directory cannot be read,
/// or, with [`PairingStrategy::ByStem`], if an identifier is unmatched.
pub fn resolve_pairs(
    gt_dir: &Path,
    pred_dir: &Path,
    options: &PairingOptions,
) -> Result<Vec<ImagePairPaths>> {
    let ground_truth = list_images(gt_dir, &options.extensions)?;
    let predictions = list_images(pred_dir, &options.extensions)?;
    debug!(
        ground_truth = ground_truth.len(),
        predictions = predictions.len(),
        "listed image directories"
    );

    let matched: Vec<(PathBuf, PathBuf)> = match options.strategy {
        PairingStrategy::Positional => {
            if ground_truth.len() != predictions.len() {
                warn!(
                    ground_truth = ground_truth.len(),
                    predictions = predictions.len(),
                    "image counts differ; extra images are ignored"
                );
            }
            ground_truth.into_iter().zip(predictions).collect()
        }
        PairingStrategy::ByStem => pair_by_stem(ground_truth, predictions)?,
    };

    Ok(matched
        .into_iter()
        .enumerate()
        .map(|(index, (ground_truth, prediction))| ImagePairPaths {
            index,
            base_name: file_stem(&ground_truth),
            ground_truth,
            prediction,
        })
        .collect())
}

/// Image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path, extensions: &HashSet<String>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(EvalError::DataAccess {
            path: dir.to_path_buf(),
            reason: "not a readable directory".to_string(),
        });
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| EvalError::DataAccess {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches_extension = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false);
        if matches_extension {
            images.push(entry.into_path());
        }
    }

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn pair_by_stem(
    ground_truth: Vec<PathBuf>,
    predictions: Vec<PathBuf>,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut by_stem: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for path in ground_truth {
        let stem = file_stem(&path);
        let slot = &mut by_stem.entry(stem.clone()).or_default().0;
        claim(slot, stem, path)?;
    }
    for path in predictions {
        let stem = file_stem(&path);
        let slot = &mut by_stem.entry(stem.clone()).or_default().1;
        claim(slot, stem, path)?;
    }

    let mut pairs = Vec::with_capacity(by_stem.len());
    let mut unmatched = Vec::new();
    for (stem, sides) in by_stem {
        match sides {
            (Some(gt), Some(pred)) => pairs.push((gt, pred)),
            _ => unmatched.push(stem),
        }
    }

    if !unmatched.is_empty() {
        return Err(EvalError::UnmatchedIdentifier {
            identifiers: unmatched,
        });
    }
    Ok(pairs)
}

/// Fills one side of a stem entry; a second file with the same stem is an error.
fn claim(slot: &mut Option<PathBuf>, stem: String, path: PathBuf) -> Result<()> {
    if let Some(first) = slot.take() {
        return Err(EvalError::DuplicateIdentifier {
            identifier: stem,
            first,
            second: path,
        });
    }
    *slot = Some(path);
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
