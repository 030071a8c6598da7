//! Error taxonomy for an evaluation run.
//!
//! Errors are contained at the smallest enclosing scope: a metric family, a
//! region, a pair, and finally the run. Only [`EvalError::is_run_fatal`]
//! variants stop a run.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    /// Missing or unreadable input directory.
    #[error("cannot access {}: {reason}", path.display())]
    DataAccess { path: PathBuf, reason: String },

    /// A raster that could not be decoded; the pair is skipped.
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Missing or malformed annotation file; region metrics are skipped for the pair.
    #[error("bad annotation file {}: {reason}", path.display())]
    Annotation { path: PathBuf, reason: String },

    /// Numeric failure of one metric family for one scope.
    #[error("{metric} failed: {reason}")]
    MetricComputation { metric: &'static str, reason: String },

    /// Perceptual or recognition backend failure.
    #[error("{backend} backend failed: {reason}")]
    Dependency { backend: &'static str, reason: String },

    /// Keyed pairing found an identifier on only one side.
    #[error("unmatched image identifiers: {}", identifiers.join(", "))]
    UnmatchedIdentifier { identifiers: Vec<String> },

    /// Keyed pairing found two files with the same stem in one directory.
    #[error(
        "image identifier {identifier} names both {} and {}",
        first.display(),
        second.display()
    )]
    DuplicateIdentifier {
        identifier: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Writing the report failed.
    #[error("cannot write report {}: {reason}", path.display())]
    Report { path: PathBuf, reason: String },
}

impl EvalError {
    pub fn metric(metric: &'static str, reason: impl Into<String>) -> Self {
        Self::MetricComputation {
            metric,
            reason: reason.into(),
        }
    }

    pub fn dependency(backend: &'static str, reason: impl ToString) -> Self {
        Self::Dependency {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::DataAccess { .. }
                | Self::UnmatchedIdentifier { .. }
                | Self::DuplicateIdentifier { .. }
                | Self::Report { .. }
        )
    }
}

pub type Result<T, E = EvalError> = std::result::Result<T, E>;
