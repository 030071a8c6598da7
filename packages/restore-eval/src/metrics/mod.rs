//! Fidelity metrics shared by the global and per-region scopes.
pub mod perceptual;
pub mod psnr;
pub mod ssim;

use std::collections::BTreeMap;
use std::fmt;

use image::RgbImage;
use tracing::warn;

use crate::error::Result;
use crate::text_fidelity::TextFidelityMode;
use perceptual::PerceptualBackbone;

/// A pixel or perceptual metric family. Ordering is report column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Psnr,
    Ssim,
    Perceptual,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Psnr => "psnr",
            Self::Ssim => "ssim",
            Self::Perceptual => "perceptual",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which metric families a run computes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricConfiguration {
    pub psnr: bool,
    pub ssim: bool,
    pub perceptual: bool,
    pub text_fidelity: bool,
    pub perceptual_backbone: PerceptualBackbone,
    pub text_fidelity_mode: TextFidelityMode,
}

impl Default for MetricConfiguration {
    fn default() -> Self {
        Self {
            psnr: true,
            ssim: true,
            perceptual: false,
            text_fidelity: false,
            perceptual_backbone: PerceptualBackbone::default(),
            text_fidelity_mode: TextFidelityMode::default(),
        }
    }
}

impl MetricConfiguration {
    pub fn is_enabled(&self, metric: Metric) -> bool {
        match metric {
            Metric::Psnr => self.psnr,
            Metric::Ssim => self.ssim,
            Metric::Perceptual => self.perceptual,
        }
    }

    /// Enabled pixel and perceptual metrics, in column order.
    pub fn enabled_metrics(&self) -> Vec<Metric> {
        [Metric::Psnr, Metric::Ssim, Metric::Perceptual]
            .into_iter()
            .filter(|m| self.is_enabled(*m))
            .collect()
    }
}

/// Where a score was measured; used in log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Region(usize),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Region(idx) => write!(f, "region {idx}"),
        }
    }
}

/// Scores for one scope. Enabled metrics always have an entry; `None` marks
/// a score that could not be computed. Disabled metrics have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricResult {
    values: BTreeMap<Metric, Option<f64>>,
}

impl MetricResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a computed score, logging and recording a failure as absent.
    pub fn record(&mut self, metric: Metric, scope: Scope, outcome: Result<f64>) {
        let value = match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%metric, %scope, error = %err, "metric absent");
                None
            }
        };
        self.values.insert(metric, value);
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        self.values.insert(metric, value);
    }

    /// The score, or `None` when it is absent or the metric is disabled.
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied().flatten()
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.values.contains_key(&metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, Option<f64>)> + '_ {
        self.values.iter().map(|(m, v)| (*m, *v))
    }
}

/// PSNR and SSIM for one aligned scope. Perceptual distance is filled in by
/// the caller because it goes through the shared backend.
pub fn compute_pixel_metrics(
    ground_truth: &RgbImage,
    prediction: &RgbImage,
    config: &MetricConfiguration,
    scope: Scope,
) -> MetricResult {
    let mut result = MetricResult::new();
    if config.psnr {
        result.record(Metric::Psnr, scope, psnr::psnr(ground_truth, prediction));
    }
    if config.ssim {
        result.record(Metric::Ssim, scope, ssim::ssim(ground_truth, prediction));
    }
    result
}
