//! Drives an evaluation run: resolves pairs, evaluates them concurrently and
//! writes report rows strictly in pair order.
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use restore_eval_ocr::OcrEngine;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::alignment::{load_pair, AlignedPair};
use crate::annotation::{annotation_path, load_annotations};
use crate::error::{EvalError, Result};
use crate::metrics::perceptual::{PerceptualDistance, PerceptualHandle};
use crate::metrics::{compute_pixel_metrics, Metric, MetricConfiguration, MetricResult, Scope};
use crate::pairing::{resolve_pairs, ImagePairPaths, PairingOptions};
use crate::region_metrics::{compute_region_pixel_metrics, crop_regions, RegionCrop};
use crate::report::{columns_for, RegionReport, ReportRow, ReportWriter};
use crate::text_fidelity::{RecognizerHandle, TextFidelityMode};

/// Options for an evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationOptions {
    pub gt_dir: PathBuf,
    pub pred_dir: PathBuf,
    pub box_dir: PathBuf,
    pub output_csv: PathBuf,
    pub metrics: MetricConfiguration,
    pub pairing: PairingOptions,
    /// Maximum number of pairs evaluated at once
    pub max_concurrent_pairs: usize,
    /// Maximum number of recognizer calls in flight
    pub recognizer_concurrency: usize,
    /// Upper bound for a single perceptual or recognizer call
    pub dependency_timeout: Duration,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            gt_dir: PathBuf::from("gt"),
            pred_dir: PathBuf::from("pred"),
            box_dir: PathBuf::from("boxes"),
            output_csv: PathBuf::from("evaluation_results.csv"),
            metrics: MetricConfiguration::default(),
            pairing: PairingOptions::default(),
            max_concurrent_pairs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            recognizer_concurrency: 1,
            dependency_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    /// Rows in pair order, exactly as written to the report.
    pub rows: Vec<ReportRow>,
    pub total_pairs: usize,
    /// Pairs dropped because a raster could not be decoded.
    pub skipped_pairs: usize,
    /// True when the run stopped early; pairs after the last row were not evaluated.
    pub cancelled: bool,
}

enum PairOutcome {
    Completed(ReportRow),
    Skipped,
    Cancelled,
}

/// Everything a pair task needs; cheap to clone.
#[derive(Clone)]
struct PairContext {
    metrics: MetricConfiguration,
    box_dir: PathBuf,
    perceptual: Option<PerceptualHandle>,
    recognizer: Option<RecognizerHandle>,
}

pub struct Evaluator {
    options: EvaluationOptions,
    perceptual: Option<PerceptualHandle>,
    recognizer: Option<RecognizerHandle>,
    cancelled: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
}

impl Evaluator {
    pub fn new(options: EvaluationOptions) -> Self {
        Self {
            options,
            perceptual: None,
            recognizer: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Installs the perceptual backend. All pairs share it and calls are serialized.
    pub fn with_perceptual(mut self, backend: Box<dyn PerceptualDistance>) -> Self {
        self.perceptual = Some(PerceptualHandle::new(
            backend,
            self.options.dependency_timeout,
        ));
        self
    }

    /// Installs the recognizer used for text fidelity.
    pub fn with_recognizer(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.recognizer = Some(RecognizerHandle::new(
            engine,
            self.options.recognizer_concurrency,
            self.options.dependency_timeout,
        ));
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    /// Setting the flag stops the run before the next pair starts.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Evaluates every pair and writes the report to `output_csv`.
    pub async fn run(&self) -> Result<EvaluationResult> {
        let pairs = self.resolve()?;
        let writer = ReportWriter::create(
            &self.options.output_csv,
            columns_for(&self.options.metrics),
        )?;
        let result = self.evaluate_pairs(pairs, writer).await?;
        info!(
            report = %self.options.output_csv.display(),
            rows = result.rows.len(),
            "report written"
        );
        Ok(result)
    }

    /// Evaluates every pair, streaming rows to `writer` in pair order.
    pub async fn run_with_writer<W: Write>(
        &self,
        writer: ReportWriter<W>,
    ) -> Result<EvaluationResult> {
        let pairs = self.resolve()?;
        self.evaluate_pairs(pairs, writer).await
    }

    fn resolve(&self) -> Result<Vec<ImagePairPaths>> {
        resolve_pairs(
            &self.options.gt_dir,
            &self.options.pred_dir,
            &self.options.pairing,
        )
    }

    async fn evaluate_pairs<W: Write>(
        &self,
        pairs: Vec<ImagePairPaths>,
        mut writer: ReportWriter<W>,
    ) -> Result<EvaluationResult> {
        let total_pairs = pairs.len();
        info!(pairs = total_pairs, "evaluating image pairs");
        self.warn_on_missing_backends();

        if let Some(progress) = &self.progress {
            progress.set_length(total_pairs as u64);
        }

        let context = PairContext {
            metrics: self.options.metrics.clone(),
            box_dir: self.options.box_dir.clone(),
            perceptual: self.perceptual.clone(),
            recognizer: self.recognizer.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_pairs.max(1)));

        let mut tasks = Vec::with_capacity(total_pairs);
        for paths in pairs {
            let semaphore = semaphore.clone();
            let context = context.clone();
            let cancelled = self.cancelled.clone();
            let span = info_span!("pair", index = paths.index, image = %paths.base_name);

            let task = tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return PairOutcome::Cancelled;
                    };
                    if cancelled.load(Ordering::SeqCst) {
                        return PairOutcome::Cancelled;
                    }
                    evaluate_pair(context, paths).await
                }
                .instrument(span),
            );
            tasks.push(task);
        }

        // Awaiting in spawn order keeps rows in pair order whatever the
        // completion order.
        let mut rows = Vec::with_capacity(total_pairs);
        let mut skipped_pairs = 0;
        let mut was_cancelled = false;
        for (index, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(PairOutcome::Completed(row)) => {
                    writer.write_row(&row)?;
                    rows.push(row);
                }
                Ok(PairOutcome::Skipped) => skipped_pairs += 1,
                Ok(PairOutcome::Cancelled) => was_cancelled = true,
                Err(e) => {
                    warn!(pair = index, error = %e, "pair task failed; pair skipped");
                    skipped_pairs += 1;
                }
            }
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        if was_cancelled {
            warn!(completed = rows.len(), total = total_pairs, "run cancelled");
        }
        info!(
            rows = rows.len(),
            skipped = skipped_pairs,
            "evaluation finished"
        );

        Ok(EvaluationResult {
            rows,
            total_pairs,
            skipped_pairs,
            cancelled: was_cancelled,
        })
    }

    fn warn_on_missing_backends(&self) {
        let metrics = &self.options.metrics;
        if metrics.perceptual && self.perceptual.is_none() {
            warn!("perceptual distance enabled without a backend; scores will be absent");
        }
        if metrics.text_fidelity && self.recognizer.is_none() {
            warn!("text fidelity enabled without a recognizer; scores will be absent");
        }
        if metrics.text_fidelity && metrics.text_fidelity_mode == TextFidelityMode::PredictionOnly {
            warn!("text fidelity reads both sides from the prediction (prediction-only mode)");
        }
    }
}

async fn evaluate_pair(context: PairContext, paths: ImagePairPaths) -> PairOutcome {
    let load_paths = paths.clone();
    let pair = match tokio::task::spawn_blocking(move || load_pair(&load_paths)).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(err)) => {
            warn!(error = %err, "pair skipped");
            return PairOutcome::Skipped;
        }
        Err(err) => {
            warn!(error = %err, "decode task failed; pair skipped");
            return PairOutcome::Skipped;
        }
    };

    let annotation_file = annotation_path(&context.box_dir, &paths.base_name);
    let annotations = match load_annotations(&annotation_file).await {
        Ok(annotations) => Some(annotations),
        Err(err) => {
            warn!(error = %err, "region metrics skipped");
            None
        }
    };

    let metrics = context.metrics.clone();
    let span = Span::current();
    let pixel_stage = tokio::task::spawn_blocking(move || {
        span.in_scope(|| {
            let global = compute_pixel_metrics(
                &pair.ground_truth,
                &pair.prediction,
                &metrics,
                Scope::Global,
            );
            let crops = annotations.map(|a| crop_regions(&pair, &a));
            let region_metrics = crops
                .as_ref()
                .map(|c| compute_region_pixel_metrics(c, &metrics));
            (pair, global, crops, region_metrics)
        })
    });
    let (pair, mut global, crops, region_metrics) = match pixel_stage.await {
        Ok(stage) => stage,
        Err(err) => {
            warn!(error = %err, "metric task failed; pair skipped");
            return PairOutcome::Skipped;
        }
    };

    if context.metrics.perceptual {
        let value = perceptual_score(&context, &pair, Scope::Global).await;
        global.set(Metric::Perceptual, value);
    }

    let regions = match (crops, region_metrics) {
        (Some(crops), Some(mut region_metrics)) => {
            if context.metrics.perceptual {
                for (crop, result) in crops.iter().zip(region_metrics.iter_mut()) {
                    let value = region_perceptual_score(&context, crop).await;
                    result.set(Metric::Perceptual, value);
                }
            }
            let text_fidelity = if context.metrics.text_fidelity {
                Some(text_fidelity_scores(&context, &crops).await)
            } else {
                None
            };
            debug!(regions = crops.len(), "region metrics computed");
            Some(RegionReport {
                indices: crops.iter().map(|c| c.index).collect(),
                metrics: region_metrics,
                text_fidelity,
            })
        }
        _ => None,
    };

    PairOutcome::Completed(ReportRow {
        index: paths.index,
        image: paths.base_name,
        global,
        regions,
    })
}

async fn perceptual_score(context: &PairContext, pair: &AlignedPair, scope: Scope) -> Option<f64> {
    let outcome = match &context.perceptual {
        Some(handle) => handle.distance(&pair.ground_truth, &pair.prediction).await,
        None => Err(EvalError::dependency("perceptual", "no backend configured")),
    };
    absent_on_error(outcome, Metric::Perceptual, scope)
}

async fn region_perceptual_score(context: &PairContext, crop: &RegionCrop) -> Option<f64> {
    let outcome = match &context.perceptual {
        Some(handle) => handle.distance(&crop.ground_truth, &crop.prediction).await,
        None => Err(EvalError::dependency("perceptual", "no backend configured")),
    };
    absent_on_error(outcome, Metric::Perceptual, Scope::Region(crop.index))
}

async fn text_fidelity_scores(context: &PairContext, crops: &[RegionCrop]) -> Vec<Option<f64>> {
    let mode = context.metrics.text_fidelity_mode;
    let mut scores = Vec::with_capacity(crops.len());
    for crop in crops {
        let outcome = match &context.recognizer {
            Some(recognizer) => recognizer.score_region(crop, mode).await,
            None => Err(EvalError::dependency("recognition", "no recognizer configured")),
        };
        scores.push(match outcome {
            Ok(score) => Some(score),
            Err(err) => {
                warn!(region = crop.index, metric = "text_fidelity", error = %err, "score absent");
                None
            }
        });
    }
    scores
}

fn absent_on_error(outcome: Result<f64>, metric: Metric, scope: Scope) -> Option<f64> {
    let mut result = MetricResult::new();
    result.record(metric, scope, outcome);
    result.get(metric)
}
