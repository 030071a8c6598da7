//! Command line arguments backing the `restore-eval` binary.
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use restore_eval::metrics::MetricConfiguration;
use restore_eval::pairing::{PairingOptions, PairingStrategy};
use restore_eval::text_fidelity::TextFidelityMode;
use restore_eval::{EvaluationOptions, PerceptualBackbone};
use restore_eval_ocr::{CommandOcrEngine, OutputFormat};

#[derive(Parser, Debug)]
#[command(
  name = "restore-eval",
  about = "Scores restored images against ground truth, globally and inside annotated text regions",
  version
)]
pub struct Args {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Print version information
  Version,
  /// Evaluate every image pair and write the CSV report
  Evaluate(EvaluateArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EvaluateArgs {
  /// Directory of ground-truth images
  #[arg(long)]
  pub gt_dir: PathBuf,

  /// Directory of restored (predicted) images
  #[arg(long)]
  pub pred_dir: PathBuf,

  /// Directory of region annotations, one `<stem>.json` per ground-truth image
  #[arg(long)]
  pub box_dir: PathBuf,

  /// Where to write the report
  #[arg(long, short = 'o', default_value = "evaluation_results.csv")]
  pub output_csv: PathBuf,

  /// Compute PSNR
  #[arg(long)]
  pub psnr: bool,

  /// Compute SSIM
  #[arg(long)]
  pub ssim: bool,

  /// Compute the learned perceptual distance (requires the `onnx` feature)
  #[arg(long)]
  pub perceptual: bool,

  /// Network behind the perceptual distance
  #[arg(long, value_enum, default_value_t = BackboneArg::Alex)]
  pub perceptual_backbone: BackboneArg,

  /// Directory holding `lpips_<backbone>.onnx`
  #[arg(long, default_value = "models")]
  pub model_dir: PathBuf,

  /// Score recognized text inside each region
  #[arg(long)]
  pub text_fidelity: bool,

  /// What the prediction's recognized text is compared against
  #[arg(long, value_enum, default_value_t = TextFidelityModeArg::CrossImage)]
  pub text_fidelity_mode: TextFidelityModeArg,

  /// Recognizer program; receives PNG bytes on stdin
  #[arg(long, default_value = "tesseract")]
  pub ocr_command: String,

  /// Argument for the recognizer program, repeatable. `{input}` becomes `stdin`
  #[arg(long = "ocr-arg", allow_hyphen_values = true)]
  pub ocr_args: Vec<String>,

  /// How the recognizer's stdout is read
  #[arg(long, value_enum, default_value_t = OcrFormatArg::Lines)]
  pub ocr_format: OcrFormatArg,

  /// How ground-truth and predicted images are matched
  #[arg(long, value_enum, default_value_t = PairingArg::Positional)]
  pub pairing: PairingArg,

  /// Image file extension to include, repeatable
  #[arg(long = "extension", default_value = "png")]
  pub extensions: Vec<String>,

  /// Pairs evaluated at once (defaults to the number of CPUs)
  #[arg(long, short = 'j')]
  pub jobs: Option<usize>,

  /// Seconds before a perceptual or recognizer call is abandoned
  #[arg(long, default_value = "120")]
  pub timeout_secs: u64,

  /// Only log warnings and errors, no progress bar
  #[arg(long, conflicts_with = "verbose")]
  pub quiet: bool,

  /// Log per-region detail
  #[arg(long, short = 'v')]
  pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneArg {
  Alex,
  Vgg,
  Squeeze,
}

impl From<BackboneArg> for PerceptualBackbone {
  fn from(arg: BackboneArg) -> Self {
    match arg {
      BackboneArg::Alex => PerceptualBackbone::Alex,
      BackboneArg::Vgg => PerceptualBackbone::Vgg,
      BackboneArg::Squeeze => PerceptualBackbone::Squeeze,
    }
  }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFidelityModeArg {
  CrossImage,
  PredictionOnly,
  AnnotationText,
}

impl From<TextFidelityModeArg> for TextFidelityMode {
  fn from(arg: TextFidelityModeArg) -> Self {
    match arg {
      TextFidelityModeArg::CrossImage => TextFidelityMode::CrossImage,
      TextFidelityModeArg::PredictionOnly => TextFidelityMode::PredictionOnly,
      TextFidelityModeArg::AnnotationText => TextFidelityMode::AnnotationText,
    }
  }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrFormatArg {
  /// One detected string per line
  Lines,
  /// Tesseract TSV (`tesseract ... tsv`)
  Tsv,
}

impl From<OcrFormatArg> for OutputFormat {
  fn from(arg: OcrFormatArg) -> Self {
    match arg {
      OcrFormatArg::Lines => OutputFormat::Lines,
      OcrFormatArg::Tsv => OutputFormat::Tsv,
    }
  }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingArg {
  Positional,
  ByStem,
}

impl From<PairingArg> for PairingStrategy {
  fn from(arg: PairingArg) -> Self {
    match arg {
      PairingArg::Positional => PairingStrategy::Positional,
      PairingArg::ByStem => PairingStrategy::ByStem,
    }
  }
}

impl EvaluateArgs {
  /// Metric flags; with none of `--psnr`, `--ssim`, `--perceptual` given,
  /// PSNR and SSIM are computed.
  pub fn metric_configuration(&self) -> MetricConfiguration {
    let any_selected = self.psnr || self.ssim || self.perceptual;
    MetricConfiguration {
      psnr: self.psnr || !any_selected,
      ssim: self.ssim || !any_selected,
      perceptual: self.perceptual,
      text_fidelity: self.text_fidelity,
      perceptual_backbone: self.perceptual_backbone.into(),
      text_fidelity_mode: self.text_fidelity_mode.into(),
    }
  }

  pub fn model_path(&self) -> PathBuf {
    PerceptualBackbone::from(self.perceptual_backbone).default_model_path(&self.model_dir)
  }

  pub fn ocr_args(&self) -> Vec<String> {
    if self.ocr_args.is_empty() {
      CommandOcrEngine::tesseract_args()
    } else {
      self.ocr_args.clone()
    }
  }

  pub fn log_level(&self) -> &'static str {
    if self.quiet {
      "warn"
    } else if self.verbose {
      "debug"
    } else {
      "info"
    }
  }

  pub fn evaluation_options(&self) -> EvaluationOptions {
    let defaults = EvaluationOptions::default();
    EvaluationOptions {
      gt_dir: self.gt_dir.clone(),
      pred_dir: self.pred_dir.clone(),
      box_dir: self.box_dir.clone(),
      output_csv: self.output_csv.clone(),
      metrics: self.metric_configuration(),
      pairing: PairingOptions {
        strategy: self.pairing.into(),
        extensions: self
          .extensions
          .iter()
          .map(|e| e.trim_start_matches('.').to_lowercase())
          .collect(),
      },
      max_concurrent_pairs: self.jobs.unwrap_or(defaults.max_concurrent_pairs).max(1),
      dependency_timeout: Duration::from_secs(self.timeout_secs.max(1)),
      ..defaults
    }
  }
}
