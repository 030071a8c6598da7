mod cli;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Commands, EvaluateArgs};
use indicatif::{ProgressBar, ProgressStyle};
use restore_eval::{Evaluator, PerceptualDistance};
use restore_eval_ocr::CommandOcrEngine;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  let args = Args::parse();

  let outcome = match args.command {
    Commands::Version => {
      println!("restore-eval {}", env!("CARGO_PKG_VERSION"));
      Ok(())
    }
    Commands::Evaluate(args) => evaluate(args).await,
  };

  // Exiting here skips the runtime's shutdown, which would otherwise wait
  // for blocking calls abandoned after a timeout.
  match outcome {
    Ok(()) => std::process::exit(0),
    Err(e) => {
      eprintln!("Error: {:#}", e);
      std::process::exit(1);
    }
  }
}

async fn evaluate(args: EvaluateArgs) -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level())))
    .with_writer(std::io::stderr)
    .init();

  let options = args.evaluation_options();
  let mut evaluator = Evaluator::new(options);

  if args.perceptual {
    evaluator = evaluator.with_perceptual(perceptual_backend(&args)?);
  }

  if args.text_fidelity {
    let engine = CommandOcrEngine::new(args.ocr_command.clone(), args.ocr_args(), args.ocr_format.into());
    info!(program = %args.ocr_command, "using command-line recognizer");
    evaluator = evaluator.with_recognizer(Arc::new(engine));
  }

  if !args.quiet {
    evaluator = evaluator.with_progress(progress_bar()?);
  }

  let cancelled = evaluator.cancellation_flag();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received; finishing pairs in flight");
      cancelled.store(true, Ordering::SeqCst);
    }
  });

  let result = evaluator
    .run()
    .await
    .with_context(|| format!("evaluation failed (report: {})", args.output_csv.display()))?;

  if result.cancelled {
    warn!(
      written = result.rows.len(),
      total = result.total_pairs,
      "run interrupted; report holds the pairs completed before the interrupt"
    );
  }
  info!(
    rows = result.rows.len(),
    skipped = result.skipped_pairs,
    report = %args.output_csv.display(),
    "done"
  );
  Ok(())
}

#[cfg(feature = "onnx")]
fn perceptual_backend(args: &EvaluateArgs) -> Result<Box<dyn PerceptualDistance>> {
  let model_path = args.model_path();
  let backend = restore_eval::OnnxPerceptualDistance::new(&model_path, args.perceptual_backbone.into())
    .with_context(|| format!("cannot load perceptual model {}", model_path.display()))?;
  Ok(Box::new(backend))
}

#[cfg(not(feature = "onnx"))]
fn perceptual_backend(_args: &EvaluateArgs) -> Result<Box<dyn PerceptualDistance>> {
  anyhow::bail!("--perceptual requires restore-eval to be built with the `onnx` feature")
}

fn progress_bar() -> Result<ProgressBar> {
  let progress = ProgressBar::new(0);
  progress.set_style(
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pairs")
      .context("invalid progress template")?
      .progress_chars("=> "),
  );
  Ok(progress)
}
