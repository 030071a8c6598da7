//! Recognizer backend that shells out to an external OCR program such as
//! `tesseract`.
use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::engine::{OcrEngine, OcrError, OcrInput, OcrOutput};
use crate::region::{BoundingBox, TextRegion};

/// Placeholder in the argument list replaced by the input location.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Input location passed for piped bytes.
const STDIN_NAME: &str = "stdin";

/// How the program's stdout is turned into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Each non-empty line is one detected string.
    Lines,
    /// Tesseract TSV; every word row becomes a region with a box and confidence.
    Tsv,
}

#[derive(Debug, Clone)]
pub struct CommandOcrEngine {
    program: String,
    args: Vec<String>,
    format: OutputFormat,
}

impl CommandOcrEngine {
    /// `args` may contain [`INPUT_PLACEHOLDER`]. For byte input the placeholder
    /// becomes `stdin` and the bytes are piped to the program.
    pub fn new(program: impl Into<String>, args: Vec<String>, format: OutputFormat) -> Self {
        Self {
            program: program.into(),
            args,
            format,
        }
    }

    /// Tesseract treating each crop as a single text line.
    pub fn tesseract() -> Self {
        Self::new("tesseract", Self::tesseract_args(), OutputFormat::Lines)
    }

    /// Arguments for single-line recognition with plain-text output.
    pub fn tesseract_args() -> Vec<String> {
        vec![
            INPUT_PLACEHOLDER.to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            "7".to_string(),
        ]
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn resolved_args(&self, input: &OcrInput) -> Vec<String> {
        let location = match input {
            OcrInput::FilePath(path) => path.to_string_lossy().into_owned(),
            OcrInput::Bytes(_) => STDIN_NAME.to_string(),
        };
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &location))
            .collect()
    }

    fn parse(&self, stdout: &str) -> Result<Vec<TextRegion>, OcrError> {
        match self.format {
            OutputFormat::Lines => Ok(parse_lines(stdout)),
            OutputFormat::Tsv => parse_tsv(stdout),
        }
    }
}

#[async_trait]
impl OcrEngine for CommandOcrEngine {
    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
        let mut command = Command::new(&self.program);
        command
            .args(self.resolved_args(input))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match input {
            OcrInput::FilePath(path) => {
                if !path.exists() {
                    return Err(OcrError::InvalidInput(format!(
                        "{} does not exist",
                        path.display()
                    )));
                }
                command.stdin(Stdio::null()).output().await?
            }
            OcrInput::Bytes(data) => {
                if data.is_empty() {
                    return Err(OcrError::InvalidInput("empty image buffer".into()));
                }
                let mut child = command.stdin(Stdio::piped()).spawn()?;
                let stdin = child.stdin.take();
                // Output is drained while the input is written, so programs
                // that answer before reading everything cannot fill the pipe.
                let feed = async move {
                    if let Some(mut stdin) = stdin {
                        // A program that exits early closes the pipe; its status decides.
                        if let Err(err) = stdin.write_all(data).await {
                            if err.kind() != ErrorKind::BrokenPipe {
                                return Err(err);
                            }
                        }
                    }
                    Ok(())
                };
                let (written, output) = tokio::join!(feed, child.wait_with_output());
                written?;
                output?
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineError(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let regions = self.parse(&stdout)?;
        tracing::trace!(program = %self.program, regions = regions.len(), "recognized");
        Ok(OcrOutput::from_regions(regions))
    }
}

fn parse_lines(stdout: &str) -> Vec<TextRegion> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TextRegion::from_text)
        .collect()
}

// level page block par line word left top width height conf text
const TSV_COLUMNS: usize = 12;
const TSV_WORD_LEVEL: &str = "5";

fn parse_tsv(stdout: &str) -> Result<Vec<TextRegion>, OcrError> {
    let mut regions = Vec::new();
    for line in stdout.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < TSV_COLUMNS || fields[0] != TSV_WORD_LEVEL {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        let number = |idx: usize| -> Result<f32, OcrError> {
            fields[idx].trim().parse::<f32>().map_err(|_| {
                OcrError::EngineError(format!("malformed TSV field {:?}", fields[idx]))
            })
        };
        let confidence = number(10)?;
        regions.push(TextRegion {
            text: text.to_string(),
            bounding_box: Some(BoundingBox {
                x: number(6)?,
                y: number(7)?,
                width: number(8)?,
                height: number(9)?,
            }),
            confidence: (confidence >= 0.0).then_some(confidence / 100.0),
        });
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_placeholder_for_bytes_uses_stdin_name() {
        let engine = CommandOcrEngine::tesseract();
        let args = engine.resolved_args(&OcrInput::Bytes(vec![1, 2, 3]));
        assert_eq!(args, vec!["stdin", "stdout", "--psm", "7"]);
    }

    #[test]
    fn test_placeholder_for_path() {
        let engine = CommandOcrEngine::tesseract();
        let args = engine.resolved_args(&OcrInput::FilePath(PathBuf::from("/tmp/crop.png")));
        assert_eq!(args[0], "/tmp/crop.png");
    }

    #[test]
    fn test_parse_lines_skips_blank_lines() {
        let regions = parse_lines("Figure 3\n\n  (a) input \n\x0c");
        let texts: Vec<&str> = regions.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Figure 3", "(a) input"]);
    }

    #[test]
    fn test_parse_tsv_keeps_words_only() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t30\t10\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t2\t1\t12\t8\t91.5\tFig\n\
                   5\t1\t1\t1\t1\t2\t15\t1\t10\t8\t88\t3\n";
        let regions = parse_tsv(tsv).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].text, "Fig");
        assert_eq!(
            regions[0].bounding_box,
            Some(BoundingBox { x: 2.0, y: 1.0, width: 12.0, height: 8.0 })
        );
        assert_eq!(regions[1].confidence, Some(0.88));
    }

    #[test]
    fn test_parse_tsv_rejects_non_numeric_geometry() {
        let tsv = "header\n5\t1\t1\t1\t1\t1\tleft\t1\t12\t8\t91\tFig\n";
        assert!(matches!(parse_tsv(tsv), Err(OcrError::EngineError(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_input() {
        let engine = CommandOcrEngine::tesseract();
        let input = OcrInput::FilePath(PathBuf::from("/definitely/not/here.png"));
        let err = engine.recognize(&input).await.unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recognize_bytes_through_cat() {
        // `cat` echoes stdin, so the "recognized" lines are the input bytes.
        let engine = CommandOcrEngine::new("cat", Vec::new(), OutputFormat::Lines);
        let output = engine
            .recognize(&OcrInput::Bytes(b"Fig\nure\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(output.concatenated(), "Figure");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_larger_than_pipe_buffer() {
        let engine = CommandOcrEngine::new("cat", Vec::new(), OutputFormat::Lines);
        let input = "word\n".repeat(50_000).into_bytes();
        assert!(input.len() > 128 * 1024);

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            engine.recognize(&OcrInput::Bytes(input)),
        )
        .await
        .expect("recognizer deadlocked on a large input")
        .unwrap();
        assert_eq!(output.regions.len(), 50_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_is_engine_error() {
        let engine = CommandOcrEngine::new("false", Vec::new(), OutputFormat::Lines);
        let err = engine
            .recognize(&OcrInput::Bytes(vec![0u8; 4]))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::EngineError(_)));
    }
}
