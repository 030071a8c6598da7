//! The tabular report: one CSV row per evaluated pair.
//!
//! Cells distinguish absence from zero. An absent scalar is an empty cell,
//! an absent entry inside a list is `None`, and the region columns of a pair
//! whose annotations could not be read are empty cells (whereas `[]` means
//! the pair had no region inside the image). Bit-identical pairs report a
//! PSNR of `inf`.
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{EvalError, Result};
use crate::metrics::{Metric, MetricConfiguration, MetricResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportColumn {
    Index,
    Image,
    Global(Metric),
    RegionIndexList,
    RegionList(Metric),
    RegionTextFidelityList,
}

impl ReportColumn {
    pub fn header(&self) -> String {
        match self {
            Self::Index => "index".to_string(),
            Self::Image => "image".to_string(),
            Self::Global(metric) => format!("global_{}", metric.name()),
            Self::RegionIndexList => "region_index_list".to_string(),
            Self::RegionList(metric) => format!("region_{}_list", metric.name()),
            Self::RegionTextFidelityList => "region_text_fidelity_list".to_string(),
        }
    }
}

/// Columns for a configuration, in report order.
pub fn columns_for(config: &MetricConfiguration) -> Vec<ReportColumn> {
    let metrics = config.enabled_metrics();
    let mut columns = vec![ReportColumn::Index, ReportColumn::Image];
    columns.extend(metrics.iter().map(|m| ReportColumn::Global(*m)));
    columns.push(ReportColumn::RegionIndexList);
    columns.extend(metrics.iter().map(|m| ReportColumn::RegionList(*m)));
    if config.text_fidelity {
        columns.push(ReportColumn::RegionTextFidelityList);
    }
    columns
}

/// Region-level results for the surviving regions of one pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionReport {
    /// Annotation-file positions of the surviving regions.
    pub indices: Vec<usize>,
    pub metrics: Vec<MetricResult>,
    /// One score per surviving region when text fidelity is enabled.
    pub text_fidelity: Option<Vec<Option<f64>>>,
}

impl RegionReport {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// One metric's scores across the surviving regions.
    pub fn metric_list(&self, metric: Metric) -> Vec<Option<f64>> {
        self.metrics.iter().map(|m| m.get(metric)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub index: usize,
    pub image: String,
    pub global: MetricResult,
    /// `None` when the pair's annotations could not be loaded.
    pub regions: Option<RegionReport>,
}

impl ReportRow {
    pub fn cell(&self, column: ReportColumn) -> String {
        match column {
            ReportColumn::Index => self.index.to_string(),
            ReportColumn::Image => self.image.clone(),
            ReportColumn::Global(metric) => {
                self.global.get(metric).map(format_score).unwrap_or_default()
            }
            ReportColumn::RegionIndexList => self
                .regions
                .as_ref()
                .map(|r| format_list(r.indices.iter().map(|i| i.to_string())))
                .unwrap_or_default(),
            ReportColumn::RegionList(metric) => self
                .regions
                .as_ref()
                .map(|r| format_optional_list(&r.metric_list(metric)))
                .unwrap_or_default(),
            ReportColumn::RegionTextFidelityList => self
                .regions
                .as_ref()
                .and_then(|r| r.text_fidelity.as_deref())
                .map(format_optional_list)
                .unwrap_or_default(),
        }
    }
}

/// Score text: whole numbers keep one decimal (`1.0`), non-finite values are `inf`, `-inf` or `nan`.
pub fn format_score(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn format_list(items: impl Iterator<Item = String>) -> String {
    format!("[{}]", items.collect::<Vec<_>>().join(", "))
}

fn format_optional_list(values: &[Option<f64>]) -> String {
    format_list(values.iter().map(|v| match v {
        Some(value) => format_score(*value),
        None => "None".to_string(),
    }))
}

/// Streams rows to CSV. The header is written on creation.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<ReportColumn>,
    rows_written: usize,
}

impl ReportWriter<File> {
    pub fn create(path: &Path, columns: Vec<ReportColumn>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| report_error(path, e))?;
        }
        let file = File::create(path).map_err(|e| report_error(path, e))?;
        Self::new(file, columns).map_err(|e| with_path(e, path))
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W, columns: Vec<ReportColumn>) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer
            .write_record(columns.iter().map(ReportColumn::header))
            .map_err(|e| report_error(Path::new(""), e))?;
        Ok(Self {
            writer,
            columns,
            rows_written: 0,
        })
    }

    pub fn columns(&self) -> &[ReportColumn] {
        &self.columns
    }

    pub fn write_row(&mut self, row: &ReportRow) -> Result<()> {
        let record: Vec<String> = self.columns.iter().map(|c| row.cell(*c)).collect();
        self.writer
            .write_record(&record)
            .map_err(|e| report_error(Path::new(""), e))?;
        // Rows are final once written; push them out so an interrupted run
        // keeps every completed row.
        self.writer
            .flush()
            .map_err(|e| report_error(Path::new(""), e))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| report_error(Path::new(""), e.error()))
    }
}

/// Writes a complete report in one go.
pub fn write_report(path: &Path, columns: Vec<ReportColumn>, rows: &[ReportRow]) -> Result<()> {
    let mut writer = ReportWriter::create(path, columns)?;
    for row in rows {
        writer.write_row(row).map_err(|e| with_path(e, path))?;
    }
    Ok(())
}

fn report_error(path: &Path, err: impl ToString) -> EvalError {
    EvalError::Report {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn with_path(err: EvalError, path: &Path) -> EvalError {
    match err {
        EvalError::Report { reason, .. } => EvalError::Report {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Scope;

    fn scores(psnr: Option<f64>, ssim: Option<f64>) -> MetricResult {
        let mut result = MetricResult::new();
        result.set(Metric::Psnr, psnr);
        result.set(Metric::Ssim, ssim);
        result
    }

    fn render(rows: &[ReportRow], config: &MetricConfiguration) -> String {
        let mut writer = ReportWriter::new(Vec::new(), columns_for(config)).unwrap();
        for row in rows {
            writer.write_row(row).unwrap();
        }
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_columns_follow_configuration() {
        let config = MetricConfiguration {
            psnr: true,
            ssim: false,
            perceptual: true,
            text_fidelity: true,
            ..Default::default()
        };
        let headers: Vec<String> = columns_for(&config).iter().map(|c| c.header()).collect();
        assert_eq!(
            headers,
            vec![
                "index",
                "image",
                "global_psnr",
                "global_perceptual",
                "region_index_list",
                "region_psnr_list",
                "region_perceptual_list",
                "region_text_fidelity_list",
            ]
        );
    }

    #[test]
    fn test_no_text_fidelity_column_when_disabled() {
        let columns = columns_for(&MetricConfiguration::default());
        assert!(!columns.contains(&ReportColumn::RegionTextFidelityList));
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(f64::INFINITY), "inf");
        assert_eq!(format_score(1.0), "1.0");
        assert_eq!(format_score(0.0), "0.0");
        assert_eq!(format_score(31.25), "31.25");
    }

    #[test]
    fn test_rows_distinguish_absent_from_empty() {
        let config = MetricConfiguration::default();
        let rows = vec![
            ReportRow {
                index: 0,
                image: "a".into(),
                global: scores(Some(f64::INFINITY), Some(1.0)),
                regions: Some(RegionReport {
                    indices: vec![0, 2],
                    metrics: vec![scores(Some(30.5), None), scores(Some(28.0), Some(0.5))],
                    text_fidelity: None,
                }),
            },
            ReportRow {
                index: 1,
                image: "b".into(),
                global: scores(Some(20.0), None),
                regions: None,
            },
            ReportRow {
                index: 2,
                image: "c".into(),
                global: scores(Some(20.0), Some(0.25)),
                regions: Some(RegionReport::default()),
            },
        ];
        let csv = render(&rows, &config);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "index,image,global_psnr,global_ssim,region_index_list,region_psnr_list,region_ssim_list"
        );
        assert_eq!(
            lines[1],
            r#"0,a,inf,1.0,"[0, 2]","[30.5, 28.0]","[None, 0.5]""#
        );
        assert_eq!(lines[2], "1,b,20.0,,,,");
        assert_eq!(lines[3], "2,c,20.0,0.25,[],[],[]");
    }

    #[test]
    fn test_text_fidelity_cells() {
        let config = MetricConfiguration {
            psnr: false,
            ssim: false,
            text_fidelity: true,
            ..Default::default()
        };
        let mut global = MetricResult::new();
        global.record(Metric::Psnr, Scope::Global, Ok(1.0));
        let row = ReportRow {
            index: 4,
            image: "fig".into(),
            global,
            regions: Some(RegionReport {
                indices: vec![1],
                metrics: vec![MetricResult::new()],
                text_fidelity: Some(vec![None]),
            }),
        };
        let csv = render(&[row], &config);
        assert_eq!(csv.lines().nth(1), Some("4,fig,[1],[None]"));
    }

    #[test]
    fn test_write_report_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.csv");
        write_report(&path, columns_for(&MetricConfiguration::default()), &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("index,image,global_psnr"));
    }
}
