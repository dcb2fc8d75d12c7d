//! Run report rendering: JSON, or a small LaTeX document for `.tex` paths.

use crate::error::Result;
use crate::metrics::MetricsSnapshot;
use crate::processor::RunSummary;

use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Serializable view of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub metrics: &'a MetricsSnapshot,
    pub conserved: bool,
    pub final_table: Option<&'a PathBuf>,
    pub uploaded_to: Option<&'a str>,
    pub upload_error: Option<&'a str>,
}

impl<'a> RunReport<'a> {
    pub fn from_summary(summary: &'a RunSummary) -> Self {
        Self {
            metrics: &summary.metrics,
            conserved: summary.metrics.is_conserved(),
            final_table: summary.final_table.as_ref(),
            uploaded_to: summary.uploaded_to.as_deref(),
            upload_error: summary.upload_error.as_deref(),
        }
    }
}

/// Report format chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Latex,
}

impl ReportFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tex") => ReportFormat::Latex,
            _ => ReportFormat::Json,
        }
    }
}

pub fn render_json(report: &RunReport<'_>) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn render_latex(report: &RunReport<'_>) -> String {
    let m = report.metrics;
    let mut rows: Vec<(&str, String)> = vec![
        ("Files processed", format!("{} of {}", m.files_succeeded, m.files_total)),
        ("Files failed", m.files_failed.to_string()),
        ("Input rows", m.input_row_count.to_string()),
        ("Output wide rows", m.output_row_count.to_string()),
        ("Output trips", m.output_trip_count.to_string()),
        ("Discarded rows", m.discarded_row_count.to_string()),
        ("\\quad schema", m.discards.schema.to_string()),
        ("\\quad parse failure", m.discards.parse_failure.to_string()),
        ("\\quad low count", m.discards.low_count.to_string()),
        ("\\quad i/o", m.discards.io.to_string()),
        ("Period mismatches", m.period_mismatch_rows.to_string()),
        ("Batch size", m.batch_size.to_string()),
        ("Peak memory (MB)", format!("{:.1}", m.peak_memory_mb())),
        ("Elapsed (s)", format!("{:.1}", m.elapsed_seconds)),
    ];
    rows.push((
        "Conservation",
        if report.conserved { "holds" } else { "violated" }.to_string(),
    ));

    let mut doc = String::new();
    doc.push_str("\\documentclass{article}\n\\begin{document}\n");
    doc.push_str("\\section*{Trip pivot run}\n");
    doc.push_str("\\begin{tabular}{lr}\n\\hline\n");
    for (label, value) in rows {
        let _ = writeln!(doc, "{} & {} \\\\", label, value);
    }
    doc.push_str("\\hline\n\\end{tabular}\n");

    if !m.failures.is_empty() {
        doc.push_str("\n\\subsection*{Failed files}\n\\begin{itemize}\n");
        for failure in &m.failures {
            let _ = writeln!(doc, "\\item {}", escape_latex(&failure.to_string()));
        }
        doc.push_str("\\end{itemize}\n");
    }
    doc.push_str("\\end{document}\n");
    doc
}

fn escape_latex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '~' => escaped.push_str("\\textasciitilde{}"),
            '^' => escaped.push_str("\\textasciicircum{}"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render and write the report, format chosen by extension
pub fn write_report(summary: &RunSummary, path: &Path) -> Result<()> {
    let report = RunReport::from_summary(summary);
    let body = match ReportFormat::for_path(path) {
        ReportFormat::Json => render_json(&report)?,
        ReportFormat::Latex => render_latex(&report),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FileFailure, FileStage};
    use crate::metrics::RunMetrics;
    use tempfile::TempDir;

    fn summary() -> RunSummary {
        let mut metrics = RunMetrics::new(2).snapshot();
        metrics.input_row_count = 10;
        metrics.output_trip_count = 7;
        metrics.discarded_row_count = 3;
        metrics.discards.low_count = 3;
        metrics.failures = vec![FileFailure::new(
            "green_tripdata_2023-01.parquet",
            FileStage::Streaming,
            "truncated",
        )];
        RunSummary {
            metrics,
            final_table: Some(PathBuf::from("out/wide_table.parquet")),
            uploaded_to: None,
            upload_error: None,
        }
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(ReportFormat::for_path(Path::new("r.TEX")), ReportFormat::Latex);
        assert_eq!(ReportFormat::for_path(Path::new("r.json")), ReportFormat::Json);
        assert_eq!(ReportFormat::for_path(Path::new("report")), ReportFormat::Json);
    }

    #[test]
    fn test_json_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/report.json");
        write_report(&summary(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["conserved"], true);
        assert_eq!(value["metrics"]["discards"]["low_count"], 3);
        assert_eq!(value["final_table"], "out/wide_table.parquet");
    }

    #[test]
    fn test_latex_report_escapes_file_names() {
        let summary = summary();
        let tex = render_latex(&RunReport::from_summary(&summary));
        assert!(tex.starts_with("\\documentclass{article}"));
        assert!(tex.contains("Input rows & 10 \\\\"));
        assert!(tex.contains("green\\_tripdata\\_2023-01.parquet"));
        assert!(tex.trim_end().ends_with("\\end{document}"));
    }
}
