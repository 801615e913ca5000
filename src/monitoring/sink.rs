//! Append-only publication of drift reports.

use crate::error::MonitoringError;
use crate::types::DriftReport;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

pub const REPORT_JSON: &str = "drift_report.json";
pub const REPORT_HTML: &str = "drift_report.html";

/// Destination for published drift reports. Publishing never replaces an
/// earlier report.
pub trait ArtifactSink: Send + Sync {
    /// Store the report and its rendered form, returning where it landed.
    fn publish(&self, report: &DriftReport, rendered: &str) -> Result<PathBuf, MonitoringError>;
}

/// Unique run identifier: UTC timestamp plus a random suffix.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"), &suffix[..8])
}

/// Writes each report into `<root>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    /// Create a new sink publishing under `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory holding one subdirectory per run
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn sink_err(path: &Path) -> impl FnOnce(std::io::Error) -> MonitoringError + '_ {
    move |source| MonitoringError::Sink {
        path: path.to_path_buf(),
        source,
    }
}

fn write_new(path: &Path, contents: &[u8]) -> Result<(), MonitoringError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(sink_err(path))?;
    file.write_all(contents).map_err(sink_err(path))?;
    file.sync_data().map_err(sink_err(path))
}

impl ArtifactSink for FsArtifactSink {
    fn publish(&self, report: &DriftReport, rendered: &str) -> Result<PathBuf, MonitoringError> {
        fs::create_dir_all(&self.root).map_err(sink_err(&self.root))?;

        // create_dir fails on an existing run directory
        let run_dir = self.root.join(&report.run_id);
        fs::create_dir(&run_dir).map_err(sink_err(&run_dir))?;

        let json = serde_json::to_vec_pretty(report)?;
        write_new(&run_dir.join(REPORT_JSON), &json)?;
        write_new(&run_dir.join(REPORT_HTML), rendered.as_bytes())?;

        info!(
            run_id = %report.run_id,
            path = %run_dir.display(),
            dataset_drift = report.dataset_drift,
            "Drift report published"
        );
        Ok(run_dir)
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a self-contained HTML summary of a report.
pub fn render_html(report: &DriftReport) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!(
        "<title>Data drift report {}</title>\n",
        escape_html(&report.run_id)
    ));
    html.push_str(
        "<style>body{font-family:sans-serif}table{border-collapse:collapse}\
         td,th{border:1px solid #ccc;padding:4px 8px}.drift{background:#fdd}</style>\n",
    );
    html.push_str("</head>\n<body>\n");
    html.push_str("<h1>Data drift report</h1>\n<ul>\n");
    html.push_str(&format!("<li>Run: {}</li>\n", escape_html(&report.run_id)));
    html.push_str(&format!("<li>Generated: {}</li>\n", report.generated_at.to_rfc3339()));
    html.push_str(&format!("<li>Method: {}</li>\n", escape_html(&report.method)));
    html.push_str(&format!(
        "<li>Rows: reference {}, current {}</li>\n",
        report.reference_rows, report.current_rows
    ));
    html.push_str(&format!(
        "<li>Drifted features: {} of {} ({:.1}%)</li>\n",
        report.drifted_features,
        report.features.len(),
        report.share_drifted * 100.0
    ));
    html.push_str(&format!(
        "<li>Dataset drift: <strong>{}</strong></li>\n</ul>\n",
        if report.dataset_drift { "detected" } else { "not detected" }
    ));

    html.push_str(
        "<table>\n<tr><th>Feature</th><th>Type</th><th>Reference mean</th>\
         <th>Current mean</th><th>Score</th><th>Threshold</th><th>Drift</th></tr>\n",
    );
    for f in &report.features {
        let kind = match f.kind {
            crate::types::FeatureKind::Numerical => "numerical",
            crate::types::FeatureKind::Categorical => "categorical",
        };
        html.push_str(&format!(
            "<tr{}><td>{}</td><td>{}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{:.2}</td><td>{}</td></tr>\n",
            if f.drift_detected { " class=\"drift\"" } else { "" },
            escape_html(&f.feature),
            kind,
            f.reference_mean,
            f.current_mean,
            f.score,
            f.threshold,
            if f.drift_detected { "yes" } else { "no" }
        ));
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}
