use super::manifest::Manifest;
use crate::config::render_command;
use crate::errors::{FreezerError, FreezerResult};
use crate::models::{AcquisitionType, CaseInfo, TrustedTime};
use crate::task::{TaskRecord, TaskStatus};
use crate::utils::{escape_html, format_size};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub const REPORT_PDF: &str = "report.pdf";
pub const REPORT_HTML: &str = "report.html";

/// Everything printed on the acquisition report.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub directory: PathBuf,
    pub acquisition_type: AcquisitionType,
    pub case_info: CaseInfo,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
    pub manifest: Option<Manifest>,
    pub trusted_time: Option<TrustedTime>,
}

/// Produces the final report of an acquisition inside its directory.
pub trait ReportGenerator: Send + Sync {
    fn generate(&self, input: &ReportInput) -> FreezerResult<PathBuf>;
}

/// Renders the HTML report.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlReport;

impl HtmlReport {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, input: &ReportInput) -> String {
        let case = &input.case_info;
        let optional = |value: &Option<String>| escape_html(value.as_deref().unwrap_or("-"));

        let mut case_rows = String::new();
        for (label, value) in [
            ("Case", escape_html(&case.name)),
            ("Lawyer", optional(&case.lawyer_name)),
            ("Proceeding type", optional(&case.proceeding_type)),
            ("Courthouse", optional(&case.courthouse)),
            ("Proceeding number", optional(&case.proceeding_number)),
            ("Acquisition type", input.acquisition_type.to_string()),
            ("Target", escape_html(&input.url)),
            ("Operator", escape_html(&format!("{}@{}", whoami::username(), whoami::devicename()))),
            ("Started", input.started_at.to_rfc3339()),
            ("Finished", input.finished_at.to_rfc3339()),
        ] {
            case_rows.push_str(&format!("<tr><th>{}</th><td>{}</td></tr>\n", label, value));
        }

        let time_row = match &input.trusted_time {
            Some(t) => format!(
                "<p class=\"time\">Trusted time: <b>{}</b> ({}){}</p>",
                t.time.to_rfc3339(),
                escape_html(&t.source),
                t.error
                    .as_deref()
                    .map(|e| format!(" <span class=\"failed\">{}</span>", escape_html(e)))
                    .unwrap_or_default()
            ),
            None => String::new(),
        };

        let mut task_rows = String::new();
        for task in &input.tasks {
            let class = match task.status {
                TaskStatus::Completed => "completed",
                TaskStatus::Failed => "failed",
                _ => "pending",
            };
            task_rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td></tr>\n",
                task.id.phase,
                task.id.kind,
                class,
                task.status,
                task.finished_at.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
                escape_html(&task.detail)
            ));
        }

        let mut file_rows = String::new();
        if let Some(manifest) = &input.manifest {
            for entry in &manifest.entries {
                file_rows.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td class=\"hash\">{}</td><td class=\"hash\">{}</td></tr>\n",
                    escape_html(&entry.path),
                    format_size(entry.size),
                    entry.digests.sha256,
                    entry.digests.md5
                ));
            }
        }

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Acquisition report - {title}</title>
<style>
body {{ font-family: Helvetica, Arial, sans-serif; font-size: 11px; color: #1d1d1f; margin: 24px; }}
h1 {{ font-size: 20px; border-bottom: 2px solid #1d1d1f; padding-bottom: 6px; }}
h2 {{ font-size: 14px; margin-top: 24px; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ border: 1px solid #c7c7cc; padding: 4px 6px; text-align: left; vertical-align: top; }}
th {{ background: #f2f2f7; width: 22%; }}
.hash {{ font-family: Courier, monospace; font-size: 9px; word-break: break-all; }}
.completed {{ color: #248a3d; }}
.failed {{ color: #d70015; }}
.pending {{ color: #8e8e93; }}
</style>
</head>
<body>
<h1>Acquisition report</h1>
{time_row}
<h2>Case</h2>
<table>
{case_rows}</table>
<h2>Tasks</h2>
<table>
<tr><th>Phase</th><th>Task</th><th>Status</th><th>Finished</th><th>Detail</th></tr>
{task_rows}</table>
<h2>Files ({file_count}, {total})</h2>
<table>
<tr><th>File</th><th>Size</th><th>SHA-256</th><th>MD5</th></tr>
{file_rows}</table>
</body>
</html>
"#,
            title = escape_html(&case.name),
            time_row = time_row,
            case_rows = case_rows,
            task_rows = task_rows,
            file_count = input.manifest.as_ref().map(|m| m.entries.len()).unwrap_or(0),
            total = format_size(input.manifest.as_ref().map(Manifest::total_size).unwrap_or(0)),
            file_rows = file_rows,
        )
    }
}

/// HTML report converted to `report.pdf` by an external command.
///
/// When conversion fails `report.html` is left in place and an error is
/// returned.
pub struct PdfReportGenerator {
    html: HtmlReport,
    command: Vec<String>,
    timeout: Duration,
}

impl PdfReportGenerator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            html: HtmlReport::new(),
            command,
            timeout,
        }
    }

    fn convert(&self, html: &Path, pdf: &Path) -> FreezerResult<()> {
        let args = render_command(
            &self.command,
            &[
                ("input", &html.display().to_string()),
                ("output", &pdf.display().to_string()),
            ],
        );
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| FreezerError::Report("no PDF command configured".to_string()))?;

        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FreezerError::Report(format!("{}: {}", program, e)))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(100)),
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FreezerError::Report(format!("{} timed out", program)));
                }
                Err(e) => return Err(FreezerError::Report(format!("{}: {}", program, e))),
            }
        };

        if !status.success() || !pdf.exists() {
            return Err(FreezerError::Report(format!("{} exited with {}", program, status)));
        }
        Ok(())
    }
}

impl ReportGenerator for PdfReportGenerator {
    fn generate(&self, input: &ReportInput) -> FreezerResult<PathBuf> {
        let html_path = input.directory.join(REPORT_HTML);
        let pdf_path = input.directory.join(REPORT_PDF);
        std::fs::write(&html_path, self.html.render(input)).map_err(|e| FreezerError::io(e, html_path.clone()))?;

        self.convert(&html_path, &pdf_path)
            .map_err(|e| FreezerError::Report(format!("{}; {} kept", e, REPORT_HTML)))?;

        if let Err(e) = std::fs::remove_file(&html_path) {
            log::warn!("Could not remove {:?}: {}", html_path, e);
        }
        Ok(pdf_path)
    }
}
