//! Hand-off of finished reports to the external browser tool for PDF output.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, instrument};

use crate::FanoutError;
use crate::report::{Report, render_html};

/// Renders a report to HTML and asks the browser tool to print it as PDF.
///
/// The tool is driven with two invocations: `<program> open file://<html>`
/// followed by `<program> pdf <output.pdf>`.
#[derive(Debug, Clone)]
pub struct BrowserPdfExporter {
    program: String,
}

impl BrowserPdfExporter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Write `<stem>.html` next to `markdown_path` and produce `<stem>.pdf`.
    #[instrument(name = "export.pdf", skip(self, report))]
    pub async fn export(
        &self,
        report: &Report,
        markdown_path: &Path,
    ) -> Result<PathBuf, FanoutError> {
        let html_path = markdown_path.with_extension("html");
        let pdf_path = markdown_path.with_extension("pdf");

        let html = render_html(&report.title, &report.render_markdown());
        tokio::fs::write(&html_path, html).await.map_err(|err| {
            FanoutError::Export(format!("failed to write {}: {err}", html_path.display()))
        })?;

        let absolute = std::path::absolute(&html_path).map_err(|err| {
            FanoutError::Export(format!("failed to resolve {}: {err}", html_path.display()))
        })?;
        let url = format!("file://{}", absolute.display());

        self.invoke(&["open", &url]).await?;
        self.invoke(&["pdf", &pdf_path.display().to_string()]).await?;

        info!(pdf = %pdf_path.display(), "PDF exported");
        Ok(pdf_path)
    }

    async fn invoke(&self, args: &[&str]) -> Result<(), FanoutError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|err| {
                FanoutError::Export(format!("failed to launch {}: {err}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FanoutError::Export(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Default for BrowserPdfExporter {
    fn default() -> Self {
        Self::new("agent-browser")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_an_export_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let markdown = dir.path().join("topic_report.md");
        let report = Report::new("topic", "Research Report: topic", "Body.", Vec::new());

        let exporter = BrowserPdfExporter::new("deepfanout-no-such-browser-tool");
        let err = exporter.export(&report, &markdown).await.unwrap_err();

        assert!(matches!(err, FanoutError::Export(_)));
        assert!(dir.path().join("topic_report.html").exists());
    }

    #[cfg(unix)]
    fn fake_browser(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("fake-browser");
        std::fs::write(&program, format!("#!/bin/sh\n{script}\n")).expect("write script");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        program
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn browser_tool_opens_html_then_prints_pdf() {
        let dir = tempfile::tempdir().expect("temp dir");
        let calls = dir.path().join("calls.log");
        let program = fake_browser(
            dir.path(),
            &format!(
                "echo \"$@\" >> '{}'\nif [ \"$1\" = pdf ]; then echo pdf > \"$2\"; fi",
                calls.display()
            ),
        );
        let markdown = dir.path().join("topic_report.md");
        let report = Report::new("topic", "Research Report: topic", "Body.", Vec::new());

        let exporter = BrowserPdfExporter::new(program.display().to_string());
        let pdf = exporter.export(&report, &markdown).await.unwrap();

        assert_eq!(pdf, dir.path().join("topic_report.pdf"));
        assert!(pdf.exists());

        let log = std::fs::read_to_string(calls).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("open file://"));
        assert!(lines[0].ends_with("topic_report.html"));
        assert_eq!(lines[1], format!("pdf {}", pdf.display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_browser_step_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let program = fake_browser(dir.path(), "echo 'no display' >&2\nexit 1");
        let markdown = dir.path().join("topic_report.md");
        let report = Report::new("topic", "Research Report: topic", "Body.", Vec::new());

        let exporter = BrowserPdfExporter::new(program.display().to_string());
        let err = exporter.export(&report, &markdown).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains(" open exited with"), "{message}");
        assert!(message.contains("no display"));
    }
}
