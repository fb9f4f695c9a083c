//! Markdown reports assembled from provenance-tagged sources.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SourceRecord;
use crate::query::slugify;

static CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[src:\s*([0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12})\s*\]")
        .expect("invalid citation regex")
});

/// Provenance ids cited in `text`, unique, in order of first appearance.
pub fn extract_citations(text: &str) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    CITATION
        .captures_iter(text)
        .filter_map(|caps| Uuid::parse_str(&caps[1]).ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// A finished research report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub topic: String,
    pub title: String,
    pub body_markdown: String,
    pub sources: Vec<SourceRecord>,
    pub requires_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_notes: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(
        topic: impl Into<String>,
        title: impl Into<String>,
        body_markdown: impl Into<String>,
        sources: Vec<SourceRecord>,
    ) -> Self {
        Self {
            topic: topic.into(),
            title: title.into(),
            body_markdown: body_markdown.into(),
            sources,
            requires_review: false,
            review_notes: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Sources cited in the body, in order of first citation.
    pub fn cited_sources(&self) -> Vec<&SourceRecord> {
        let by_id: HashMap<Uuid, &SourceRecord> =
            self.sources.iter().map(|source| (source.id, source)).collect();
        extract_citations(&self.body_markdown)
            .into_iter()
            .filter_map(|id| by_id.get(&id).copied())
            .collect()
    }

    /// Full Markdown document: title, review banner, body, sources.
    pub fn render_markdown(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "# {}\n", self.title);
        let _ = writeln!(
            output,
            "_Generated {} · {} sources consulted_\n",
            self.generated_at.format("%Y-%m-%d %H:%M UTC"),
            self.sources.len()
        );

        if self.requires_review {
            output.push_str(
                "> **Review suggested:** automated fact-checking flagged this report.\n",
            );
        } else if !self.review_notes.is_empty() {
            output.push_str("> **Reviewer notes:**\n");
        }
        for note in &self.review_notes {
            let _ = writeln!(output, "> - {note}");
        }
        if self.requires_review || !self.review_notes.is_empty() {
            output.push('\n');
        }

        output.push_str(self.body_markdown.trim());
        output.push_str("\n\n## Sources\n\n");

        let cited = self.cited_sources();
        if cited.is_empty() {
            output.push_str("_No sources were cited._\n");
        }
        for (idx, source) in cited.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {} {} - <{}>",
                idx + 1,
                source.citation_tag(),
                source.display_title(),
                source.url
            );
        }
        output
    }

    /// File-name stem for this report.
    pub fn slug(&self) -> String {
        slugify(&self.topic)
    }
}

/// Write `<dir>/<slug><suffix>.md`, creating `dir` when needed.
pub fn write_report(dir: &Path, report: &Report, suffix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let path = dir.join(format!("{}{suffix}.md", report.slug()));
    std::fs::write(&path, report.render_markdown())
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(path)
}

/// Wrap rendered Markdown in a standalone HTML page.
pub fn render_html(title: &str, markdown: &str) -> String {
    use pulldown_cmark::{Options, Parser, html};

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut body = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut body, parser);

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>\n\
         body {{ font-family: Georgia, serif; max-width: 48rem; margin: 2rem auto; \
         line-height: 1.5; }}\n\
         table {{ border-collapse: collapse; }}\n\
         td, th {{ border: 1px solid #999; padding: 0.25rem 0.5rem; }}\n\
         blockquote {{ border-left: 4px solid #c60; padding-left: 1rem; color: #633; }}\n\
         </style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
