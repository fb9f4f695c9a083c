//! Search hits and the provenance-tagged source records built from them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single result as returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub provider: String,
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// 1-based position within the provider's response.
    pub rank: usize,
}

/// A de-duplicated source carrying a provenance identifier for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub provider: String,
    pub query: String,
    #[serde(default)]
    pub matched_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl SourceRecord {
    pub fn from_hit(hit: SearchHit, query: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: hit.url,
            title: hit.title,
            content: hit.content,
            raw_content: hit.raw_content,
            score: hit.score,
            provider: hit.provider,
            query: query.to_string(),
            matched_queries: vec![query.to_string()],
            summary: None,
        }
    }

    /// Inline tag used to cite this record in report text.
    pub fn citation_tag(&self) -> String {
        format!("[src:{}]", self.id)
    }

    /// Summary when an executor produced one, otherwise the provider content.
    pub fn best_text(&self) -> &str {
        self.summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.content)
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "No Title"
        } else {
            &self.title
        }
    }
}

/// Normalise a URL for de-duplication.
///
/// Drops the fragment and one trailing slash, and lowercases scheme and host.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    let normalized = match without_fragment.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                host.to_ascii_lowercase(),
                path
            )
        }
        None => without_fragment.to_string(),
    };

    match normalized.strip_suffix('/') {
        Some(stripped) if !stripped.ends_with(':') && !stripped.ends_with('/') => {
            stripped.to_string()
        }
        _ => normalized,
    }
}

/// Sort records by descending score; unscored records go last, ties keep order.
pub fn rank_by_score(records: &mut [SourceRecord]) {
    records.sort_by(|a, b| {
        let a = a.score.unwrap_or(f64::NEG_INFINITY);
        let b = b.score.unwrap_or(f64::NEG_INFINITY);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str, score: Option<f64>) -> SearchHit {
        SearchHit {
            provider: "tavily".into(),
            url: url.into(),
            title: "Title".into(),
            content: "content".into(),
            raw_content: None,
            score,
            rank: 1,
        }
    }

    #[test]
    fn normalize_url_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path/#section"),
            "https://example.com/Path"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
        assert_eq!(normalize_url(" https://a.io/x "), "https://a.io/x");
    }

    #[test]
    fn records_get_distinct_provenance_ids() {
        let a = SourceRecord::from_hit(hit("https://a.io", Some(0.9)), "q");
        let b = SourceRecord::from_hit(hit("https://a.io", Some(0.9)), "q");
        assert_ne!(a.id, b.id);
        assert_eq!(a.citation_tag(), format!("[src:{}]", a.id));
        assert_eq!(a.matched_queries, vec!["q".to_string()]);
    }

    #[test]
    fn best_text_prefers_summary() {
        let mut record = SourceRecord::from_hit(hit("https://a.io", None), "q");
        assert_eq!(record.best_text(), "content");
        record.summary = Some("summary".into());
        assert_eq!(record.best_text(), "summary");
    }

    #[test]
    fn ranking_puts_unscored_last() {
        let mut records = vec![
            SourceRecord::from_hit(hit("https://none.io", None), "q"),
            SourceRecord::from_hit(hit("https://low.io", Some(0.8)), "q"),
            SourceRecord::from_hit(hit("https://high.io", Some(0.95)), "q"),
        ];
        rank_by_score(&mut records);
        let urls: Vec<_> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, ["https://high.io", "https://low.io", "https://none.io"]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo world", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
