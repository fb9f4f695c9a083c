//! Research topics and the sub-queries they fan out into.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::FanoutError;

/// A topic plus the sub-queries issued on its behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub topic: String,
    pub sub_queries: Vec<String>,
}

impl Query {
    /// Build a query, normalising the sub-query list.
    ///
    /// Blank and case-insensitively repeated sub-queries are dropped. When
    /// nothing survives the topic itself becomes the only sub-query.
    pub fn new<I, S>(topic: impl Into<String>, sub_queries: I) -> Result<Self, FanoutError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(FanoutError::InvalidInput(
                "research topic must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        let mut normalized: Vec<String> = sub_queries
            .into_iter()
            .map(|q| q.as_ref().trim().to_string())
            .filter(|q| !q.is_empty())
            .filter(|q| seen.insert(q.to_lowercase()))
            .collect();

        if normalized.is_empty() {
            normalized.push(topic.clone());
        }

        Ok(Self {
            topic,
            sub_queries: normalized,
        })
    }

    /// Query that searches for the topic alone.
    pub fn topic_only(topic: impl Into<String>) -> Result<Self, FanoutError> {
        Self::new(topic, std::iter::empty::<String>())
    }

    pub fn len(&self) -> usize {
        self.sub_queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_queries.is_empty()
    }

    /// File-name stem derived from the topic.
    pub fn slug(&self) -> String {
        slugify(&self.topic)
    }
}

/// Stem used when a topic has no letters or digits at all.
const FALLBACK_SLUG: &str = "report";

const MAX_SLUG_CHARS: usize = 64;

/// Lowercase slug of letters and digits in any script; runs of other
/// characters collapse into `_`. Capped at 64 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut chars = 0;
    let mut pending_sep = false;
    for ch in text.chars() {
        if !ch.is_alphanumeric() {
            pending_sep = true;
            continue;
        }
        if chars >= MAX_SLUG_CHARS {
            break;
        }
        if pending_sep && !slug.is_empty() {
            slug.push('_');
            chars += 1;
        }
        pending_sep = false;
        for lower in ch.to_lowercase() {
            slug.push(lower);
            chars += 1;
        }
    }

    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sub_queries_fall_back_to_topic() {
        let query = Query::new("Solid-state batteries", Vec::<String>::new()).unwrap();
        assert_eq!(query.sub_queries, vec!["Solid-state batteries".to_string()]);
    }

    #[test]
    fn blanks_and_duplicates_are_dropped() {
        let query = Query::new(
            "topic",
            ["  EV demand 2025 ", "", "ev demand 2025", "lithium prices"],
        )
        .unwrap();
        assert_eq!(
            query.sub_queries,
            vec!["EV demand 2025".to_string(), "lithium prices".to_string()]
        );
    }

    #[test]
    fn blank_topic_is_rejected() {
        let err = Query::new("   ", ["q"]).unwrap_err();
        assert!(matches!(err, FanoutError::InvalidInput(_)));
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slugify("AI Chips: 2025 Outlook!"), "ai_chips_2025_outlook");
        assert_eq!(slugify("  ---  "), "report");
        assert_eq!(slugify("Über café"), "über_café");
    }

    #[test]
    fn slug_keeps_non_latin_topics_apart() {
        let japan = slugify("日本の電池市場");
        let china = slugify("中国の電池市場");
        assert_eq!(japan, "日本の電池市場");
        assert_ne!(japan, china);
        assert_eq!(slugify("Рынок батарей"), "рынок_батарей");
    }

    #[test]
    fn slug_is_capped() {
        let long = "battery ".repeat(40);
        let slug = slugify(&long);
        assert!(slug.chars().count() <= 64);
        assert!(!slug.ends_with('_'));
    }
}
