//! Heuristic keyword and summary extraction
//!
//! Deterministic fallback producer of `(keywords, summary, snippet)` from a
//! page's title and body text. The primary extraction path is an on-device
//! model behind the [`ExternalExtractor`] capability; this module is what
//! the pipeline falls back to when that path is absent, slow, or empty —
//! pure string processing, no model calls.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::constants::{
    MAX_CONTEXT_SNIPPET_LENGTH, MAX_KEYWORDS_PER_PAGE, MAX_SUMMARY_LENGTH, MIN_TOKEN_LENGTH,
    SUMMARY_TARGET_LENGTH, TITLE_SCORE_BOOST,
};

/// External keyword extractor capability (e.g. an on-device model).
///
/// A `None` or empty result, an error swallowed by the implementation, or a
/// pipeline-side timeout all mean "not available" and trigger the heuristic
/// fallback.
#[async_trait]
pub trait ExternalExtractor: Send + Sync {
    async fn extract(&self, title: &str, text: &str) -> Option<Vec<String>>;
}

/// Output of a heuristic extraction pass
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub keywords: Vec<String>,
    pub summary: String,
    pub snippet: String,
}

/// Lowercase a keyword and collapse internal whitespace
pub fn normalize_keyword(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters without splitting a codepoint
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Common terms excluded from keyword candidates
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "although", "always", "am",
    "an", "and", "any", "are", "around", "as", "at", "back", "be", "because", "been", "before",
    "being", "below", "between", "both", "but", "by", "can", "cannot", "could", "dare", "did",
    "do", "does", "doing", "down", "during", "each", "either", "even", "ever", "every", "few",
    "first", "for", "from", "further", "get", "got", "had", "has", "have", "having", "he", "her",
    "here", "hers", "him", "his", "how", "however", "i", "if", "in", "into", "is", "it", "its",
    "itself", "just", "like", "made", "make", "many", "may", "me", "might", "more", "most",
    "much", "must", "my", "need", "neither", "never", "new", "no", "nor", "not", "now", "of",
    "off", "on", "once", "one", "only", "onto", "or", "other", "ought", "our", "ours", "out",
    "over", "own", "page", "per", "same", "shall", "she", "should", "since", "so", "some", "still",
    "such", "than", "that", "the", "their", "theirs", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "upon", "us", "used", "using",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "within", "without", "would", "yet", "you", "your", "yours",
];

/// Deterministic keyword/summary/snippet producer (C2)
pub struct HeuristicExtractor {
    token_re: Regex,
    stopwords: HashSet<&'static str>,
    max_keywords: usize,
    max_summary: usize,
    summary_target: usize,
    max_snippet: usize,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self {
            token_re: Regex::new(r"[a-zA-Z]{3,}").expect("static token regex"),
            stopwords: STOPWORDS.iter().copied().collect(),
            max_keywords: MAX_KEYWORDS_PER_PAGE,
            max_summary: MAX_SUMMARY_LENGTH,
            summary_target: SUMMARY_TARGET_LENGTH,
            max_snippet: MAX_CONTEXT_SNIPPET_LENGTH,
        }
    }
}

impl HeuristicExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_keywords: config.max_keywords_per_page,
            max_summary: config.max_summary_length,
            max_snippet: config.max_snippet_length,
            ..Default::default()
        }
    }

    /// Extract keywords, a summary, and a content snippet.
    ///
    /// Pure: identical inputs produce identical output.
    pub fn extract(&self, title: &str, text: &str) -> Extraction {
        Extraction {
            keywords: self.keywords(title, text),
            summary: self.summarize(text),
            snippet: truncate_chars(text, self.max_snippet),
        }
    }

    /// Score tokens by `count(token) + 3·presence_in_title`, highest first,
    /// ties broken lexicographically
    fn keywords(&self, title: &str, text: &str) -> Vec<String> {
        let title_tokens: HashSet<String> = self.tokenize(title).collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for token in self.tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }
        for token in &title_tokens {
            counts.entry(token.clone()).or_insert(0);
        }

        let mut scored: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(token, count)| {
                let boost = if title_tokens.contains(&token) {
                    TITLE_SCORE_BOOST
                } else {
                    0
                };
                (token, count + boost)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(self.max_keywords);
        scored.into_iter().map(|(token, _)| token).collect()
    }

    fn tokenize<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        self.token_re
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(move |t| t.len() >= MIN_TOKEN_LENGTH && !self.stopwords.contains(t.as_str()))
    }

    /// Concatenate leading sentences until the summary reaches the target
    /// length, never exceeding the cap
    fn summarize(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        let mut out_chars = 0usize;
        for sentence in split_sentences(text) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let sentence_chars = sentence.chars().count();
            let sep = usize::from(!out.is_empty());
            if out_chars + sep + sentence_chars > self.max_summary {
                break;
            }
            if sep == 1 {
                out.push(' ');
            }
            out.push_str(sentence);
            out_chars += sep + sentence_chars;
            if out_chars >= self.summary_target {
                break;
            }
        }

        if out.is_empty() {
            // A single sentence longer than the cap: hard truncate
            out = truncate_chars(text, self.max_summary);
        }
        out
    }
}

/// Split on `.`, `!`, `?` followed by whitespace, keeping the terminator
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    sentences.push(&text[start..end]);
                    start = end;
                }
            }
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}
