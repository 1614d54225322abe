//! Text normalization and keyword extraction for fingerprints.
//!
//! Markets and news items go through the same pipeline so their keyword
//! sets are comparable: normalize -> tokenize -> stopword filter -> stem.

use deunicode::deunicode;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;

/// Lowercase, strip URLs, fold unicode to ASCII, collapse whitespace.
pub fn normalize(text: &str) -> String {
    lazy_static! {
        static ref URL_RE: Regex = Regex::new(r"https?://\S+").unwrap();
    }

    let lower = text.to_lowercase();
    let no_url = URL_RE.replace_all(&lower, "");
    let ascii = deunicode(&no_url);

    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the keyword token list from already-normalized text: word and
/// number tokens, stopwords removed, Porter-stemmed, first-occurrence order,
/// deduplicated.
pub fn keyword_tokens(normalized: &str) -> Vec<String> {
    lazy_static! {
        // words: fed, inflation, lagarde
        // numbers (with optional unit suffix): 2026, 1.25, 3%, 25bps
        static ref TOKEN_RE: Regex = Regex::new(
            r"[a-zA-Z]+|\d+(?:\.\d+)?(?:%|bps|bp)?"
        ).unwrap();

        // Generic + newsy stopwords. Domain nouns stay: they are exactly
        // what distinguishes one market from another.
        static ref STOPWORDS: HashSet<&'static str> = {
            let words = [
                "the", "a", "an", "of", "and", "or", "to", "in", "on", "for",
                "with", "by", "at", "from", "is", "are", "was", "were", "be",
                "this", "that", "it", "as", "will", "may", "might", "could",
                "should", "would", "has", "have", "had", "not", "no", "yes",
                "breaking", "latest", "update", "exclusive", "report",
                "reports", "live", "video", "watch", "sources", "source",
                "official", "officials", "says", "said", "according",
                "statement", "developing", "coverage", "analysis", "news",
            ];
            words.iter().cloned().collect()
        };
    }

    let stemmer = Stemmer::create(Algorithm::English);
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    for m in TOKEN_RE.find_iter(normalized) {
        let token = m.as_str();
        if token.len() <= 1 {
            continue;
        }
        if STOPWORDS.contains(token) {
            continue;
        }

        let stem = stemmer.stem(token).to_string();
        if seen.insert(stem.clone()) {
            tokens.push(stem);
        }
    }

    tokens
}

/// Jaccard overlap between two keyword lists: |A ∩ B| / |A ∪ B|, in [0, 1].
pub fn token_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let sa: HashSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let sb: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();

    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();

    intersection as f64 / union as f64
}
