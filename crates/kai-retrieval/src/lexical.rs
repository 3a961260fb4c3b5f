//! Keyword extraction and lexical scoring.
//!
//! Scoring is a pure function of `(document, keywords)`.

use kai_core::tuning::lexical::{
    BODY_FUZZY, BODY_OCCURRENCE, DISTANCE_SCALE, FUZZY_MIN_CHARS, FUZZY_THRESHOLD,
    MIN_TOKEN_CHARS, PHRASE_BOOST_MAX, TITLE_FUZZY, TITLE_HIT,
};
use kai_core::{Document, HitOrigin, SearchHit};

/// Function words and request verbs that carry no search signal.
pub const STOP_WORDS: &[&str] = &[
    "як", "мені", "для", "на", "в", "з", "по", "і", "а", "але", "або", "те", "що", "хто",
    "коли", "де", "чому", "який", "яка", "яке", "чи", "є", "був", "була", "розкажи", "скажи",
    "покажи", "знайди", "дай", "такий", "така", "таке",
];

/// Extract search keywords from free text.
///
/// Lowercases, replaces punctuation with spaces, drops short tokens and stop
/// words. When at most two keywords remain, their space-joined phrase is
/// appended as one more keyword.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut keywords: Vec<String> = cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > MIN_TOKEN_CHARS)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(String::from)
        .collect();

    if !keywords.is_empty() && keywords.len() <= PHRASE_BOOST_MAX {
        keywords.push(keywords.join(" "));
    }
    keywords
}

/// Normalized indel similarity on a 0-100 scale: `2 * LCS / (|a| + |b|) * 100`.
pub fn fuzzy_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    2.0 * lcs_len(&a, &b) as f32 / total as f32 * 100.0
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Whether any whitespace-separated word of `text` is a close fuzzy match.
fn any_fuzzy_match(keyword: &str, keyword_chars: usize, text: &str) -> bool {
    text.split_whitespace().any(|word| {
        // Length alone bounds the ratio; skip words that cannot pass.
        let word_chars = word.chars().count();
        let bound = 2.0 * keyword_chars.min(word_chars) as f32
            / (keyword_chars + word_chars) as f32
            * 100.0;
        bound > FUZZY_THRESHOLD && fuzzy_ratio(keyword, word) > FUZZY_THRESHOLD
    })
}

/// Lexical relevance of `document` to `keywords`.
pub fn score(document: &Document, keywords: &[String]) -> f32 {
    let body = document.content.to_lowercase();
    let title = document.title().unwrap_or_default().to_lowercase();

    let mut total = 0.0;
    for keyword in keywords {
        let keyword = keyword.to_lowercase();
        if keyword.trim().is_empty() {
            continue;
        }

        if title.contains(&keyword) {
            total += TITLE_HIT;
        }
        total += body.matches(keyword.as_str()).count() as f32 * BODY_OCCURRENCE;

        let chars = keyword.chars().count();
        if chars >= FUZZY_MIN_CHARS {
            if any_fuzzy_match(&keyword, chars, &title) {
                total += TITLE_FUZZY;
            }
            if any_fuzzy_match(&keyword, chars, &body) {
                total += BODY_FUZZY;
            }
        }
    }
    total
}

/// Score every candidate, keep positive scores, best first, at most `limit`.
///
/// Hits carry the raw lexical score as `relevance_score` and a synthetic
/// distance of `1 - score / 10`.
pub fn lexical_search(candidates: Vec<Document>, keywords: &[String], limit: usize) -> Vec<SearchHit> {
    if keywords.is_empty() {
        return Vec::new();
    }
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|document| {
            let s = score(&document, keywords);
            (s > 0.0).then(|| SearchHit {
                document,
                distance: 1.0 - s / DISTANCE_SCALE,
                relevance_score: s,
                origin: HitOrigin::Lexical,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}
