//! Answer quality metrics
//!
//! Ratios are in `[0, 1]`; `overall_score` is in `[0, 100]`.

use crate::retrieval::SearchHit;
use std::collections::HashSet;

/// Lowercased ASCII alphanumeric tokens of two or more characters
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

fn mentions_any(content: &str, keywords: &[String]) -> bool {
    let content = content.to_lowercase();
    keywords.iter().any(|kw| content.contains(&kw.to_lowercase()))
}

/// Fraction of expected keywords found in the answer, case-insensitively
pub fn keyword_recall(answer: &str, expected_keywords: &[String]) -> f64 {
    if expected_keywords.is_empty() {
        return 1.0;
    }
    let answer = answer.to_lowercase();
    let found = expected_keywords
        .iter()
        .filter(|kw| answer.contains(&kw.to_lowercase()))
        .count();
    found as f64 / expected_keywords.len() as f64
}

/// Token-level F1. Shared tokens are counted once; precision and recall
/// divide by the full token counts.
pub fn token_f1(answer: &str, expected_answer: &str) -> f64 {
    let answer_tokens = tokenize(answer);
    let expected_tokens = tokenize(expected_answer);
    if answer_tokens.is_empty() || expected_tokens.is_empty() {
        return 0.0;
    }

    let answer_set: HashSet<&str> = answer_tokens.iter().map(String::as_str).collect();
    let expected_set: HashSet<&str> = expected_tokens.iter().map(String::as_str).collect();
    let common = answer_set.intersection(&expected_set).count() as f64;

    let precision = common / answer_tokens.len() as f64;
    let recall = common / expected_tokens.len() as f64;
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

/// Share of distinct expected tokens present in the answer
pub fn factual_overlap(answer: &str, expected_answer: &str) -> f64 {
    let expected: HashSet<String> = tokenize(expected_answer).into_iter().collect();
    if expected.is_empty() {
        return 0.0;
    }
    let answer: HashSet<String> = tokenize(answer).into_iter().collect();
    expected.intersection(&answer).count() as f64 / expected.len() as f64
}

/// Share of retrieved passages mentioning any expected keyword
pub fn retrieval_precision(sources: &[SearchHit], expected_keywords: &[String]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let relevant = sources
        .iter()
        .filter(|hit| mentions_any(&hit.content, expected_keywords))
        .count();
    relevant as f64 / sources.len() as f64
}

/// Whether any retrieved passage mentions an expected keyword
pub fn retrieval_hit(sources: &[SearchHit], expected_keywords: &[String]) -> bool {
    sources
        .iter()
        .any(|hit| mentions_any(&hit.content, expected_keywords))
}

/// Weighted score in `[0, 100]`, rounded to one decimal.
///
/// Keyword recall weighs 40, token F1 and factual overlap 30 each. With
/// retrieved sources the answer part is scaled to 80 and retrieval
/// precision contributes the remaining 20.
pub fn overall_score(
    answer: &str,
    expected_answer: &str,
    expected_keywords: &[String],
    sources: &[SearchHit],
) -> f64 {
    let kw = keyword_recall(answer, expected_keywords);
    let f1 = token_f1(answer, expected_answer);
    let fo = factual_overlap(answer, expected_answer);

    let mut score = kw * 40.0 + f1 * 30.0 + fo * 30.0;
    if !sources.is_empty() {
        score = score * 0.8 + retrieval_precision(sources, expected_keywords) * 20.0;
    }
    round_to(score, 1)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
