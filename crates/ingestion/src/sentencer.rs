//! Sentence segmentation
//!
//! UAX#29 sentence boundaries, corrected with per-language abbreviation lists
//! so that "Dr. Smith" or "z. B." do not end a sentence. Offsets are byte
//! offsets into the source, shifted by the caller's offset.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use whatlang::Lang;

/// A sentence located in its source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
}

const ENGLISH: &[&str] = &[
    "approx", "corp", "dept", "dr", "e.g", "fig", "i.e", "inc", "jr", "ltd", "mr", "mrs", "ms",
    "mt", "prof", "sr", "st", "vol", "vs",
];
const GERMAN: &[&str] = &[
    "b", "bzw", "ca", "d.h", "dr", "evtl", "nr", "prof", "str", "u.a", "usw", "vgl", "z.b",
];
const FRENCH: &[&str] = &["cf", "dr", "env", "m", "mlle", "mme", "p.ex", "prof", "st"];
const SPANISH: &[&str] = &["av", "dr", "dra", "p.ej", "prof", "sr", "sra", "srta", "ud", "uds"];
const ITALIAN: &[&str] = &["dott", "ecc", "es", "prof", "sig", "sig.ra"];
const PORTUGUESE: &[&str] = &["dr", "dra", "ex", "prof", "sr", "sra"];
const DUTCH: &[&str] = &["bijv", "d.w.z", "dhr", "dr", "mevr", "o.a", "prof"];

/// Detect the language of `text`, if it can be told
pub fn detect_language(text: &str) -> Option<Lang> {
    whatlang::detect(text).map(|info| info.lang())
}

fn abbreviations(lang: Option<Lang>) -> &'static [&'static str] {
    match lang {
        Some(Lang::Deu) => GERMAN,
        Some(Lang::Fra) => FRENCH,
        Some(Lang::Spa) => SPANISH,
        Some(Lang::Ita) => ITALIAN,
        Some(Lang::Por) => PORTUGUESE,
        Some(Lang::Nld) => DUTCH,
        _ => ENGLISH,
    }
}

/// True when `segment` ends in an abbreviation or an initial rather than a
/// real sentence terminator.
fn ends_with_abbreviation(segment: &str, abbreviations: &[&str]) -> bool {
    let trimmed = segment.trim_end();
    if !trimmed.ends_with('.') {
        return false;
    }

    let Some(word) = trimmed.split_whitespace().last() else {
        return false;
    };
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());
    let body = word.trim_end_matches('.');

    let mut chars = body.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_uppercase() {
            return true;
        }
    }

    let lower = body.to_lowercase();
    abbreviations.contains(&lower.as_str()) || ENGLISH.contains(&lower.as_str())
}

/// Shrink `[start, end)` to its non-whitespace core
fn trimmed_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let segment = &text[start..end];
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = segment.len() - segment.trim_start().len();
    Some((start + lead, start + lead + trimmed.len()))
}

/// Split `text` into trimmed sentences with offsets shifted by `offset`.
///
/// Blank input gives an empty list.
pub fn segment_sentences(text: &str, offset: usize) -> Vec<Sentence> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let abbreviations = abbreviations(detect_language(text));
    let mut spans = Vec::new();
    let mut pending: Option<usize> = None;

    for (start, segment) in text.split_sentence_bound_indices() {
        let end = start + segment.len();
        let span_start = pending.take().unwrap_or(start);

        if ends_with_abbreviation(&text[span_start..end], abbreviations) {
            pending = Some(span_start);
        } else {
            spans.push((span_start, end));
        }
    }
    if let Some(span_start) = pending {
        spans.push((span_start, text.len()));
    }

    spans
        .into_iter()
        .filter_map(|(start, end)| trimmed_span(text, start, end))
        .map(|(start, end)| Sentence {
            content: text[start..end].to_string(),
            start_char: offset + start,
            end_char: offset + end,
        })
        .collect()
}
