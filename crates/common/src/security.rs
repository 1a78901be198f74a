//! Prompt-injection guard for untrusted text
//!
//! A fixed set of named detectors runs over queries and document content
//! before either reaches a prompt. Pure function of the input text.

use crate::errors::{AppError, Result};
use regex_lite::Regex;
use std::sync::OnceLock;

const PATTERNS: &[(&str, &str)] = &[
    (
        "instruction_override",
        r"(?i)ignore\s+(all\s+)?(previous|prior|above|earlier|preceding)\s+(instructions?|prompts?|context|rules?|guidelines?)",
    ),
    (
        "role_hijacking",
        r"(?i)you\s+are\s+(now|no\s+longer)\s+(a|an|the)?\s*\w+",
    ),
    (
        "system_prompt_leak",
        r"(?i)(repeat|show|reveal|display|print|output)\s+(the\s+)?(exact|full|original|entire|complete)?\s*(system\s+)?(prompt|instructions?|rules?|guidelines?)",
    ),
    (
        "new_instruction",
        r"(?i)\b(new|updated?|revised?|override)\s+(system\s+)?(instruction|prompt|directive|command|role)",
    ),
    (
        "context_escape",
        r"(?i)(end\s+of\s+(context|instructions?|prompt|document)|</?(system|instruction|prompt|context)>|\[\s*/?\s*(SYSTEM|INST|SYS|INSTRUCTION)\s*\])",
    ),
    (
        "roleplay",
        r"(?i)\b(act\s+as|pretend\s+(to\s+be|you\s+are)|simulate|roleplay|role-play)\b",
    ),
    (
        "format_hijack",
        r"(?i)return\s+(this|the\s+following)\s+(json|xml|html|text)\s*(instead|:)",
    ),
];

fn detectors() -> &'static [(&'static str, Regex)] {
    static DETECTORS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    DETECTORS.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
            .collect()
    })
}

/// Verdict of the detectors over one piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptGuard {
    detections: Vec<&'static str>,
}

impl PromptGuard {
    /// Run every detector over `text`
    pub fn new(text: &str) -> Self {
        let detections = detectors()
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| *name)
            .collect();
        Self { detections }
    }

    /// True iff no detector fired
    pub fn safe(&self) -> bool {
        self.detections.is_empty()
    }

    /// Names of the detectors that fired, in detector order
    pub fn detections(&self) -> &[&'static str] {
        &self.detections
    }

    pub fn rejection_message(&self) -> Option<String> {
        if self.safe() {
            return None;
        }
        Some(format!(
            "Input rejected: detected prompt injection ({})",
            self.detections.join(", ")
        ))
    }

    /// `Ok(())` for safe text, otherwise a `PromptInjection` error
    pub fn check(text: &str) -> Result<()> {
        let guard = Self::new(text);
        match guard.rejection_message() {
            None => Ok(()),
            Some(message) => {
                let detections: Vec<String> =
                    guard.detections.iter().map(|d| d.to_string()).collect();
                crate::metrics::record_prompt_injection(&detections);
                Err(AppError::PromptInjection {
                    message,
                    detections,
                })
            }
        }
    }
}
