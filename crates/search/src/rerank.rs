//! Listwise LLM reranking
//!
//! One prompt scores every candidate 0-10. Candidates under the threshold
//! are dropped and the rest sorted by score, ties keeping input order. Any
//! failure gives every candidate the top score, so reranking never costs
//! recall.

use crate::retrieval::SearchHit;
use ragforge_common::generation::Generator;
use ragforge_common::metrics;
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{instrument, warn};

pub const MAX_SCORE: u8 = 10;
pub const DEFAULT_THRESHOLD: u8 = 5;

fn score_array() -> Option<&'static Regex> {
    static SCORES: OnceLock<Option<Regex>> = OnceLock::new();
    SCORES
        .get_or_init(|| Regex::new(r"\[\s*\d[\d\s,]*\]").ok())
        .as_ref()
}

/// Reranks candidates with the generation service
pub struct Reranker {
    generator: Arc<dyn Generator>,
    threshold: u8,
}

impl Reranker {
    /// `threshold` is clamped to `[0, 10]`
    pub fn new(generator: Arc<dyn Generator>, threshold: u8) -> Self {
        Self {
            generator,
            threshold: threshold.min(MAX_SCORE),
        }
    }

    pub fn with_threshold(&self, threshold: u8) -> Self {
        Self::new(self.generator.clone(), threshold)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Score, filter, and reorder `candidates`; sets `rerank_score` on each
    #[instrument(skip(self, candidates), fields(candidates = candidates.len(), threshold = self.threshold))]
    pub async fn rerank(&self, query: &str, candidates: Vec<SearchHit>) -> Vec<SearchHit> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let scores = match self.generator.generate(&build_prompt(query, &candidates)).await {
            Ok(response) => parse_scores(&response, candidates.len()),
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Reranking failed, keeping all candidates");
                None
            }
        };
        metrics::record_rerank(scores.is_none());
        let scores = scores.unwrap_or_else(|| vec![MAX_SCORE; candidates.len()]);

        let mut reranked: Vec<SearchHit> = candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score >= self.threshold)
            .map(|(mut hit, score)| {
                hit.rerank_score = Some(score);
                hit
            })
            .collect();
        reranked.sort_by(|a, b| b.rerank_score.cmp(&a.rerank_score));
        reranked
    }
}

fn build_prompt(query: &str, candidates: &[SearchHit]) -> String {
    let passages = candidates
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}", i, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a relevance-scoring assistant.\n\
\n\
Given the user query and the numbered passages below, score each passage\n\
for how directly and completely it answers the query.\n\
\n\
Scoring scale:\n\
\x20 0-3  : Off-topic or not helpful\n\
\x20 4-6  : Partially relevant but incomplete\n\
\x20 7-10 : Highly relevant and directly useful\n\
\n\
User query: {query}\n\
\n\
Passages:\n\
{passages}\n\
\n\
Rules:\n\
- Return ONLY a JSON array of integers, one score per passage, in the\n\
\x20 same order as the passages above.\n\
- Do NOT include any explanation, markdown, or extra text.\n\
- Example for 3 passages: [8, 2, 6]\n"
    )
}

/// Scores from the first integer array in `response`, clamped to `[0, 10]`.
///
/// `None` when no array parses or its length differs from `expected`.
fn parse_scores(response: &str, expected: usize) -> Option<Vec<u8>> {
    let Some(found) = score_array().and_then(|re| re.find(response)) else {
        warn!("Rerank response has no score array");
        return None;
    };

    let scores: Vec<f64> = match serde_json::from_str(found.as_str()) {
        Ok(scores) => scores,
        Err(e) => {
            warn!(error = %e, "Rerank score array is not valid JSON");
            return None;
        }
    };

    if scores.len() != expected {
        warn!(expected, got = scores.len(), "Rerank score count mismatch");
        return None;
    }

    Some(
        scores
            .into_iter()
            .map(|s| s.clamp(0.0, f64::from(MAX_SCORE)) as u8)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_common::generation::MockGenerator;
    use uuid::Uuid;

    fn hits(contents: &[&str]) -> Vec<SearchHit> {
        contents
            .iter()
            .map(|content| SearchHit {
                content: content.to_string(),
                score: 0.5,
                document_id: Uuid::nil(),
                chunk_id: None,
                start_char: None,
                end_char: None,
                rerank_score: None,
            })
            .collect()
    }

    fn contents(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_filters_and_sorts() {
        let generator = Arc::new(MockGenerator::with_response("Scores: [3, 9, 7]"));
        let reranker = Reranker::new(generator.clone(), DEFAULT_THRESHOLD);

        let reranked = reranker.rerank("rails", hits(&["a", "b", "c"])).await;
        assert_eq!(contents(&reranked), vec!["b", "c"]);
        assert_eq!(reranked[0].rerank_score, Some(9));

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("User query: rails"));
        assert!(prompt.contains("[0] a\n\n[1] b\n\n[2] c"));
    }

    #[tokio::test]
    async fn test_ties_keep_input_order() {
        let generator = Arc::new(MockGenerator::with_response("[8, 9, 8]"));
        let reranked = Reranker::new(generator, 0)
            .rerank("q", hits(&["a", "b", "c"]))
            .await;
        assert_eq!(contents(&reranked), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_everything() {
        let generator = Arc::new(MockGenerator::unavailable());
        let reranked = Reranker::new(generator, DEFAULT_THRESHOLD)
            .rerank("q", hits(&["a", "b", "c"]))
            .await;
        assert_eq!(contents(&reranked), vec!["a", "b", "c"]);
        assert!(reranked.iter().all(|h| h.rerank_score == Some(MAX_SCORE)));
    }

    #[tokio::test]
    async fn test_malformed_responses_fall_back() {
        for response in ["no scores here", "[1, 2]", "[1,,2,3]"] {
            let generator = Arc::new(MockGenerator::with_response(response));
            let reranked = Reranker::new(generator, DEFAULT_THRESHOLD)
                .rerank("q", hits(&["a", "b", "c"]))
                .await;
            assert_eq!(reranked.len(), 3, "response {response:?}");
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_generation() {
        let generator = Arc::new(MockGenerator::new());
        let reranked = Reranker::new(generator.clone(), 5).rerank("q", Vec::new()).await;
        assert!(reranked.is_empty());
        assert!(generator.prompts().is_empty());
    }

    #[test]
    fn test_parse_clamps_and_threshold_clamps() {
        assert_eq!(parse_scores("[12, 0, 5]", 3), Some(vec![10, 0, 5]));
        assert_eq!(parse_scores("```json\n[ 4,5 ]\n```", 2), Some(vec![4, 5]));
        let reranker = Reranker::new(Arc::new(MockGenerator::new()), 42);
        assert_eq!(reranker.threshold(), 10);
    }
}
