//! RAG evaluation harness
//!
//! Runs every question of a dataset through the answer engine and scores
//! the answers against reference answers and keywords.

pub mod metrics;

use crate::rag::{AnswerRequest, RagEngine};
use crate::retrieval::{SearchHit, SearchType};
use metrics::round_to;
use ragforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Minimum overall score counted as a pass
pub const PASS_THRESHOLD: f64 = 30.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub lectures: Vec<Lecture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lecture {
    pub id: String,
    #[serde(default)]
    pub source: Option<String>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Question {
    pub question: String,
    pub expected_answer: String,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl Dataset {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Internal {
                message: format!("failed to read dataset {}: {}", path.display(), e),
            })?;
        Self::from_json(&json)
    }

    pub fn question_count(&self) -> usize {
        self.lectures.iter().map(|l| l.questions.len()).sum()
    }
}

/// Scores for one question
#[derive(Debug, Clone, Serialize)]
pub struct EvalResult {
    pub lecture_id: String,
    pub question: String,
    pub expected_answer: String,
    pub rag_answer: String,
    pub sources: Vec<SearchHit>,
    pub keyword_recall: f64,
    pub token_f1: f64,
    pub factual_overlap: f64,
    pub retrieval_precision: f64,
    pub retrieval_hit: bool,
    pub overall_score: f64,
    pub passed: bool,
}

/// Aggregate scores; averages are rounded to three decimals
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_questions: usize,
    pub passed: usize,
    pub failed: usize,
    pub avg_keyword_recall: f64,
    pub avg_token_f1: f64,
    pub avg_factual_overlap: f64,
    pub avg_retrieval_precision: f64,
    pub retrieval_hit_rate: f64,
    pub avg_overall_score: f64,
    pub results: Vec<EvalResult>,
}

/// Evaluates an answer engine against a dataset
pub struct Evaluator<'a> {
    engine: &'a RagEngine,
    search_type: SearchType,
    rerank: bool,
    pass_threshold: f64,
}

impl<'a> Evaluator<'a> {
    pub fn new(engine: &'a RagEngine) -> Self {
        Self {
            engine,
            search_type: SearchType::Cosine,
            rerank: false,
            pass_threshold: PASS_THRESHOLD,
        }
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    #[instrument(skip_all, fields(questions = dataset.question_count()))]
    pub async fn evaluate(&self, dataset: &Dataset) -> Result<Summary> {
        let mut results = Vec::with_capacity(dataset.question_count());
        for lecture in &dataset.lectures {
            for question in &lecture.questions {
                results.push(self.evaluate_question(&lecture.id, question).await?);
            }
        }
        let summary = Summary::from_results(results);
        info!(
            passed = summary.passed,
            failed = summary.failed,
            avg_overall = summary.avg_overall_score,
            "Evaluation complete"
        );
        Ok(summary)
    }

    pub async fn evaluate_question(&self, lecture_id: &str, question: &Question) -> Result<EvalResult> {
        let mut request = AnswerRequest::new(question.question.as_str()).search_type(self.search_type);
        if self.rerank {
            request = request.rerank(None);
        }
        let answer = self.engine.answer(&request).await?;
        let sources = answer.sources.hits().to_vec();
        let keywords = &question.expected_keywords;

        let overall = metrics::overall_score(&answer.answer, &question.expected_answer, keywords, &sources);
        let result = EvalResult {
            lecture_id: lecture_id.to_string(),
            question: question.question.clone(),
            expected_answer: question.expected_answer.clone(),
            keyword_recall: metrics::keyword_recall(&answer.answer, keywords),
            token_f1: metrics::token_f1(&answer.answer, &question.expected_answer),
            factual_overlap: metrics::factual_overlap(&answer.answer, &question.expected_answer),
            retrieval_precision: metrics::retrieval_precision(&sources, keywords),
            retrieval_hit: metrics::retrieval_hit(&sources, keywords),
            overall_score: overall,
            passed: overall >= self.pass_threshold,
            rag_answer: answer.answer,
            sources,
        };
        if !result.passed {
            warn!(lecture_id, question = %question.question, score = overall, "Question failed");
        }
        Ok(result)
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return 0.0;
    }
    round_to(sum / count as f64, 3)
}

impl Summary {
    pub fn from_results(results: Vec<EvalResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let hits = results.iter().filter(|r| r.retrieval_hit).count();

        Self {
            total_questions: total,
            passed,
            failed: total - passed,
            avg_keyword_recall: average(results.iter().map(|r| r.keyword_recall)),
            avg_token_f1: average(results.iter().map(|r| r.token_f1)),
            avg_factual_overlap: average(results.iter().map(|r| r.factual_overlap)),
            avg_retrieval_precision: average(results.iter().map(|r| r.retrieval_precision)),
            retrieval_hit_rate: if total == 0 {
                0.0
            } else {
                round_to(hits as f64 / total as f64, 3)
            },
            avg_overall_score: average(results.iter().map(|r| r.overall_score)),
            results,
        }
    }

    /// Percentage of passed questions, one decimal
    pub fn pass_rate(&self) -> f64 {
        if self.total_questions == 0 {
            return 0.0;
        }
        round_to(self.passed as f64 / self.total_questions as f64 * 100.0, 1)
    }
}

fn pct(value: f64) -> String {
    format!("{}%", round_to(value * 100.0, 1))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heavy = "=".repeat(80);
        let light = "-".repeat(80);

        writeln!(f, "{heavy}")?;
        writeln!(f, "RAG EVALUATION REPORT")?;
        writeln!(f, "{heavy}")?;
        writeln!(f)?;
        writeln!(f, "Overall Results:")?;
        writeln!(f, "  Total questions:        {}", self.total_questions)?;
        writeln!(f, "  Passed:                 {}", self.passed)?;
        writeln!(f, "  Failed:                 {}", self.failed)?;
        writeln!(f, "  Pass rate:              {}%", self.pass_rate())?;
        writeln!(f)?;
        writeln!(f, "Average Metrics:")?;
        writeln!(f, "  Keyword recall:         {}", pct(self.avg_keyword_recall))?;
        writeln!(f, "  Token F1:               {}", pct(self.avg_token_f1))?;
        writeln!(f, "  Factual overlap:        {}", pct(self.avg_factual_overlap))?;
        writeln!(f, "  Retrieval precision:    {}", pct(self.avg_retrieval_precision))?;
        writeln!(f, "  Retrieval hit rate:     {}", pct(self.retrieval_hit_rate))?;
        writeln!(f, "  Overall score:          {}/100", self.avg_overall_score)?;
        writeln!(f)?;
        writeln!(f, "{light}")?;
        writeln!(f, "Detailed Results:")?;
        writeln!(f, "{light}")?;

        for (idx, result) in self.results.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "{}. [{}] {}", idx + 1, result.lecture_id, result.question)?;
            writeln!(f, "   Expected: {}", truncate(&result.expected_answer, 100))?;
            writeln!(f, "   RAG answer: {}", truncate(&result.rag_answer, 100))?;
            writeln!(
                f,
                "   Keyword recall: {} | F1: {} | Overlap: {}",
                pct(result.keyword_recall),
                pct(result.token_f1),
                pct(result.factual_overlap)
            )?;
            writeln!(
                f,
                "   Retrieval precision: {} | Hit: {}",
                pct(result.retrieval_precision),
                if result.retrieval_hit { "YES" } else { "NO" }
            )?;
            writeln!(
                f,
                "   Overall: {}/100 {}",
                result.overall_score,
                if result.passed { "PASS" } else { "FAIL" }
            )?;
            writeln!(f, "   Sources: {} chunks", result.sources.len())?;
        }

        writeln!(f)?;
        write!(f, "{heavy}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"{
        "lectures": [
            {
                "id": "rails-101",
                "source": "lecture notes",
                "questions": [
                    {
                        "question": "What pattern does Rails use?",
                        "expected_answer": "Rails uses the MVC pattern.",
                        "expected_keywords": ["MVC"],
                        "topic": "architecture"
                    },
                    {
                        "question": "Who created Rails?",
                        "expected_answer": "David Heinemeier Hansson."
                    }
                ]
            }
        ]
    }"#;

    fn result(score: f64, hit: bool) -> EvalResult {
        EvalResult {
            lecture_id: "rails-101".into(),
            question: "q".into(),
            expected_answer: "e".into(),
            rag_answer: "a".into(),
            sources: Vec::new(),
            keyword_recall: 1.0,
            token_f1: 0.5,
            factual_overlap: 0.25,
            retrieval_precision: 0.0,
            retrieval_hit: hit,
            overall_score: score,
            passed: score >= PASS_THRESHOLD,
        }
    }

    #[test]
    fn test_dataset_parses_with_defaults() {
        let dataset = Dataset::from_json(DATASET).unwrap();
        assert_eq!(dataset.lectures.len(), 1);
        assert_eq!(dataset.question_count(), 2);
        let second = &dataset.lectures[0].questions[1];
        assert!(second.expected_keywords.is_empty());
        assert!(second.topic.is_none());
    }

    #[test]
    fn test_dataset_rejects_malformed_json() {
        assert!(Dataset::from_json("{\"lectures\": 3}").is_err());
    }

    #[test]
    fn test_summary_aggregates() {
        let summary = Summary::from_results(vec![result(80.0, true), result(10.0, false), result(45.5, true)]);
        assert_eq!(summary.total_questions, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retrieval_hit_rate, 0.667);
        assert_eq!(summary.avg_overall_score, 45.167);
        assert_eq!(summary.pass_rate(), 66.7);
    }

    #[test]
    fn test_empty_summary() {
        let summary = Summary::from_results(Vec::new());
        assert_eq!(summary.avg_token_f1, 0.0);
        assert_eq!(summary.retrieval_hit_rate, 0.0);
        assert_eq!(summary.pass_rate(), 0.0);
    }

    #[test]
    fn test_report_layout() {
        let report = Summary::from_results(vec![result(80.0, true)]).to_string();
        assert!(report.starts_with(&"=".repeat(80)));
        assert!(report.contains("RAG EVALUATION REPORT"));
        assert!(report.contains("  Pass rate:              100%"));
        assert!(report.contains("  Token F1:               50%"));
        assert!(report.contains("1. [rails-101] q"));
        assert!(report.contains("   Overall: 80/100 PASS"));
        assert!(report.contains("   Retrieval precision: 0% | Hit: YES"));
        assert!(report.ends_with(&"=".repeat(80)));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("short", 100), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
    }
}
