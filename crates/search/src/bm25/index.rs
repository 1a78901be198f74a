//! Okapi BM25 index over an in-memory corpus

use super::tokenizer::tokenize;
use std::collections::HashMap;

/// Term-frequency saturation
pub const K1: f64 = 1.5;
/// Length normalisation
pub const B: f64 = 0.75;

/// A scored corpus item
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit<Id> {
    pub id: Id,
    pub score: f64,
}

/// Inverted index built once per corpus
#[derive(Debug, Clone)]
pub struct Bm25Index<Id> {
    ids: Vec<Id>,
    term_frequencies: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    postings: HashMap<String, Vec<usize>>,
    idf: HashMap<String, f64>,
    avgdl: f64,
}

impl<Id: Clone> Bm25Index<Id> {
    /// Index `(id, text)` pairs
    pub fn new<I, S>(corpus: I) -> Self
    where
        I: IntoIterator<Item = (Id, S)>,
        S: AsRef<str>,
    {
        let mut ids = Vec::new();
        let mut term_frequencies = Vec::new();
        let mut doc_lengths = Vec::new();
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, (id, text)) in corpus.into_iter().enumerate() {
            let tokens = tokenize(text.as_ref());
            doc_lengths.push(tokens.len());

            let mut frequencies: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_default() += 1;
            }
            for term in frequencies.keys() {
                postings.entry(term.clone()).or_default().push(idx);
            }

            ids.push(id);
            term_frequencies.push(frequencies);
        }

        let n = ids.len() as f64;
        let avgdl = if ids.is_empty() {
            1.0
        } else {
            doc_lengths.iter().sum::<usize>() as f64 / n
        };

        let idf = postings
            .iter()
            .map(|(term, posting)| {
                let df = posting.len() as f64;
                (term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        Self {
            ids,
            term_frequencies,
            doc_lengths,
            postings,
            idf,
            avgdl,
        }
    }

    /// Number of indexed items
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Score every item matching at least one query term, best first.
    ///
    /// Ties keep corpus order. `top` truncates when given.
    pub fn score(&self, query: &str, top: Option<usize>) -> Vec<Bm25Hit<Id>> {
        let mut terms = tokenize(query);
        if terms.is_empty() || self.is_empty() {
            return Vec::new();
        }
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));

        let mut scores: Vec<Option<f64>> = vec![None; self.ids.len()];
        for term in &terms {
            let (Some(idf), Some(posting)) = (self.idf.get(term), self.postings.get(term)) else {
                continue;
            };
            for &idx in posting {
                let tf = self.term_frequencies[idx].get(term).copied().unwrap_or(0) as f64;
                let dl = self.doc_lengths[idx] as f64;
                let numerator = tf * (K1 + 1.0);
                let denominator = tf + K1 * (1.0 - B + B * dl / self.avgdl);
                *scores[idx].get_or_insert(0.0) += idf * numerator / denominator;
            }
        }

        let mut ranked: Vec<Bm25Hit<Id>> = scores
            .into_iter()
            .enumerate()
            .filter_map(|(idx, score)| {
                score.map(|score| Bm25Hit {
                    id: self.ids[idx].clone(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        if let Some(top) = top {
            ranked.truncate(top);
        }
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn corpus() -> Bm25Index<u32> {
        Bm25Index::new(vec![
            (1, "Ruby on Rails is a web framework"),
            (2, "Python is a general purpose programming language"),
            (3, "Rails makes building web applications fast"),
        ])
    }

    #[test]
    fn test_ranks_best_match_first() {
        let results = corpus().score("Rails web framework", None);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[1].id, 3);
        assert!(results.iter().all(|r| r.id != 2));
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_top_truncates() {
        let results = corpus().score("Rails web", Some(1));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_empty_cases() {
        assert!(corpus().score("", None).is_empty());
        assert!(corpus().score("the of and", None).is_empty());
        assert!(corpus().score("haskell", None).is_empty());

        let empty: Bm25Index<u32> = Bm25Index::new(Vec::<(u32, &str)>::new());
        assert!(empty.is_empty());
        assert!(empty.score("rails", None).is_empty());
    }

    #[test]
    fn test_repeated_query_terms_count_once() {
        let index = corpus();
        assert_eq!(index.score("rails", None), index.score("rails rails Rails", None));
    }

    #[test]
    fn test_idf_formula() {
        let index = corpus();
        // "rails" appears in 2 of 3 documents
        let expected = ((3.0 - 2.0 + 0.5) / (2.0 + 0.5) + 1.0f64).ln();
        assert!((index.idf["rails"] - expected).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_extra_occurrence_never_lowers_score(
            docs in proptest::collection::vec("[a-z]{2,6}( [a-z]{2,6}){0,12}", 1..6),
            which in 0usize..6,
            term in "[a-z]{2,6}",
        ) {
            let which = which % docs.len();
            let before = Bm25Index::new(docs.iter().cloned().enumerate());

            let mut boosted = docs.clone();
            boosted[which] = format!("{} {}", boosted[which], term);
            let after = Bm25Index::new(boosted.into_iter().enumerate());

            let score_of = |index: &Bm25Index<usize>| {
                index
                    .score(&term, None)
                    .into_iter()
                    .find(|h| h.id == which)
                    .map_or(0.0, |h| h.score)
            };
            prop_assert!(score_of(&after) + 1e-9 >= score_of(&before));
        }
    }
}
