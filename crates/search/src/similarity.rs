//! Vector similarity strategies
//!
//! Degenerate input (empty, mismatched lengths, zero norm) scores 0.0 rather
//! than failing.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Named similarity strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    #[default]
    Cosine,
    Euclidean,
}

impl Similarity {
    /// Look a strategy up by name; unknown or missing names give cosine
    pub fn resolve(name: Option<&str>) -> Self {
        match name {
            Some("euclidean") => Similarity::Euclidean,
            _ => Similarity::Cosine,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
            Similarity::Euclidean => "euclidean",
        }
    }

    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Similarity::Cosine => cosine(a, b),
            Similarity::Euclidean => euclidean(a, b),
        }
    }
}

fn comparable(a: &[f32], b: &[f32]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.len() != b.len() {
        warn!(left = a.len(), right = b.len(), "Vector dimension mismatch");
        return false;
    }
    true
}

/// Cosine similarity clamped to `[-1, 1]`
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if !comparable(a, b) {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_nan() {
        return 0.0;
    }
    similarity.clamp(-1.0, 1.0) as f32
}

/// `1 / (1 + L2 distance)`, in `(0, 1]`
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    if !comparable(a, b) {
        return 0.0;
    }

    let distance = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).powi(2))
        .sum::<f64>()
        .sqrt();
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 / (1.0 + distance)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_degenerate_input() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_euclidean() {
        assert_eq!(euclidean(&[1.0, 2.0], &[1.0, 2.0]), 1.0);
        assert!((euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 1.0 / 6.0).abs() < 1e-6);
        assert_eq!(euclidean(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(euclidean(&[], &[]), 0.0);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(Similarity::resolve(Some("euclidean")), Similarity::Euclidean);
        assert_eq!(Similarity::resolve(Some("cosine")), Similarity::Cosine);
        assert_eq!(Similarity::resolve(Some("Euclidean")), Similarity::Cosine);
        assert_eq!(Similarity::resolve(Some("manhattan")), Similarity::Cosine);
        assert_eq!(Similarity::resolve(None), Similarity::Cosine);
    }

    proptest! {
        #[test]
        fn prop_similarity_bounds(
            (a, b) in (1usize..16).prop_flat_map(|n| (
                proptest::collection::vec(-1000.0f32..1000.0, n),
                proptest::collection::vec(-1000.0f32..1000.0, n),
            ))
        ) {
            let c = cosine(&a, &b);
            prop_assert!((-1.0..=1.0).contains(&c));

            let e = euclidean(&a, &b);
            prop_assert!(e > 0.0 && e <= 1.0);
            prop_assert_eq!(e, euclidean(&b, &a));
        }
    }
}
