//! Content-fingerprint deduplication of ranked results

use ragforge_common::text::fingerprint;
use std::collections::HashSet;

/// Keep the first item for each normalized content, preserving order.
///
/// Sort before calling so the best-scored copy of a duplicate survives.
pub fn deduplicate<T, F>(items: Vec<T>, content: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(fingerprint(content(item))))
        .collect()
}
