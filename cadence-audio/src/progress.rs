//! Word-level progress estimation for engines that only report start and end.

use std::time::Duration;

/// Char ranges `(start, end)` of the whitespace-separated words in `text`.
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start = None;
    for (i, c) in text.chars().enumerate() {
        match (c.is_whitespace(), word_start) {
            (false, None) => word_start = Some(i),
            (true, Some(start)) => {
                spans.push((start, i));
                word_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = word_start {
        spans.push((start, text.chars().count()));
    }
    spans
}

/// When each word should be reported, assuming speech advances evenly over
/// the text's chars for `total`.
pub fn schedule(text: &str, total: Duration) -> Vec<(Duration, usize, usize)> {
    let chars = text.chars().count().max(1) as f64;
    word_spans(text)
        .into_iter()
        .map(|(start, end)| (total.mul_f64(start as f64 / chars), start, end))
        .collect()
}
