//! Pure ranking helpers shared by the search stages.

pub const EXACT_SCORE: f32 = 1.0;
pub const PREFIX_SCORE: f32 = 0.9;

const WHOLE_BASE: f32 = 0.85;
const WHOLE_SPAN: f32 = 0.14;
const SUBSTRING_BASE: f32 = 0.75;
const SUBSTRING_SPAN: f32 = 0.09;

/// Lowercase whitespace-separated query words. Single-character words are
/// dropped; punctuation stays part of the word.
pub fn tokenize_query(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

/// Count `(whole_word, substring_only)` matches of `words` in `text_lower`.
/// A word counts once, as whole-word if any occurrence is bounded by
/// non-alphanumeric characters (or the ends of the text).
pub fn count_matches(text_lower: &str, words: &[String]) -> (usize, usize) {
    let mut whole = 0;
    let mut substring = 0;
    for w in words {
        if w.is_empty() { continue; }
        let mut found = false;
        let mut bounded = false;
        for (start, _) in text_lower.match_indices(w.as_str()) {
            found = true;
            let before = text_lower[..start].chars().next_back();
            let after = text_lower[start + w.len()..].chars().next();
            if !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric) {
                bounded = true;
                break;
            }
        }
        if bounded { whole += 1; } else if found { substring += 1; }
    }
    (whole, substring)
}

/// Keyword score for a candidate. Whole-word hits always outrank
/// substring-only hits: `[0.85, 0.99]` versus `[0.75, 0.84]`.
pub fn keyword_boost(whole: usize, substring: usize, total: usize) -> Option<f32> {
    if total == 0 { return None; }
    let total = total as f32;
    if whole > 0 {
        Some(WHOLE_BASE + WHOLE_SPAN * (whole as f32 / total).min(1.0))
    } else if substring > 0 {
        Some(SUBSTRING_BASE + SUBSTRING_SPAN * (substring as f32 / total).min(1.0))
    } else {
        None
    }
}

/// Similarity from cosine distance, clamped into the score range.
pub fn similarity(distance: f32) -> f32 {
    if distance.is_nan() { return 0.0; }
    (1.0 - distance).clamp(0.0, 1.0)
}
