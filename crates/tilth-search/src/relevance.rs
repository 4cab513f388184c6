//! Keyword relevance scoring for transcript chunks.

use tilth_core::defaults;

/// Score a candidate text against a query, normalized to [0, 1].
///
/// Whitespace tokenization on both sides; query tokens shorter than three
/// characters are discarded. Each query token scores one point on its first
/// containment match against any text token (either direction, no double
/// counting). Matching more than one query token adds a bonus of
/// `matched × 0.5`. The sum is normalized by `max(text_tokens / 50, 1)` so
/// long chunks do not win on bulk alone, then clipped to [0, 1].
pub fn relevance_score(text: &str, query: &str) -> f32 {
    let text_tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    let query_tokens: Vec<String> = query
        .split_whitespace()
        .filter(|t| t.len() >= defaults::MIN_QUERY_TOKEN_LEN)
        .map(|t| t.to_lowercase())
        .collect();

    if text_tokens.is_empty() || query_tokens.is_empty() {
        return 0.0;
    }

    let mut matched = 0usize;
    for q in &query_tokens {
        if text_tokens.iter().any(|t| t.contains(q.as_str()) || q.contains(t.as_str())) {
            matched += 1;
        }
    }

    let mut score = matched as f32;
    if matched > 1 {
        score += matched as f32 * defaults::MULTI_MATCH_BONUS;
    }

    let norm = (text_tokens.len() as f32 / defaults::NORM_TOKEN_BASE as f32).max(1.0);
    (score / norm).clamp(0.0, 1.0)
}
