//! Bounded arithmetic shared by every stage
//!
//! All decaying, normalizing and ratio helpers live here so that each stage
//! applies the same clamping and zero-denominator fallbacks.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Denominators smaller than this are treated as zero
pub const DIVISION_EPSILON: f32 = 1e-6;

/// Words that mark content as emotionally charged or important
const SALIENT_WORDS: [&str; 24] = [
    "love",
    "hate",
    "amazing",
    "terrible",
    "wonderful",
    "awful",
    "excellent",
    "horrible",
    "fantastic",
    "perfect",
    "worst",
    "brilliant",
    "urgent",
    "critical",
    "important",
    "deadline",
    "decision",
    "decided",
    "remember",
    "never",
    "always",
    "failed",
    "broke",
    "breakthrough",
];

/// Tags that flag a record as important regardless of its content
const SALIENT_TAGS: [&str; 6] = ["important", "urgent", "critical", "pinned", "decision", "milestone"];

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `numerator / denominator`, or `fallback` when the denominator is ~0 or
/// the result is not finite.
pub fn safe_ratio(numerator: f32, denominator: f32, fallback: f32) -> f32 {
    if denominator.abs() < DIVISION_EPSILON {
        return fallback;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() { ratio } else { fallback }
}

/// Arithmetic mean, `None` for an empty input
pub fn mean<I>(values: I) -> Option<f32>
where
    I: IntoIterator<Item = f32>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0_f32, 0_u32), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f32)
    }
}

/// Non-negative minutes from `from` to `to`
pub fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> f32 {
    ((to - from).num_seconds().max(0) as f32) / 60.0
}

/// Non-negative days from `from` to `to`
pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f32 {
    elapsed_minutes(from, to) / (60.0 * 24.0)
}

/// Exponential decay `exp(-elapsed / tau)` in [0, 1].
///
/// A non-positive `tau` means instant decay: 1.0 at zero elapsed, else 0.0.
pub fn recency_decay(elapsed: f32, tau: f32) -> f32 {
    let elapsed = elapsed.max(0.0);
    if tau <= 0.0 {
        return if elapsed == 0.0 { 1.0 } else { 0.0 };
    }
    clamp_unit((-elapsed / tau).exp())
}

/// Logarithmic frequency `ln(1 + count) / ln(1 + saturation)`, capped at 1.
///
/// Grows with diminishing returns so heavily accessed records cannot
/// dominate a blend.
pub fn log_frequency(count: u32, saturation: u32) -> f32 {
    if saturation == 0 {
        return if count > 0 { 1.0 } else { 0.0 };
    }
    let denominator = (saturation as f32 + 1.0).ln();
    clamp_unit(safe_ratio((count as f32 + 1.0).ln(), denominator, 0.0))
}

/// Jaccard overlap of two tag sets; two empty sets overlap by 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Estimate emotional/importance salience of a record in [0, 1].
///
/// Each salient word in the content adds 0.15, a salient tag adds 0.4.
pub fn estimate_salience(content: &str, tags: &BTreeSet<String>) -> f32 {
    let content_lower = content.to_lowercase();
    let word_hits = SALIENT_WORDS
        .iter()
        .filter(|word| content_lower.contains(*word))
        .count() as f32;
    let tag_hits = tags
        .iter()
        .filter(|tag| SALIENT_TAGS.contains(&tag.as_str()))
        .count() as f32;

    clamp_unit(word_hits * 0.15 + tag_hits * 0.4)
}
