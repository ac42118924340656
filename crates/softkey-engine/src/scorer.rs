//! Value-overlap scoring
//!
//! The ratio is relative to the source column: the share of the source's
//! distinct values that also appear in the candidate. `score(a, b)` and
//! `score(b, a)` generally differ.

use softkey_core::ValueSet;

/// Added to the denominator so an empty source scores 0 instead of NaN
pub const EPSILON: f64 = 1e-9;

/// `|source ∩ candidate| / (|source| + EPSILON)`
pub fn score(source: &ValueSet, candidate: &ValueSet) -> f64 {
    let common = source.intersection_len(candidate);
    common as f64 / (source.len() as f64 + EPSILON)
}

/// Pass/fail against the configured threshold
pub fn is_match(ratio: f64, threshold: f64) -> bool {
    ratio >= threshold
}
