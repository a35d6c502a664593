//! Printer-identity matching.
//!
//! Two uploads are "the same printer" when their normalized names are close
//! enough under edit distance. Normalization collapses the cosmetic
//! variation slicers introduce (case, spacing, punctuation, compatibility
//! forms); the similarity score is `1 - distance / max_len` over the
//! normalized forms, so `1.0` is identical and `0.0` shares nothing.
//!
//! Normalized names are never persisted. They are recomputed from the raw
//! name on every comparison, which lets the rules here evolve without a
//! backfill of stored profiles.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_categories::UnicodeCategories;
use unicode_normalization::UnicodeNormalization;

use crate::storage::PrintProfile;

/// Configuration for printer-identity matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatcherConfig {
    /// Minimum similarity between normalized names for two profiles to be
    /// treated as the same printer.
    #[serde(default = "MatcherConfig::default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl MatcherConfig {
    pub(crate) fn default_similarity_threshold() -> f64 {
        0.8
    }

    /// Validate the matcher configuration.
    pub fn validate(&self) -> Result<(), MatcherError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MatcherError::InvalidConfig(
                "similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: Self::default_similarity_threshold(),
        }
    }
}

/// Errors produced by the matching layer.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// Invalid matcher configuration.
    #[error("invalid matcher config: {0}")]
    InvalidConfig(String),
}

/// Collapse a printer name to its comparable core: NFKC normalization,
/// lowercase, then drop all whitespace and punctuation.
pub fn normalize_printer_name(name: &str) -> String {
    name.nfkc()
        .flat_map(char::to_lowercase)
        .filter(|ch| !ch.is_whitespace() && !ch.is_punctuation())
        .collect()
}

/// Levenshtein distance over characters, two-row dynamic programming.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];
    for (i, ch_a) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, ch_b) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ch_a != ch_b);
            let deletion = prev[j + 1] + 1;
            let insertion = curr[j] + 1;
            curr[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in `[0.0, 1.0]` between two strings. Two empty strings are
/// identical by definition.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// An existing profile whose printer identity collides with a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch<'a> {
    pub profile: &'a PrintProfile,
    pub score: f64,
}

/// Scan `existing` for the best profile whose normalized printer name scores
/// at least `threshold` against the candidate's.
///
/// The best score wins; the first of equal scores wins, so the result is
/// deterministic for a fixed input order.
pub fn find_conflict<'a>(
    candidate_printer_name: &str,
    existing: &'a [PrintProfile],
    threshold: f64,
) -> Option<NameMatch<'a>> {
    let candidate = normalize_printer_name(candidate_printer_name);

    let mut best: Option<NameMatch<'a>> = None;
    for profile in existing {
        let score = similarity(&candidate, &normalize_printer_name(&profile.printer_name));
        if score < threshold {
            continue;
        }
        let better = best.as_ref().map(|found| score > found.score);
        if better.unwrap_or(true) {
            best = Some(NameMatch { profile, score });
        }
    }
    best
}
