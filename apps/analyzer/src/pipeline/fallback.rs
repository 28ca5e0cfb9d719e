//! Deterministic label matcher used when the remote mapping call is skipped,
//! too slow, or unusable.
//!
//! Algorithm:
//! 1. Normalize: case-fold, punctuation → space (keeping `+` and `#`),
//!    expand abbreviations through the synonym table.
//! 2. Tokenize into a word set.
//! 3. For each target label, Jaccard similarity against every source label;
//!    keep the best (first wins on ties).
//! 4. Accept at ≥ 0.34, else report the target as unmatched.
//! 5. confidence = min(0.85, 0.5 + score)

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

pub const MATCH_THRESHOLD: f64 = 0.34;
pub const MAX_FALLBACK_CONFIDENCE: f64 = 0.85;
const BASE_CONFIDENCE: f64 = 0.5;

/// Abbreviation → canonical long form, applied per token.
const SYNONYMS: &[(&str, &str)] = &[
    ("aws", "amazon web services"),
    ("gcp", "google cloud platform"),
    ("k8s", "kubernetes"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("ml", "machine learning"),
    ("ai", "artificial intelligence"),
    ("nlp", "natural language processing"),
    ("db", "database"),
    ("postgres", "postgresql"),
    ("py", "python"),
    ("golang", "go"),
    ("ci", "continuous integration"),
    ("cd", "continuous delivery"),
    ("oop", "object oriented programming"),
    ("ux", "user experience"),
    ("ui", "user interface"),
];

/// A target label matched to its best source label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMatch {
    pub source: String,
    pub target: String,
    pub score: f64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matches: Vec<LabelMatch>,
    pub unmatched: Vec<String>,
}

impl MatchOutcome {
    /// Mean match confidence, or `None` when nothing matched.
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.matches.is_empty() {
            return None;
        }
        let total: f64 = self.matches.iter().map(|m| m.confidence).sum();
        Some(total / self.matches.len() as f64)
    }
}

pub struct FallbackMatcher {
    synonyms: HashMap<&'static str, &'static str>,
    threshold: f64,
}

impl Default for FallbackMatcher {
    fn default() -> Self {
        Self {
            synonyms: SYNONYMS.iter().copied().collect(),
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl FallbackMatcher {
    /// Case-folded, punctuation-free, synonym-expanded form of a label.
    pub fn normalize_label(&self, label: &str) -> String {
        let folded: String = label
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '+' || c == '#' {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        folded
            .split_whitespace()
            .map(|token| self.synonyms.get(token).copied().unwrap_or(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn tokenize(&self, label: &str) -> BTreeSet<String> {
        self.normalize_label(label)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Matches every target label against the source labels.
    pub fn match_labels(&self, sources: &[String], targets: &[String]) -> MatchOutcome {
        let source_tokens: Vec<(&String, BTreeSet<String>)> = sources
            .iter()
            .map(|s| (s, self.tokenize(s)))
            .filter(|(_, tokens)| !tokens.is_empty())
            .collect();

        let mut outcome = MatchOutcome::default();

        for target in targets {
            let target_tokens = self.tokenize(target);
            if target_tokens.is_empty() {
                continue;
            }

            let mut best: Option<(&String, f64)> = None;
            for (source, tokens) in &source_tokens {
                let score = jaccard(&target_tokens, tokens);
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((*source, score));
                }
            }

            match best {
                Some((source, score)) if score >= self.threshold => {
                    outcome.matches.push(LabelMatch {
                        source: source.clone(),
                        target: target.clone(),
                        score,
                        confidence: match_confidence(score),
                        reasoning: format!(
                            "Deterministic fallback match (no remote call): token overlap {score:.2} between '{source}' and '{target}'."
                        ),
                    });
                }
                _ => outcome.unmatched.push(target.clone()),
            }
        }

        outcome
    }
}

pub fn match_confidence(score: f64) -> f64 {
    (BASE_CONFIDENCE + score).min(MAX_FALLBACK_CONFIDENCE)
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
