//! Lexical similarity on a 0..=100 scale, tolerant of typos and casing.
//!
//! The score is the better of a plain normalized Levenshtein ratio and the same
//! ratio over alphabetically sorted tokens, so reordered words are not
//! punished. Punctuation and repeated whitespace are ignored for scoring, but
//! only a case-insensitive exact match of the original strings, whitespace
//! included, reaches 100.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub text: String,
    pub index: usize,
    pub score: u8,
}

pub fn similarity(a: &str, b: &str) -> u8 {
    if a.to_lowercase() == b.to_lowercase() {
        return 100;
    }

    let na = normalize(a);
    let nb = normalize(b);
    let ratio = strsim::normalized_levenshtein(&na, &nb);
    let sorted = strsim::normalized_levenshtein(&sort_tokens(&na), &sort_tokens(&nb));

    let score = (ratio.max(sorted) * 100.0).floor() as u8;
    score.min(99)
}

/// Best-scoring candidate; the earliest one wins a tie. `None` only when there
/// are no candidates.
pub fn best_match<S: AsRef<str>>(utterance: &str, candidates: &[S]) -> Option<FuzzyMatch> {
    let mut best: Option<FuzzyMatch> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let score = similarity(utterance, candidate.as_ref());
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(FuzzyMatch {
                text: candidate.as_ref().to_string(),
                index,
                score,
            });
        }
    }

    best
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn sort_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split(' ').collect();
    tokens.sort_unstable();
    tokens.join(" ")
}
