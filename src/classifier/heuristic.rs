//! Deterministic lexical classifiers.
//!
//! These are stand-ins for real models: cheap, predictable and good enough to
//! exercise the output gate end to end. Scores are always within `[0, 1]`.

use std::collections::HashSet;

use super::{Classifier, ClassifierInput};
use crate::check::words;
use crate::error::Result;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "and", "any", "are", "because", "been", "before",
    "being", "between", "both", "but", "can", "could", "did", "does", "during", "each", "few",
    "for", "from", "had", "has", "have", "her", "here", "him", "his", "how", "into", "its",
    "just", "may", "might", "more", "most", "must", "nor", "not", "only", "other", "our", "out",
    "over", "own", "per", "same", "she", "should", "some", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "too",
    "under", "very", "via", "was", "were", "what", "when", "where", "which", "while", "who",
    "why", "will", "with", "would", "yes", "you", "your",
];

const ABUSIVE_TERMS: &[&str] = &[
    "bastard",
    "dumbass",
    "go to hell",
    "idiot",
    "idiots",
    "imbecile",
    "jerk",
    "loser",
    "losers",
    "moron",
    "morons",
    "pathetic",
    "scum",
    "shut up",
    "stupid",
    "worthless",
];

/// Lowercase words of three or more characters that are not stop-words.
fn content_words(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn word_set(texts: &[&str]) -> HashSet<String> {
    texts.iter().flat_map(|t| words(t)).collect()
}

/// Share of abusive terms among the response's content words, scaled ×3.
pub struct LexiconToxicity {
    words: HashSet<String>,
    phrases: Vec<String>,
}

impl LexiconToxicity {
    /// Built-in lexicon plus `extra_terms`. Terms containing whitespace are
    /// matched as phrases.
    pub fn new(extra_terms: &[String]) -> Self {
        let mut words = HashSet::new();
        let mut phrases = Vec::new();
        let terms = ABUSIVE_TERMS
            .iter()
            .map(|t| t.to_string())
            .chain(extra_terms.iter().map(|t| t.to_lowercase()));
        for term in terms {
            if term.contains(char::is_whitespace) {
                phrases.push(term);
            } else {
                words.insert(term);
            }
        }
        Self { words, phrases }
    }
}

impl Default for LexiconToxicity {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[async_trait::async_trait]
impl Classifier for LexiconToxicity {
    fn name(&self) -> &str {
        "lexicon-toxicity"
    }

    async fn score(&self, input: &ClassifierInput<'_>) -> Result<f64> {
        let lower = input.response.to_lowercase();
        let word_hits = words(&lower)
            .iter()
            .filter(|w| self.words.contains(w.as_str()))
            .count();
        let phrase_hits: usize = self
            .phrases
            .iter()
            .map(|p| lower.matches(p.as_str()).count())
            .sum();

        let hits = (word_hits + phrase_hits) as f64;
        if hits == 0.0 {
            return Ok(0.0);
        }
        let denominator = content_words(&lower).len().max(1) as f64;
        Ok((hits * 3.0 / denominator).min(1.0))
    }
}

/// Fraction of the response's content words that appear in the reference text.
pub struct SupportOverlap;

#[async_trait::async_trait]
impl Classifier for SupportOverlap {
    fn name(&self) -> &str {
        "support-overlap"
    }

    async fn score(&self, input: &ClassifierInput<'_>) -> Result<f64> {
        let response = content_words(input.response);
        if response.is_empty() {
            return Ok(1.0);
        }
        let refs: Vec<&str> = input.context.iter().map(String::as_str).collect();
        let reference = word_set(&refs);
        let supported = response.iter().filter(|w| reference.contains(*w)).count();
        Ok(supported as f64 / response.len() as f64)
    }
}

/// Fraction of "claims" in the response that neither the reference text nor
/// the prompt mentions.
///
/// A claim is a token containing a digit, or a capitalized word that does not
/// start a sentence.
pub struct UnsupportedClaims;

impl UnsupportedClaims {
    fn claims(response: &str) -> Vec<String> {
        let mut claims = Vec::new();
        let mut sentence_start = true;
        for raw in response.split_whitespace() {
            let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
            if !token.is_empty() {
                let numeric = token.chars().any(|c| c.is_ascii_digit());
                let proper = !sentence_start
                    && token != "I"
                    && token.chars().next().is_some_and(char::is_uppercase);
                if numeric || proper {
                    claims.push(token.to_string());
                }
            }
            sentence_start = raw.ends_with(['.', '!', '?']);
        }
        claims
    }
}

#[async_trait::async_trait]
impl Classifier for UnsupportedClaims {
    fn name(&self) -> &str {
        "unsupported-claims"
    }

    async fn score(&self, input: &ClassifierInput<'_>) -> Result<f64> {
        let claims = Self::claims(input.response);
        if claims.is_empty() {
            return Ok(0.0);
        }
        let mut texts: Vec<&str> = input.context.iter().map(String::as_str).collect();
        texts.push(input.prompt);
        let known = word_set(&texts);

        let unsupported = claims
            .iter()
            .filter(|claim| !words(claim).iter().all(|w| known.contains(w)))
            .count();
        Ok(unsupported as f64 / claims.len() as f64)
    }
}

/// Fraction of the prompt's distinct content words echoed in the response.
pub struct PromptOverlap;

#[async_trait::async_trait]
impl Classifier for PromptOverlap {
    fn name(&self) -> &str {
        "prompt-overlap"
    }

    async fn score(&self, input: &ClassifierInput<'_>) -> Result<f64> {
        let prompt: HashSet<String> = content_words(input.prompt).into_iter().collect();
        if prompt.is_empty() {
            return Ok(1.0);
        }
        let response = word_set(&[input.response]);
        let echoed = prompt.iter().filter(|w| response.contains(*w)).count();
        Ok(echoed as f64 / prompt.len() as f64)
    }
}
