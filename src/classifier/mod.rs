//! Scoring seam for the model-backed output checks.
//!
//! A [`Classifier`] turns a prompt/response pair (plus reference text) into a
//! score in `[0, 1]`. Hailstorm ships deterministic lexical heuristics in
//! [`heuristic`] so every output check works without a model, and
//! [`http::HttpClassifier`] for delegating to a real model service.
//!
//! | Check | Default classifier | Score meaning |
//! |-------|--------------------|---------------|
//! | `toxicity` | [`heuristic::LexiconToxicity`] | higher = more abusive |
//! | `hallucination` | [`heuristic::UnsupportedClaims`] | higher = more unsupported claims |
//! | `groundedness` | [`heuristic::SupportOverlap`] | higher = better supported |
//! | `relevancy` | [`heuristic::PromptOverlap`] | higher = more on-topic |

pub mod heuristic;
pub mod http;

use crate::error::{HailstormError, Result};

/// What a classifier sees.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub prompt: &'a str,
    pub response: &'a str,
    /// Reference passages: caller-supplied context plus knowledge-store matches.
    pub context: &'a [String],
}

/// Trait for scoring backends.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, input: &ClassifierInput<'_>) -> Result<f64>;
}

/// Reject non-finite scores and clamp the rest into `[0, 1]`.
pub fn normalize_score(classifier: &str, score: f64) -> Result<f64> {
    if !score.is_finite() {
        return Err(HailstormError::Classifier(format!(
            "{classifier} returned non-finite score {score}"
        )));
    }
    Ok(score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_into_unit_range() {
        assert_eq!(normalize_score("c", 1.7).unwrap(), 1.0);
        assert_eq!(normalize_score("c", -0.2).unwrap(), 0.0);
        assert_eq!(normalize_score("c", 0.25).unwrap(), 0.25);
    }

    #[test]
    fn normalize_rejects_nan() {
        let err = normalize_score("remote", f64::NAN).unwrap_err();
        assert!(err.to_string().contains("remote"));
        assert!(normalize_score("c", f64::INFINITY).is_err());
    }
}
