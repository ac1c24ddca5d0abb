//! Threshold checks over a [`Classifier`] score.

use std::sync::Arc;

use tracing::debug;

use super::{Check, CheckContext, Verdict};
use crate::classifier::{normalize_score, Classifier, ClassifierInput};
use crate::error::Result;
use crate::knowledge::GroundTruthStore;

pub const DEFAULT_TOXICITY_THRESHOLD: f64 = 0.5;
pub const DEFAULT_HALLUCINATION_THRESHOLD: f64 = 0.6;
pub const DEFAULT_GROUNDEDNESS_THRESHOLD: f64 = 0.3;
pub const DEFAULT_RELEVANCY_THRESHOLD: f64 = 0.1;

/// Which side of the threshold fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Risk scores (toxicity, hallucination): deny when `score >= threshold`.
    DenyAtOrAbove,
    /// Quality scores (groundedness, relevancy): deny when `score < threshold`.
    DenyBelow,
}

pub struct ScoreCheck {
    name: String,
    classifier: Arc<dyn Classifier>,
    threshold: f64,
    direction: Direction,
    knowledge: Option<Arc<dyn GroundTruthStore>>,
    requires_reference: bool,
}

impl ScoreCheck {
    pub fn new(
        name: impl Into<String>,
        classifier: Arc<dyn Classifier>,
        threshold: f64,
        direction: Direction,
    ) -> Self {
        Self {
            name: name.into(),
            classifier,
            threshold,
            direction,
            knowledge: None,
            requires_reference: false,
        }
    }

    /// Add knowledge-store matches for the prompt to the reference passages.
    pub fn with_knowledge(mut self, knowledge: Arc<dyn GroundTruthStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Pass without scoring when there is no reference text to score against.
    pub fn requires_reference(mut self) -> Self {
        self.requires_reference = true;
        self
    }

    fn reference(&self, ctx: &CheckContext<'_>) -> Vec<String> {
        let mut reference = ctx.request.context.clone();
        if let Some(fact) = self
            .knowledge
            .as_ref()
            .and_then(|k| k.retrieve_context(ctx.prompt))
        {
            reference.push(fact);
        }
        reference
    }
}

#[async_trait::async_trait]
impl Check for ScoreCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<Verdict> {
        let reference = self.reference(ctx);
        if self.requires_reference && reference.is_empty() {
            debug!("{}: no reference context, skipping", self.name);
            return Ok(Verdict::Pass);
        }

        let raw = self
            .classifier
            .score(&ClassifierInput {
                prompt: ctx.prompt,
                response: ctx.text,
                context: &reference,
            })
            .await?;
        let score = normalize_score(self.classifier.name(), raw)?;
        debug!(
            "{} scored {:.3} via {} (threshold {:.2})",
            self.name,
            score,
            self.classifier.name(),
            self.threshold
        );

        let failed = match self.direction {
            Direction::DenyAtOrAbove => score >= self.threshold,
            Direction::DenyBelow => score < self.threshold,
        };
        if !failed {
            return Ok(Verdict::Pass);
        }
        let op = match self.direction {
            Direction::DenyAtOrAbove => ">=",
            Direction::DenyBelow => "<",
        };
        Ok(Verdict::deny(format!(
            "{} score {:.2} {} threshold {:.2}",
            self.name, score, op, self.threshold
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Stage;
    use crate::classifier::heuristic::{SupportOverlap, UnsupportedClaims};
    use crate::gateway::AgentRequest;
    use crate::knowledge::InMemoryKnowledge;

    struct Fixed(f64);

    #[async_trait::async_trait]
    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(&self, _input: &ClassifierInput<'_>) -> Result<f64> {
            Ok(self.0)
        }
    }

    async fn run(check: &ScoreCheck, request: &AgentRequest, response: &str) -> Result<Verdict> {
        let ctx = CheckContext {
            stage: Stage::Output,
            request,
            text: response,
            prompt: &request.prompt,
        };
        check.check(&ctx).await
    }

    #[tokio::test]
    async fn risk_score_at_threshold_denies() {
        let check = ScoreCheck::new("toxicity", Arc::new(Fixed(0.5)), 0.5, Direction::DenyAtOrAbove);
        let request = AgentRequest::new("Agent1", "hi");
        let verdict = run(&check, &request, "whatever").await.unwrap();
        assert_eq!(verdict, Verdict::deny("toxicity score 0.50 >= threshold 0.50"));
    }

    #[tokio::test]
    async fn quality_score_below_threshold_denies() {
        let check = ScoreCheck::new("relevancy", Arc::new(Fixed(0.05)), 0.1, Direction::DenyBelow);
        let request = AgentRequest::new("Agent1", "hi");
        let verdict = run(&check, &request, "whatever").await.unwrap();
        assert_eq!(verdict, Verdict::deny("relevancy score 0.05 < threshold 0.10"));

        let check = ScoreCheck::new("relevancy", Arc::new(Fixed(0.1)), 0.1, Direction::DenyBelow);
        assert_eq!(run(&check, &request, "whatever").await.unwrap(), Verdict::Pass);
    }

    #[tokio::test]
    async fn non_finite_score_is_an_error() {
        let check = ScoreCheck::new("toxicity", Arc::new(Fixed(f64::NAN)), 0.5, Direction::DenyAtOrAbove);
        let request = AgentRequest::new("Agent1", "hi");
        assert!(run(&check, &request, "whatever").await.is_err());
    }

    #[tokio::test]
    async fn groundedness_without_reference_is_skipped() {
        let check = ScoreCheck::new(
            "groundedness",
            Arc::new(SupportOverlap),
            DEFAULT_GROUNDEDNESS_THRESHOLD,
            Direction::DenyBelow,
        )
        .requires_reference();
        let request = AgentRequest::new("Agent1", "tell me a story");
        let verdict = run(&check, &request, "Once upon a time").await.unwrap();
        assert_eq!(verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn knowledge_store_supplies_reference() {
        let mut knowledge = InMemoryKnowledge::new();
        knowledge.add_fact("sky color", "blue");
        let check = ScoreCheck::new(
            "groundedness",
            Arc::new(SupportOverlap),
            DEFAULT_GROUNDEDNESS_THRESHOLD,
            Direction::DenyBelow,
        )
        .with_knowledge(Arc::new(knowledge))
        .requires_reference();

        let request = AgentRequest::new("Agent1", "What color is the sky?");
        assert_eq!(run(&check, &request, "The sky is blue").await.unwrap(), Verdict::Pass);
        assert!(matches!(
            run(&check, &request, "Grass grows everywhere").await.unwrap(),
            Verdict::Deny { .. }
        ));
    }

    #[tokio::test]
    async fn request_context_counts_as_reference() {
        let check = ScoreCheck::new(
            "hallucination",
            Arc::new(UnsupportedClaims),
            DEFAULT_HALLUCINATION_THRESHOLD,
            Direction::DenyAtOrAbove,
        );
        let mut request = AgentRequest::new("Agent1", "Summarise the report");
        request.context = vec!["Revenue grew 12 percent in Q3.".to_string()];
        assert_eq!(
            run(&check, &request, "The report says revenue grew 12 percent in Q3.")
                .await
                .unwrap(),
            Verdict::Pass
        );
        assert!(matches!(
            run(&check, &request, "The report says revenue grew 40 percent in Q4.")
                .await
                .unwrap(),
            Verdict::Deny { .. }
        ));
    }
}
