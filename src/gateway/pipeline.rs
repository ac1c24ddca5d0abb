//! Builds the input and output gates from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::ask::{AskBroadcaster, AskResponder};
use crate::check::misuse::MisuseCheck;
use crate::check::policy::PolicyCheck;
use crate::check::privacy::PrivacyCheck;
use crate::check::rbac::RbacCheck;
use crate::check::scored::{
    Direction, ScoreCheck, DEFAULT_GROUNDEDNESS_THRESHOLD, DEFAULT_HALLUCINATION_THRESHOLD,
    DEFAULT_RELEVANCY_THRESHOLD, DEFAULT_TOXICITY_THRESHOLD,
};
use crate::check::token_limit::TokenLimitCheck;
use crate::check::Stage;
use crate::classifier::heuristic::{LexiconToxicity, PromptOverlap, SupportOverlap, UnsupportedClaims};
use crate::classifier::http::HttpClassifier;
use crate::classifier::Classifier;
use crate::config::{FailMode, HailstormConfig, ScoreCheckConfig};
use crate::error::Result;
use crate::gate::Gate;
use crate::gateway::AgentRequest;
use crate::knowledge::{GroundTruthStore, InMemoryKnowledge};
use crate::notification::Dispatcher;
use crate::usage::UsageLedger;

/// Everything a gateway needs for one configuration generation.
pub(crate) struct Pipelines {
    pub input: Gate,
    pub output: Gate,
    pub denial_message: String,
    pub executor_timeout: Duration,
    pub memory_enabled: bool,
    pub default_role: Option<String>,
    /// Tightest `session_budget` among the enabled token limits.
    pub session_budget: Option<u64>,
}

impl Pipelines {
    pub fn on_fail(&self, stage: Stage) -> FailMode {
        match stage {
            Stage::Input => self.input.settings().on_fail,
            Stage::Output => self.output.settings().on_fail,
        }
    }

    /// Assign ids and resolve the effective role, so every check and the
    /// audit log see the same role.
    pub fn prepare(&self, request: &mut AgentRequest) {
        request.ensure_ids();
        if request.role.is_none() {
            request.role = self.default_role.clone();
        }
    }
}

/// Long-lived collaborators shared by every pipeline generation.
pub(crate) struct Shared<'a> {
    pub usage: &'a Arc<UsageLedger>,
    pub notifications: &'a Dispatcher,
    pub responders: &'a [Arc<dyn AskResponder>],
    pub knowledge: Option<&'a Arc<dyn GroundTruthStore>>,
    pub classifiers: &'a HashMap<String, Arc<dyn Classifier>>,
}

pub(crate) fn build(config: &HailstormConfig, shared: &Shared<'_>) -> Result<Pipelines> {
    let mut broadcaster = AskBroadcaster::new(config.ask.timeout_secs);
    for responder in shared.responders {
        broadcaster.add_responder(responder.clone());
    }
    let ask = Arc::new(broadcaster);

    let knowledge: Arc<dyn GroundTruthStore> = match shared.knowledge {
        Some(k) => k.clone(),
        None => Arc::new(InMemoryKnowledge::from_config(&config.knowledge)),
    };

    let i = &config.input_gate;
    let mut input = Gate::new(Stage::Input, i.settings.clone()).with_ask(ask.clone());
    if i.rbac.as_ref().is_some_and(|c| c.enabled) {
        input = input.with_check(Arc::new(RbacCheck::new(&config.rbac)?));
    }
    if let Some(policy) = i.policy.as_ref().filter(|c| c.enabled) {
        input = input.with_check(Arc::new(PolicyCheck::new(policy)?));
    }
    if let Some(limit) = i.token_limit.as_ref().filter(|c| c.enabled) {
        input = input.with_check(Arc::new(TokenLimitCheck::new(limit, shared.usage.clone())));
    }
    if let Some(misuse) = i.misuse.as_ref().filter(|c| c.enabled) {
        input = input.with_check(Arc::new(MisuseCheck::new(misuse)?));
    }
    if let Some(privacy) = i.privacy.as_ref().filter(|c| c.enabled) {
        input = input.with_check(Arc::new(PrivacyCheck::from_config(
            privacy,
            shared.notifications.clone(),
        )));
    }

    let o = &config.output_gate;
    let classifier_timeout = Duration::from_millis(o.settings.check_timeout_ms);
    let mut output = Gate::new(Stage::Output, o.settings.clone()).with_ask(ask);
    if o.rbac.as_ref().is_some_and(|c| c.enabled) {
        output = output.with_check(Arc::new(RbacCheck::new(&config.rbac)?));
    }
    if let Some(limit) = o.token_limit.as_ref().filter(|c| c.enabled) {
        output = output.with_check(Arc::new(TokenLimitCheck::new(limit, shared.usage.clone())));
    }
    if let Some(toxicity) = o.toxicity.as_ref().filter(|c| c.enabled) {
        let classifier: Arc<dyn Classifier> = match (shared.classifiers.get("toxicity"), &toxicity.classifier_url) {
            (Some(c), _) => c.clone(),
            (None, Some(url)) => Arc::new(HttpClassifier::new("toxicity", url, classifier_timeout)?),
            (None, None) => Arc::new(LexiconToxicity::new(&toxicity.terms)),
        };
        output = output.with_check(Arc::new(ScoreCheck::new(
            "toxicity",
            classifier,
            toxicity.threshold.unwrap_or(DEFAULT_TOXICITY_THRESHOLD),
            Direction::DenyAtOrAbove,
        )));
    }
    if let Some(cfg) = o.hallucination.as_ref().filter(|c| c.enabled) {
        let classifier =
            pick("hallucination", cfg, shared, classifier_timeout, Arc::new(UnsupportedClaims))?;
        output = output.with_check(Arc::new(
            ScoreCheck::new(
                "hallucination",
                classifier,
                cfg.threshold.unwrap_or(DEFAULT_HALLUCINATION_THRESHOLD),
                Direction::DenyAtOrAbove,
            )
            .with_knowledge(knowledge.clone()),
        ));
    }
    if let Some(cfg) = o.groundedness.as_ref().filter(|c| c.enabled) {
        let classifier =
            pick("groundedness", cfg, shared, classifier_timeout, Arc::new(SupportOverlap))?;
        output = output.with_check(Arc::new(
            ScoreCheck::new(
                "groundedness",
                classifier,
                cfg.threshold.unwrap_or(DEFAULT_GROUNDEDNESS_THRESHOLD),
                Direction::DenyBelow,
            )
            .with_knowledge(knowledge.clone())
            .requires_reference(),
        ));
    }
    if let Some(cfg) = o.relevancy.as_ref().filter(|c| c.enabled) {
        let classifier =
            pick("relevancy", cfg, shared, classifier_timeout, Arc::new(PromptOverlap))?;
        output = output.with_check(Arc::new(ScoreCheck::new(
            "relevancy",
            classifier,
            cfg.threshold.unwrap_or(DEFAULT_RELEVANCY_THRESHOLD),
            Direction::DenyBelow,
        )));
    }
    if let Some(privacy) = o.privacy.as_ref().filter(|c| c.enabled) {
        output = output.with_check(Arc::new(PrivacyCheck::from_config(
            privacy,
            shared.notifications.clone(),
        )));
    }

    Ok(Pipelines {
        input,
        output,
        denial_message: config.denial_message.clone(),
        executor_timeout: Duration::from_secs(config.executor.timeout_secs),
        memory_enabled: config.memory.enabled,
        default_role: config.rbac.default_role.clone(),
        session_budget: [i.token_limit.as_ref(), o.token_limit.as_ref()]
            .into_iter()
            .flatten()
            .filter(|limit| limit.enabled)
            .filter_map(|limit| limit.session_budget)
            .min(),
    })
}

/// Registered classifier, else the configured model service, else the heuristic.
fn pick(
    name: &str,
    cfg: &ScoreCheckConfig,
    shared: &Shared<'_>,
    timeout: Duration,
    heuristic: Arc<dyn Classifier>,
) -> Result<Arc<dyn Classifier>> {
    if let Some(c) = shared.classifiers.get(name) {
        return Ok(c.clone());
    }
    match &cfg.classifier_url {
        Some(url) => Ok(Arc::new(HttpClassifier::new(name, url, timeout)?)),
        None => Ok(heuristic),
    }
}
