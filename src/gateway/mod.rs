//! Input gate → agent executor → output gate.
//!
//! [`Gateway::invoke`] is the heart of Hailstorm. A request first crosses the
//! input gate; if it survives (possibly rewritten), the executor runs the
//! agent with the gated prompt and the session's remembered turns, and the
//! response then crosses the output gate. Denials are returned as
//! [`Outcome::Denied`] or raised as [`HailstormError::Blocked`] depending on
//! the denying gate's `on_fail` setting.
//!
//! The gates themselves live behind `RwLock<Arc<Pipelines>>`: every call
//! clones the `Arc` once, so [`Gateway::apply_config`] can swap in a new
//! generation without disturbing requests already in flight.

mod pipeline;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::ask::AskResponder;
use crate::audit::{AuditEntry, AuditSink};
use crate::check::Stage;
use crate::classifier::Classifier;
use crate::config::{FailMode, HailstormConfig};
use crate::error::{HailstormError, Result};
use crate::executor::http::HttpExecutor;
use crate::executor::{AgentExecutor, ExecutorRequest, UnavailableExecutor};
use crate::gate::{GateDecision, GateReport};
use crate::knowledge::GroundTruthStore;
use crate::memory::{ConversationMemory, Turn};
use crate::notification::{Dispatcher, NotificationEvent, Notifier};
use crate::usage::{estimate_tokens, UsageLedger};

use pipeline::{Pipelines, Shared};

/// Session used when a request does not name one.
pub const DEFAULT_SESSION: &str = "default";

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

/// A call into an agent, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Assigned (UUID v4) by the gateway when empty.
    #[serde(default)]
    pub request_id: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub role: Option<String>,
    pub prompt: String,
    /// Reference passages the response should be grounded in.
    #[serde(default)]
    pub context: Vec<String>,
}

impl AgentRequest {
    pub fn new(agent_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            request_id: String::new(),
            session_id: default_session(),
            agent_id: agent_id.into(),
            role: None,
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn ensure_ids(&mut self) {
        if self.request_id.is_empty() {
            self.request_id = uuid::Uuid::new_v4().to_string();
        }
        if self.session_id.is_empty() {
            self.session_id = default_session();
        }
    }
}

/// Result of [`Gateway::invoke`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Allowed {
        request_id: String,
        /// The response after the output gate (possibly masked).
        response: String,
        prompt_tokens: u64,
        response_tokens: u64,
        input: GateReport,
        output: GateReport,
    },
    Denied {
        request_id: String,
        stage: Stage,
        check: String,
        reason: String,
        /// User-facing denial text from the `denial_message` setting.
        message: String,
    },
}

impl Outcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed { .. })
    }

    pub fn request_id(&self) -> &str {
        match self {
            Outcome::Allowed { request_id, .. } | Outcome::Denied { request_id, .. } => request_id,
        }
    }
}

/// Snapshot for the status endpoint and `hailstorm status`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub executor: String,
    pub input_checks: Vec<String>,
    pub output_checks: Vec<String>,
    pub active_sessions: usize,
    pub remembered_sessions: usize,
    pub ask_responders: usize,
    pub audit_enabled: bool,
    pub notifications_enabled: bool,
}

pub struct Gateway {
    config: RwLock<HailstormConfig>,
    pipelines: RwLock<Arc<Pipelines>>,
    executor: Arc<dyn AgentExecutor>,
    has_executor: bool,
    usage: Arc<UsageLedger>,
    memory: Arc<ConversationMemory>,
    audit: Option<AuditSink>,
    notifications: Dispatcher,
    responders: Vec<Arc<dyn AskResponder>>,
    knowledge: Option<Arc<dyn GroundTruthStore>>,
    classifiers: HashMap<String, Arc<dyn Classifier>>,
}

impl Gateway {
    pub fn builder(config: HailstormConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    fn pipelines(&self) -> Arc<Pipelines> {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn shared(&self) -> Shared<'_> {
        Shared {
            usage: &self.usage,
            notifications: &self.notifications,
            responders: &self.responders,
            knowledge: self.knowledge.as_ref(),
            classifiers: &self.classifiers,
        }
    }

    /// Run a request through both gates and the executor.
    pub async fn invoke(&self, mut request: AgentRequest) -> Result<Outcome> {
        let pipelines = self.pipelines();
        pipelines.prepare(&mut request);
        info!(
            "Invoke {} agent='{}' session='{}'",
            request.request_id, request.agent_id, request.session_id
        );

        let input = pipelines
            .input
            .evaluate(&request, &request.prompt, &request.prompt)
            .await;
        self.audit_report(&request, &input);
        let prompt = match &input.decision {
            GateDecision::Allowed { text, .. } => text.clone(),
            GateDecision::Denied { check, reason } => {
                return self.deny(&pipelines, &request, Stage::Input, check, reason);
            }
        };

        let exec_request = ExecutorRequest {
            request_id: request.request_id.clone(),
            session_id: request.session_id.clone(),
            agent_id: request.agent_id.clone(),
            prompt: prompt.clone(),
            history: if pipelines.memory_enabled {
                self.memory.history(&request.session_id)
            } else {
                Vec::new()
            },
        };
        let executed = tokio::time::timeout(
            pipelines.executor_timeout,
            self.executor.execute(&exec_request),
        )
        .await;
        let response = match executed {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.executor_failed(&request, e)),
            Err(_) => {
                let e = HailstormError::Executor(format!(
                    "{} timed out after {}s",
                    self.executor.name(),
                    pipelines.executor_timeout.as_secs()
                ));
                return Err(self.executor_failed(&request, e));
            }
        };

        let output = pipelines
            .output
            .evaluate(&request, &response.response, &prompt)
            .await;
        self.audit_report(&request, &output);
        let final_response = match &output.decision {
            GateDecision::Allowed { text, .. } => text.clone(),
            GateDecision::Denied { check, reason } => {
                return self.deny(&pipelines, &request, Stage::Output, check, reason);
            }
        };

        // Counted the way the token_limit checks count: the gated prompt and
        // the response as the executor produced it.
        let prompt_tokens = estimate_tokens(&prompt);
        let response_tokens = estimate_tokens(&response.response);
        if let Err(used) = self.usage.record_within(
            &request.session_id,
            prompt_tokens,
            response_tokens,
            pipelines.session_budget,
        ) {
            let reason = format!(
                "session '{}' budget exhausted: {used} used + {} requested > {}",
                request.session_id,
                prompt_tokens + response_tokens,
                pipelines.session_budget.unwrap_or_default()
            );
            if let Some(audit) = &self.audit {
                audit.record_or_warn(entry(&request, "output", "token_limit", "deny", &reason));
            }
            return self.deny(&pipelines, &request, Stage::Output, "token_limit", &reason);
        }
        if pipelines.memory_enabled {
            self.memory
                .append(&request.session_id, Turn::new(prompt, final_response.clone()));
        }

        Ok(Outcome::Allowed {
            request_id: request.request_id,
            response: final_response,
            prompt_tokens,
            response_tokens,
            input,
            output,
        })
    }

    /// Run only the input gate. Audited, but no usage or memory side effects.
    pub async fn check_input(&self, mut request: AgentRequest) -> GateReport {
        let pipelines = self.pipelines();
        pipelines.prepare(&mut request);
        let report = pipelines
            .input
            .evaluate(&request, &request.prompt, &request.prompt)
            .await;
        self.audit_report(&request, &report);
        report
    }

    /// Run only the output gate against a candidate `response`.
    pub async fn check_output(&self, mut request: AgentRequest, response: &str) -> GateReport {
        let pipelines = self.pipelines();
        pipelines.prepare(&mut request);
        let report = pipelines
            .output
            .evaluate(&request, response, &request.prompt)
            .await;
        self.audit_report(&request, &report);
        report
    }

    fn deny(
        &self,
        pipelines: &Pipelines,
        request: &AgentRequest,
        stage: Stage,
        check: &str,
        reason: &str,
    ) -> Result<Outcome> {
        self.notifications.dispatch(NotificationEvent::GateDenied {
            stage,
            agent_id: request.agent_id.clone(),
            check: check.to_string(),
            reason: reason.to_string(),
        });
        match pipelines.on_fail(stage) {
            FailMode::Deny => Ok(Outcome::Denied {
                request_id: request.request_id.clone(),
                stage,
                check: check.to_string(),
                reason: reason.to_string(),
                message: pipelines.denial_message.clone(),
            }),
            FailMode::Raise => Err(HailstormError::Blocked {
                stage,
                check: check.to_string(),
                reason: reason.to_string(),
            }),
        }
    }

    fn executor_failed(&self, request: &AgentRequest, e: HailstormError) -> HailstormError {
        error!("Executor failed for {}: {}", request.request_id, e);
        if let Some(audit) = &self.audit {
            audit.record_or_warn(entry(request, "executor", "", "error", &e.to_string()));
        }
        e
    }

    fn audit_report(&self, request: &AgentRequest, report: &GateReport) {
        let Some(audit) = &self.audit else {
            return;
        };
        let stage = report.stage.as_str();
        let record = match &report.decision {
            GateDecision::Denied { check, reason } => entry(request, stage, check, "deny", reason),
            GateDecision::Allowed { rewritten: true, .. } => {
                let rewrites: Vec<_> = report
                    .records
                    .iter()
                    .filter(|r| r.action == "rewrite")
                    .collect();
                let checks: Vec<&str> = rewrites.iter().map(|r| r.check.as_str()).collect();
                let reasons: Vec<&str> = rewrites.iter().map(|r| r.reason.as_str()).collect();
                entry(request, stage, &checks.join(","), "rewrite", &reasons.join("; "))
            }
            GateDecision::Allowed { .. } => entry(
                request,
                stage,
                "",
                "allow",
                &format!("{} check(s) passed", report.records.len()),
            ),
        };
        audit.record_or_warn(record);
    }

    /// Validate `config` and swap in freshly built gates. On error the
    /// running gates are left untouched.
    pub fn apply_config(&self, config: HailstormConfig) -> Result<()> {
        config.validate()?;
        let pipelines = pipeline::build(&config, &self.shared())?;
        let (input, output) = (pipelines.input.check_names(), pipelines.output.check_names());

        *self.pipelines.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(pipelines);
        self.memory.set_max_turns(config.memory.max_turns);
        if config.executor.url != self.config().executor.url {
            warn!("executor.url changed; restart to switch executors");
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;

        info!(
            "Gates rebuilt: input [{}], output [{}]",
            input.join(", "),
            output.join(", ")
        );
        Ok(())
    }

    /// The configuration currently in force.
    pub fn config(&self) -> HailstormConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn usage(&self) -> &Arc<UsageLedger> {
        &self.usage
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn audit(&self) -> Option<&AuditSink> {
        self.audit.as_ref()
    }

    pub fn notifications(&self) -> &Dispatcher {
        &self.notifications
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// False when neither an executor nor `executor.url` was supplied.
    pub fn has_executor(&self) -> bool {
        self.has_executor
    }

    pub fn status(&self) -> GatewayStatus {
        let pipelines = self.pipelines();
        GatewayStatus {
            executor: self.executor.name().to_string(),
            input_checks: pipelines.input.check_names(),
            output_checks: pipelines.output.check_names(),
            active_sessions: self.usage.session_count(),
            remembered_sessions: self.memory.sessions().len(),
            ask_responders: self.responders.len(),
            audit_enabled: self.audit.is_some(),
            notifications_enabled: self.notifications.is_enabled(),
        }
    }
}

fn entry(request: &AgentRequest, stage: &str, check: &str, action: &str, reason: &str) -> AuditEntry {
    AuditEntry {
        id: None,
        timestamp: chrono::Utc::now().to_rfc3339(),
        request_id: request.request_id.clone(),
        session_id: request.session_id.clone(),
        agent_id: request.agent_id.clone(),
        role: request.role.clone(),
        stage: stage.to_string(),
        check_name: check.to_string(),
        action: action.to_string(),
        reason: reason.to_string(),
    }
}

/// Assembles a [`Gateway`]. Anything not set explicitly is derived from the
/// configuration.
pub struct GatewayBuilder {
    config: HailstormConfig,
    executor: Option<Arc<dyn AgentExecutor>>,
    audit: Option<AuditSink>,
    notifiers: Vec<Arc<dyn Notifier>>,
    responders: Vec<Arc<dyn AskResponder>>,
    knowledge: Option<Arc<dyn GroundTruthStore>>,
    classifiers: HashMap<String, Arc<dyn Classifier>>,
}

impl GatewayBuilder {
    pub fn new(config: HailstormConfig) -> Self {
        Self {
            config,
            executor: None,
            audit: None,
            notifiers: Vec::new(),
            responders: Vec::new(),
            knowledge: None,
            classifiers: HashMap::new(),
        }
    }

    /// Defaults to an [`HttpExecutor`] when `executor.url` is set, otherwise
    /// to an executor that fails every call.
    pub fn executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replaces the notifiers described by the `notification` section.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn ask_responder(mut self, responder: Arc<dyn AskResponder>) -> Self {
        self.responders.push(responder);
        self
    }

    /// Replaces the fact table from the `knowledge` section.
    pub fn knowledge(mut self, knowledge: Arc<dyn GroundTruthStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Use `classifier` for the named output check (`toxicity`,
    /// `hallucination`, `groundedness` or `relevancy`).
    pub fn classifier(mut self, check: &str, classifier: Arc<dyn Classifier>) -> Self {
        self.classifiers.insert(check.to_string(), classifier);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        self.config.validate()?;

        let has_executor = self.executor.is_some() || self.config.executor.url.is_some();
        let executor: Arc<dyn AgentExecutor> = match (self.executor, &self.config.executor.url) {
            (Some(executor), _) => executor,
            (None, Some(url)) => Arc::new(HttpExecutor::new(
                url,
                std::time::Duration::from_secs(self.config.executor.timeout_secs),
            )?),
            (None, None) => Arc::new(UnavailableExecutor),
        };
        let notifications = if self.notifiers.is_empty() {
            Dispatcher::from_config(self.config.notification.as_ref())
        } else {
            Dispatcher::new(self.notifiers, Vec::new())
        };
        let usage = Arc::new(UsageLedger::new());
        let memory = Arc::new(ConversationMemory::new(self.config.memory.max_turns));

        let pipelines = pipeline::build(
            &self.config,
            &Shared {
                usage: &usage,
                notifications: &notifications,
                responders: &self.responders,
                knowledge: self.knowledge.as_ref(),
                classifiers: &self.classifiers,
            },
        )?;

        Ok(Gateway {
            config: RwLock::new(self.config),
            pipelines: RwLock::new(Arc::new(pipelines)),
            executor,
            has_executor,
            usage,
            memory,
            audit: self.audit,
            notifications,
            responders: self.responders,
            knowledge: self.knowledge,
            classifiers: self.classifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorResponse, FnExecutor};

    fn echo() -> Arc<dyn AgentExecutor> {
        Arc::new(FnExecutor::new("echo", |req| {
            Ok(ExecutorResponse::text(format!("echo: {}", req.prompt)))
        }))
    }

    fn gateway(json: &str) -> Gateway {
        Gateway::builder(HailstormConfig::from_json_str(json).unwrap())
            .executor(echo())
            .build()
            .unwrap()
    }

    #[test]
    fn request_defaults_from_json() {
        let req: AgentRequest =
            serde_json::from_str(r#"{"agent_id": "Agent1", "prompt": "hi"}"#).unwrap();
        assert_eq!(req.session_id, DEFAULT_SESSION);
        assert!(req.request_id.is_empty());
        assert!(req.role.is_none());
        assert!(req.context.is_empty());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = Outcome::Denied {
            request_id: "r1".to_string(),
            stage: Stage::Input,
            check: "misuse".to_string(),
            reason: "x".to_string(),
            message: "blocked".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "denied");
        assert_eq!(json["stage"], "input");
        assert_eq!(outcome.request_id(), "r1");
    }

    #[tokio::test]
    async fn invoke_assigns_request_id() {
        let gw = gateway("{}");
        let outcome = gw.invoke(AgentRequest::new("Agent1", "hello")).await.unwrap();
        assert!(outcome.is_allowed());
        assert_eq!(outcome.request_id().len(), 36);
    }

    #[tokio::test]
    async fn allowed_turn_updates_usage_and_memory() {
        let gw = gateway("{}");
        let outcome = gw
            .invoke(AgentRequest::new("Agent1", "hello").with_session("s1"))
            .await
            .unwrap();
        match outcome {
            Outcome::Allowed {
                response,
                prompt_tokens,
                response_tokens,
                ..
            } => {
                assert_eq!(response, "echo: hello");
                assert_eq!(prompt_tokens, 2);
                assert_eq!(response_tokens, 3);
            }
            other => panic!("expected allow, got {other:?}"),
        }
        assert_eq!(gw.usage().total("s1"), 5);
        assert_eq!(gw.memory().history("s1").len(), 1);
    }

    #[tokio::test]
    async fn memory_history_reaches_executor() {
        let executor = Arc::new(FnExecutor::new("history", |req| {
            Ok(ExecutorResponse::text(format!("turns={}", req.history.len())))
        }));
        let gw = Gateway::builder(HailstormConfig::default())
            .executor(executor)
            .build()
            .unwrap();
        gw.invoke(AgentRequest::new("Agent1", "one")).await.unwrap();
        let second = gw.invoke(AgentRequest::new("Agent1", "two")).await.unwrap();
        assert!(matches!(second, Outcome::Allowed { ref response, .. } if response == "turns=1"));
    }

    #[tokio::test]
    async fn disabled_memory_sends_no_history() {
        let executor = Arc::new(FnExecutor::new("history", |req| {
            Ok(ExecutorResponse::text(format!("turns={}", req.history.len())))
        }));
        let config = HailstormConfig::from_json_str(r#"{"memory": {"enabled": false}}"#).unwrap();
        let gw = Gateway::builder(config).executor(executor).build().unwrap();
        gw.invoke(AgentRequest::new("Agent1", "one")).await.unwrap();
        let second = gw.invoke(AgentRequest::new("Agent1", "two")).await.unwrap();
        assert!(matches!(second, Outcome::Allowed { ref response, .. } if response == "turns=0"));
        assert!(gw.memory().sessions().is_empty());
    }

    #[tokio::test]
    async fn missing_executor_is_an_error() {
        let gw = Gateway::builder(HailstormConfig::default()).build().unwrap();
        assert_eq!(gw.executor_name(), "unavailable");
        assert!(!gw.has_executor());
        let err = gw
            .invoke(AgentRequest::new("Agent1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, HailstormError::Executor(_)));
    }

    #[tokio::test]
    async fn status_lists_checks_in_order() {
        let gw = gateway(
            r#"{
                "input_gate": { "misuse": {}, "token_limit": { "max_tokens": 100 } },
                "output_gate": { "privacy": {}, "toxicity": {} }
            }"#,
        );
        let status = gw.status();
        assert_eq!(status.input_checks, vec!["token_limit", "misuse"]);
        assert_eq!(status.output_checks, vec!["toxicity", "privacy"]);
        assert_eq!(status.executor, "echo");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_and_old_gates_kept() {
        let gw = gateway(r#"{"input_gate": {"misuse": {}}}"#);
        let mut bad = gw.config();
        bad.output_gate.toxicity = Some(crate::config::ToxicityConfig {
            enabled: true,
            threshold: Some(2.0),
            classifier_url: None,
            terms: vec![],
        });
        assert!(gw.apply_config(bad).is_err());
        assert_eq!(gw.status().input_checks, vec!["misuse"]);
        assert!(gw.status().output_checks.is_empty());
    }
}
