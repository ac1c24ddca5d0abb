//! Declarative gateway configuration.
//!
//! The top-level [`HailstormConfig`] is deserialized from `hailstorm.json`
//! (or a `.toml` file with the same schema). Each gate section is a mapping of
//! check name to check settings: a check that is absent from the mapping is not
//! run, a check that is present runs unless `"enabled": false`.
//!
//! # Example `hailstorm.json`
//!
//! ```json
//! {
//!   "executor": { "url": "http://127.0.0.1:8000/invoke" },
//!   "input_gate": {
//!     "on_fail": "deny",
//!     "misuse": { "builtin": true },
//!     "token_limit": { "max_tokens": 4096 }
//!   },
//!   "output_gate": {
//!     "on_fail": "raise",
//!     "toxicity": { "threshold": 0.5 }
//!   }
//! }
//! ```

pub mod reload;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HailstormError, Result};
use crate::policy::PolicyConfig;

/// What a gate does with a request once a check has denied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Return a denial (with the configured message) to the caller.
    #[default]
    Deny,
    /// Return [`HailstormError::Blocked`] to the caller.
    Raise,
}

/// What a gate does when a check errors or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Treat the failure as a denial (fail-closed).
    #[default]
    Deny,
    /// Log the failure and continue with the next check.
    Allow,
}

/// How the privacy check handles sensitive data it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    /// Replace each finding with `[REDACTED:<pattern>]` and let the text through.
    #[default]
    Mask,
    /// Deny the text outright.
    Deny,
}

fn default_true() -> bool {
    true
}

/// HTTP service settings (`server` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., `"127.0.0.1:18090"`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:18090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Remote agent engine settings (`executor` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Endpoint that accepts an `ExecutorRequest` as JSON. `None` disables `/v1/invoke`.
    #[serde(default)]
    pub url: Option<String>,
    /// Upper bound for one executor call.
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
}

fn default_executor_timeout() -> u64 {
    60
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_executor_timeout(),
        }
    }
}

/// Behavior shared by both gates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub on_fail: FailMode,
    #[serde(default)]
    pub on_error: ErrorMode,
    /// Upper bound for a single check, in milliseconds.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,
}

fn default_check_timeout() -> u64 {
    2000
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            on_fail: FailMode::default(),
            on_error: ErrorMode::default(),
            check_timeout_ms: default_check_timeout(),
        }
    }
}

/// Settings for checks that have nothing to tune beyond on/off.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToggleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `token_limit` check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum estimated tokens for a single prompt or response.
    pub max_tokens: u64,
    /// Optional cap on cumulative tokens per session.
    #[serde(default)]
    pub session_budget: Option<u64>,
}

/// `misuse` check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MisuseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Include the built-in prompt-injection and jailbreak patterns.
    #[serde(default = "default_true")]
    pub builtin: bool,
    /// Additional case-insensitive regexes.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// `privacy` check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: PrivacyMode,
    /// Optional subset of built-in pattern names. If `None`, all patterns are active.
    #[serde(default)]
    pub patterns: Option<Vec<String>>,
}

/// Settings for classifier-backed checks (hallucination, groundedness, relevancy).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoreCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Decision threshold in `[0, 1]`. Each check has its own default.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Remote classifier endpoint; the built-in heuristic is used when `None`.
    #[serde(default)]
    pub classifier_url: Option<String>,
}

/// `toxicity` check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToxicityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub classifier_url: Option<String>,
    /// Extra terms added to the built-in lexicon.
    #[serde(default)]
    pub terms: Vec<String>,
}

/// Checks run before the agent is called (`input_gate` section).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputGateConfig {
    #[serde(flatten)]
    pub settings: GateSettings,
    #[serde(default)]
    pub rbac: Option<ToggleConfig>,
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
    #[serde(default)]
    pub token_limit: Option<TokenLimitConfig>,
    #[serde(default)]
    pub misuse: Option<MisuseConfig>,
    #[serde(default)]
    pub privacy: Option<PrivacyConfig>,
    /// Keys no check claims. Rejected by [`HailstormConfig::validate`].
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

/// Checks run on the agent's response (`output_gate` section).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputGateConfig {
    #[serde(flatten)]
    pub settings: GateSettings,
    #[serde(default)]
    pub rbac: Option<ToggleConfig>,
    #[serde(default)]
    pub token_limit: Option<TokenLimitConfig>,
    #[serde(default)]
    pub toxicity: Option<ToxicityConfig>,
    #[serde(default)]
    pub hallucination: Option<ScoreCheckConfig>,
    #[serde(default)]
    pub groundedness: Option<ScoreCheckConfig>,
    #[serde(default)]
    pub relevancy: Option<ScoreCheckConfig>,
    #[serde(default)]
    pub privacy: Option<PrivacyConfig>,
    /// Keys no check claims. Rejected by [`HailstormConfig::validate`].
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

/// A role's permissions.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoleConfig {
    /// Agent id patterns this role may call (`"*"`, `"prefix*"`, `"*suffix"`, exact).
    #[serde(default)]
    pub agents: Vec<String>,
    /// Regexes for content this role may not receive.
    #[serde(default)]
    pub output_deny_patterns: Vec<String>,
}

/// Role-based access control (`rbac` section).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RbacConfig {
    /// Role assumed for requests that carry none.
    #[serde(default)]
    pub default_role: Option<String>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,
}

/// Reference facts for groundedness and hallucination checks (`knowledge` section).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
}

/// Conversation memory (`memory` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_max_turns() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_turns: default_max_turns(),
        }
    }
}

/// Human approval for `ask` policy rules (`ask` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AskConfig {
    #[serde(default = "default_ask_timeout")]
    pub timeout_secs: u64,
    /// Prompt on the terminal running the gateway.
    #[serde(default)]
    pub terminal: bool,
}

fn default_ask_timeout() -> u64 {
    60
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ask_timeout(),
            terminal: false,
        }
    }
}

/// Audit database (`audit` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Database file; defaults to `~/.hailstorm/audit.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Telegram Bot API configuration (nested under `notification.telegram`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot API token from @BotFather.
    pub bot_token: String,
    /// Target chat or channel ID.
    pub chat_id: String,
    /// Event kinds to send (`gate_denied`, `sensitive_data`, `lifecycle`). Empty sends all.
    #[serde(default)]
    pub events: Vec<String>,
}

/// Notification configuration (`notification` section).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Stands in for credentials in configuration served over the API.
pub const REDACTED: &str = "[REDACTED]";

fn default_denial_message() -> String {
    "This request was blocked by the gateway policy.".to_string()
}

/// Top-level configuration deserialized from `hailstorm.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HailstormConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Message returned to the end user when a gate denies.
    #[serde(default = "default_denial_message")]
    pub denial_message: String,
    #[serde(default)]
    pub input_gate: InputGateConfig,
    #[serde(default)]
    pub output_gate: OutputGateConfig,
    #[serde(default)]
    pub rbac: RbacConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
}

impl Default for HailstormConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            executor: ExecutorConfig::default(),
            denial_message: default_denial_message(),
            input_gate: InputGateConfig::default(),
            output_gate: OutputGateConfig::default(),
            rbac: RbacConfig::default(),
            knowledge: KnowledgeConfig::default(),
            memory: MemoryConfig::default(),
            ask: AskConfig::default(),
            audit: AuditConfig::default(),
            notification: None,
        }
    }
}

impl HailstormConfig {
    /// Load, parse and validate the configuration file at `path`.
    ///
    /// `${VAR}` and `$VAR` placeholders are replaced with environment variable
    /// values before parsing. Files with a `.toml` extension are parsed as
    /// TOML, everything else as JSON.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HailstormError::ConfigNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let content = substitute_env_vars(&content)?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content).map_err(|e| match e {
                HailstormError::Json(err) => HailstormError::ConfigInvalid {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                },
                other => other,
            })?
        };
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: HailstormConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HailstormConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no gate can act on: out-of-range thresholds, zero limits
    /// and patterns that do not compile.
    pub fn validate(&self) -> Result<()> {
        let input = &self.input_gate;
        let output = &self.output_gate;

        for (gate, settings) in [("input_gate", &input.settings), ("output_gate", &output.settings)] {
            if settings.check_timeout_ms == 0 {
                return Err(invalid(format!("{gate}.check_timeout_ms must be > 0")));
            }
        }
        for (gate, unknown) in [("input_gate", &input.unknown), ("output_gate", &output.unknown)] {
            if let Some(key) = unknown.keys().next() {
                return Err(invalid(format!("{gate}: unknown check or setting '{key}'")));
            }
        }

        for (name, limit) in [
            ("input_gate.token_limit", &input.token_limit),
            ("output_gate.token_limit", &output.token_limit),
        ] {
            if let Some(limit) = limit {
                if limit.max_tokens == 0 {
                    return Err(invalid(format!("{name}.max_tokens must be > 0")));
                }
                if limit.session_budget == Some(0) {
                    return Err(invalid(format!("{name}.session_budget must be > 0")));
                }
            }
        }

        let thresholds = [
            ("output_gate.toxicity", output.toxicity.as_ref().and_then(|c| c.threshold)),
            ("output_gate.hallucination", output.hallucination.as_ref().and_then(|c| c.threshold)),
            ("output_gate.groundedness", output.groundedness.as_ref().and_then(|c| c.threshold)),
            ("output_gate.relevancy", output.relevancy.as_ref().and_then(|c| c.threshold)),
        ];
        for (name, threshold) in thresholds {
            if let Some(t) = threshold {
                if !(0.0..=1.0).contains(&t) {
                    return Err(invalid(format!("{name}.threshold must be within [0, 1], got {t}")));
                }
            }
        }

        if let Some(policy) = &input.policy {
            for rule in &policy.rules {
                for pattern in &rule.patterns {
                    compile_check(&format!("policy rule '{}'", rule.name), pattern)?;
                }
            }
        }
        if let Some(misuse) = &input.misuse {
            for pattern in &misuse.patterns {
                compile_check("input_gate.misuse", pattern)?;
            }
        }
        for (role, cfg) in &self.rbac.roles {
            for pattern in &cfg.output_deny_patterns {
                compile_check(&format!("rbac role '{role}'"), pattern)?;
            }
        }
        if let Some(default_role) = &self.rbac.default_role {
            if !self.rbac.roles.contains_key(default_role) {
                return Err(invalid(format!(
                    "rbac.default_role '{default_role}' is not a defined role"
                )));
            }
        }

        if self.executor.timeout_secs == 0 {
            return Err(invalid("executor.timeout_secs must be > 0".to_string()));
        }
        if self.ask.timeout_secs == 0 {
            return Err(invalid("ask.timeout_secs must be > 0".to_string()));
        }
        if self.memory.max_turns == 0 {
            return Err(invalid("memory.max_turns must be > 0".to_string()));
        }
        Ok(())
    }

    /// Copy with credentials replaced by [`REDACTED`].
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(telegram) = config.telegram_mut() {
            telegram.bot_token = REDACTED.to_string();
        }
        config
    }

    /// Put back credentials that a client sent as [`REDACTED`], taking them
    /// from `current`.
    pub fn restore_redacted(&mut self, current: &HailstormConfig) {
        let Some(token) = current
            .notification
            .as_ref()
            .and_then(|n| n.telegram.as_ref())
            .map(|t| t.bot_token.clone())
        else {
            return;
        };
        if let Some(telegram) = self.telegram_mut() {
            if telegram.bot_token == REDACTED {
                telegram.bot_token = token;
            }
        }
    }

    fn telegram_mut(&mut self) -> Option<&mut TelegramConfig> {
        self.notification.as_mut().and_then(|n| n.telegram.as_mut())
    }

    /// Names of the checks each gate will run, in evaluation order.
    pub fn enabled_checks(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        let i = &self.input_gate;
        let o = &self.output_gate;
        let input = [
            ("rbac", i.rbac.as_ref().map(|c| c.enabled)),
            ("policy", i.policy.as_ref().map(|c| c.enabled)),
            ("token_limit", i.token_limit.as_ref().map(|c| c.enabled)),
            ("misuse", i.misuse.as_ref().map(|c| c.enabled)),
            ("privacy", i.privacy.as_ref().map(|c| c.enabled)),
        ];
        let output = [
            ("rbac", o.rbac.as_ref().map(|c| c.enabled)),
            ("token_limit", o.token_limit.as_ref().map(|c| c.enabled)),
            ("toxicity", o.toxicity.as_ref().map(|c| c.enabled)),
            ("hallucination", o.hallucination.as_ref().map(|c| c.enabled)),
            ("groundedness", o.groundedness.as_ref().map(|c| c.enabled)),
            ("relevancy", o.relevancy.as_ref().map(|c| c.enabled)),
            ("privacy", o.privacy.as_ref().map(|c| c.enabled)),
        ];
        let pick = |checks: &[(&'static str, Option<bool>)]| {
            checks
                .iter()
                .filter(|(_, enabled)| *enabled == Some(true))
                .map(|(name, _)| *name)
                .collect()
        };
        (pick(&input), pick(&output))
    }
}

fn invalid(message: String) -> HailstormError {
    HailstormError::ConfigValidation(message)
}

fn compile_check(owner: &str, pattern: &str) -> Result<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| invalid(format!("{owner}: invalid pattern '{pattern}': {e}")))
}

/// Replace `${VAR_NAME}` and `$VAR_NAME` placeholders with environment variable values.
///
/// Returns an error naming the variable if it is not set.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re_braces = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    // Bare form is uppercase-only to leave regex anchors like `$)` alone.
    let re_bare = Regex::new(r"\$([A-Z_][A-Z0-9_]*)")?;

    let mut result = input.to_string();
    for cap in re_braces.captures_iter(input) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| HailstormError::ConfigEnvVar(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    let intermediate = result.clone();
    for cap in re_bare.captures_iter(&intermediate) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| HailstormError::ConfigEnvVar(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
