//! The agent execution engine behind the gates.
//!
//! Hailstorm does not run agents itself. Graph execution, state persistence
//! and retries belong to an external engine reached through
//! [`AgentExecutor`]. Shipped implementations:
//!
//! - [`http::HttpExecutor`]: POSTs the request to a remote engine
//! - [`FnExecutor`]: wraps a closure, for embedding and tests
//! - [`crate::sim::RouteExecutor`]: the weighted-graph demo used by `simulate`

pub mod http;

use serde::{Deserialize, Serialize};

use crate::error::{HailstormError, Result};
use crate::memory::Turn;

/// What the engine receives: the gated (possibly masked) prompt plus the
/// session's remembered turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorRequest {
    pub request_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub prompt: String,
    #[serde(default)]
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResponse {
    pub response: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ExecutorResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

#[async_trait::async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutorRequest) -> Result<ExecutorResponse>;

    fn name(&self) -> &str;
}

type ExecuteFn = Box<dyn Fn(&ExecutorRequest) -> Result<ExecutorResponse> + Send + Sync>;

/// Executor backed by a synchronous closure.
pub struct FnExecutor {
    name: String,
    execute_fn: ExecuteFn,
}

impl FnExecutor {
    pub fn new(
        name: impl Into<String>,
        execute_fn: impl Fn(&ExecutorRequest) -> Result<ExecutorResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            execute_fn: Box::new(execute_fn),
        }
    }
}

#[async_trait::async_trait]
impl AgentExecutor for FnExecutor {
    async fn execute(&self, request: &ExecutorRequest) -> Result<ExecutorResponse> {
        (self.execute_fn)(request)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Placeholder used when no engine is configured; every call fails.
pub struct UnavailableExecutor;

#[async_trait::async_trait]
impl AgentExecutor for UnavailableExecutor {
    async fn execute(&self, _request: &ExecutorRequest) -> Result<ExecutorResponse> {
        Err(HailstormError::Executor(
            "no executor configured (set executor.url)".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
