use std::time::Duration;

use tracing::debug;

use super::{AgentExecutor, ExecutorRequest, ExecutorResponse};
use crate::error::{HailstormError, Result};

/// Calls a remote agent engine: `POST <url>` with the [`ExecutorRequest`] as
/// JSON, expecting an [`ExecutorResponse`] back.
pub struct HttpExecutor {
    url: String,
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HailstormError::Executor(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl AgentExecutor for HttpExecutor {
    async fn execute(&self, request: &ExecutorRequest) -> Result<ExecutorResponse> {
        debug!("POST {} for agent '{}'", self.url, request.agent_id);
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| HailstormError::Executor(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(HailstormError::Executor(format!(
                "engine returned {}: {}",
                status, body
            )));
        }

        resp.json::<ExecutorResponse>()
            .await
            .map_err(|e| HailstormError::Executor(format!("invalid engine response: {}", e)))
    }

    fn name(&self) -> &str {
        "http"
    }
}
