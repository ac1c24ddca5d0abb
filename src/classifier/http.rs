use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifierInput};
use crate::error::{HailstormError, Result};

#[derive(Serialize)]
struct ScoreRequest<'a> {
    prompt: &'a str,
    response: &'a str,
    context: &'a [String],
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// Delegates scoring to a model service.
///
/// `POST <url>` with `{"prompt", "response", "context"}`; the service answers
/// `{"score": <f64>}`.
pub struct HttpClassifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HailstormError::Classifier(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, input: &ClassifierInput<'_>) -> Result<f64> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ScoreRequest {
                prompt: input.prompt,
                response: input.response,
                context: input.context,
            })
            .send()
            .await
            .map_err(|e| HailstormError::Classifier(format!("{}: {}", self.name, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(HailstormError::Classifier(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }

        let body: ScoreResponse = resp
            .json()
            .await
            .map_err(|e| HailstormError::Classifier(format!("{}: invalid response: {}", self.name, e)))?;
        Ok(body.score)
    }
}
