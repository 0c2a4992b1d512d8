//! Language-model oracle.
//!
//! The translator only needs one capability from a model: turn a prompt into
//! text. [`Oracle`] is that seam; [`OllamaOracle`] talks to an Ollama
//! `/api/generate` endpoint with streaming off:
//!
//! ```text
//! POST <url>  {"model": "mistral", "prompt": "...", "stream": false}
//! 200         {"response": "<completion text>", ...}
//! ```
//!
//! Every call carries the configured client timeout. There are no retries:
//! a slow or missing model fails the request fast.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::OracleConfig;
use crate::error::OracleError;

/// Text-completion oracle.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Oracle backed by an Ollama server.
pub struct OllamaOracle {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaOracle {
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            timeout,
        })
    }

    pub fn from_config(config: &OracleConfig) -> anyhow::Result<Self> {
        Self::new(
            config.url.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn map_transport(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout(self.timeout)
        } else if e.is_connect() || e.is_request() {
            OracleError::Unreachable {
                url: self.url.clone(),
                message: e.to_string(),
            }
        } else {
            OracleError::InvalidResponse(e.to_string())
        }
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        tracing::debug!(url = %self.url, model = %self.model, "calling oracle");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| self.map_transport(e))?;
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String, OracleError> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| OracleError::InvalidResponse(json.to_string()))
}
