//! Remote generation over HTTP.
//!
//! Sends `{"prompt": ..., "params": ...}` as JSON and expects the design
//! mapping as the JSON response body.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{BackendError, GenerationBackend};

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    pub endpoint: String,
    /// Bearer token, if the endpoint needs one
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl HttpBackendConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token: None,
            timeout_ms: 60_000,
        }
    }

    /// Reads `SPECLOOP_BACKEND_URL` (required) and `SPECLOOP_BACKEND_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("SPECLOOP_BACKEND_URL").ok()?;
        Some(Self {
            token: std::env::var("SPECLOOP_BACKEND_TOKEN").ok(),
            ..Self::new(&endpoint)
        })
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// Backend that posts prompts to a model-serving endpoint.
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("specloop/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self, prompt: &str, params: &Value) -> Result<Value, BackendError> {
        debug!(endpoint = %self.config.endpoint, "calling generation endpoint");
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&json!({ "prompt": prompt, "params": params }));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "generation endpoint returned an error");
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        match &value {
            Value::Null => Err(BackendError::Empty),
            Value::Object(map) if map.is_empty() => Err(BackendError::Empty),
            _ => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = HttpBackendConfig::new("http://localhost:9000/generate").with_token("t0k");
        assert_eq!(config.token.as_deref(), Some("t0k"));
        let backend = HttpBackend::new(config).unwrap();
        assert_eq!(backend.name(), "http");
        assert_eq!(backend.endpoint(), "http://localhost:9000/generate");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let mut config = HttpBackendConfig::new("http://127.0.0.1:9/generate");
        config.timeout_ms = 500;
        let backend = HttpBackend::new(config).unwrap();
        let err = backend.run("chair", &json!({"mode": "create"})).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
