//! Generation backends.
//!
//! A backend turns a prompt plus parameters into a raw JSON mapping. It knows
//! nothing about specifications; the [`Generator`](crate::generator::Generator)
//! validates the mapping and builds the document.
//!
//! Parameters always carry `mode` (`"create"` or `"revise"`). Revisions also
//! carry `previous_spec` and `targets`.

mod http;
mod rule_based;

pub use http::{HttpBackend, HttpBackendConfig};
pub use rule_based::RuleBasedBackend;

use async_trait::async_trait;
use serde_json::Value;

/// Errors a backend may return. All of them are recoverable by the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("backend rejected the prompt: {0}")]
    Rejected(String),

    #[error("backend returned an empty response")]
    Empty,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Unavailable(err.to_string())
    }
}

/// Produces raw design mappings from prompts.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short name recorded in scene metadata.
    fn name(&self) -> &str;

    async fn run(&self, prompt: &str, params: &Value) -> Result<Value, BackendError>;
}

/// Which parameter mode a call is in.
pub fn mode(params: &Value) -> &str {
    params.get("mode").and_then(Value::as_str).unwrap_or("create")
}
