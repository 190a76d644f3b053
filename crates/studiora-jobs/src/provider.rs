//! Generation provider client.
//!
//! Lesson generation and check-in evaluation both run prompts through an
//! external generation service. The trait keeps handlers testable; the
//! HTTP implementation is the production path and the mock is used in
//! handler and worker tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use studiora_core::{defaults, Error, Result};

/// A prompt sent to the generation service.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Instruction prompt for the model.
    pub prompt: String,
    /// Structured context (material excerpts, learner answers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
    /// Model override; the service default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            model: None,
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }
}

/// A structured completion from the generation service.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    /// Model output, already parsed as JSON by the service.
    pub content: JsonValue,
    /// Model that produced the output.
    pub model: String,
}

/// Client seam for the generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;
}

/// HTTP client for the generation service.
pub struct HttpGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationProvider {
    /// Create a client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::PROVIDER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Build from `GENERATION_API_URL` and optional `GENERATION_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("GENERATION_API_URL")
            .map_err(|_| Error::Config("GENERATION_API_URL is not set".into()))?;
        let mut provider = Self::new(base_url)?;
        if let Ok(key) = std::env::var("GENERATION_API_KEY") {
            provider.api_key = Some(key);
        }
        Ok(provider)
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        let url = format!("{}/v1/generate", self.base_url);
        debug!(subsystem = "provider", %url, "Sending generation request");

        let mut req = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            warn!(subsystem = "provider", error = %e, "Generation request failed");
            Error::Transient(format!("generation request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::Transient(format!(
                "generation service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(Error::Permanent(format!(
                "generation service returned {status}"
            )));
        }

        Ok(response.json::<GenerationResponse>().await?)
    }
}

/// Mock generation provider for deterministic testing.
#[derive(Clone, Default)]
pub struct MockGenerationProvider {
    response: Arc<Mutex<JsonValue>>,
    failures: Arc<Mutex<VecDeque<Error>>>,
    call_log: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerationProvider {
    pub fn new() -> Self {
        Self {
            response: Arc::new(Mutex::new(JsonValue::Null)),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the content returned by successful calls.
    pub fn with_response(self, content: JsonValue) -> Self {
        *self.response.lock().unwrap() = content;
        self
    }

    /// Queue transient failures for the next `n` calls.
    pub fn fail_times(self, n: usize) -> Self {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..n {
            failures.push_back(Error::Transient("mock provider failure".into()));
        }
        drop(failures);
        self
    }

    /// Queue a specific error for the next call.
    pub fn push_failure(&self, error: Error) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// All requests seen so far, for assertions.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationProvider for MockGenerationProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        self.call_log.lock().unwrap().push(request);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(GenerationResponse {
            content: self.response.lock().unwrap().clone(),
            model: "mock".to_string(),
        })
    }
}
