//! LLM client seam: one opaque text-generation call.
//!
//! The planner owns prompting and parsing; clients only turn a prompt into
//! raw text. Two clients ship here: an OpenAI-compatible HTTP client (which
//! also covers local servers via `base_url`) and a scripted stub for tests
//! and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an unusable response: {0}")]
    Response(String),
}

/// Which client implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// Scripted responses, no network.
    Stub,
    /// Hosted OpenAI-compatible API (api key required).
    OpenAi,
    /// Self-hosted OpenAI-compatible server addressed via `base_url`.
    Local,
}

/// Retry policy for transient request failures.
///
/// `max_retries` counts total attempts (the first try included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// Exponential backoff before the given (1-based) attempt's retry.
pub(crate) fn compute_backoff(attempt: u32, retry: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let base = retry.initial_backoff_ms as f64 * retry.backoff_multiplier.powi(exponent as i32);
    let base_ms = base.min(60_000.0) as u64;
    let jitter_ms = if retry.use_jitter && base_ms > 0 {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        rng.gen_range(0..=base_ms / 4)
    } else {
        0
    };
    Duration::from_millis(base_ms + jitter_ms)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Stub,
            model: "stub-model".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: Some(4000),
            temperature: Some(0.2),
            timeout_seconds: Some(60),
            retry: RetryConfig::default(),
        }
    }
}

/// Attempt counters for monitoring retry behavior.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    pub total_attempts: AtomicU64,
    pub first_attempt_successes: AtomicU64,
    pub first_attempt_failures: AtomicU64,
    pub successful_retries: AtomicU64,
    pub failed_retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryMetricsSummary {
    pub total_attempts: u64,
    pub first_attempt_successes: u64,
    pub first_attempt_failures: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
}

impl RetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, attempt: u32, success: bool) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        let counter = match (attempt == 1, success) {
            (true, true) => &self.first_attempt_successes,
            (true, false) => &self.first_attempt_failures,
            (false, true) => &self.successful_retries,
            (false, false) => &self.failed_retries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> RetryMetricsSummary {
        RetryMetricsSummary {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            first_attempt_successes: self.first_attempt_successes.load(Ordering::Relaxed),
            first_attempt_failures: self.first_attempt_failures.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            failed_retries: self.failed_retries.load(Ordering::Relaxed),
        }
    }
}

/// Identifying information about a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmInfo {
    pub provider: String,
    pub model: String,
}

/// One opaque generation call; pluggable behind the planner.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError>;

    fn client_info(&self) -> LlmInfo;
}

/// Fallback the stub emits when its script is exhausted: an incomplete plan
/// naming one missing function, so downstream stages have something real to
/// chew on without a network.
const STUB_FALLBACK_PLAN: &str = r#"{
  "steps": [
    {
      "type": "function_call",
      "stepId": 1,
      "description": "Handle the request with a function that does not exist yet",
      "functionName": "handle_request",
      "parameters": {}
    }
  ],
  "missingFunctions": [
    {
      "name": "handle_request",
      "description": "Carry out the user's request",
      "suggestedParameters": [],
      "suggestedReturns": "object"
    }
  ],
  "status": "incomplete"
}"#;

/// Scripted client: pops responses from a preloaded queue, records every
/// prompt, counts calls. Deterministic by construction.
#[derive(Default)]
pub struct StubLlmClient {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl StubLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn enqueue(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let scripted = self.responses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| STUB_FALLBACK_PLAN.to_string()))
    }

    fn client_info(&self) -> LlmInfo {
        LlmInfo {
            provider: "stub".to_string(),
            model: "stub-model".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

struct Completion {
    content: String,
    prompt_hash: String,
    response_hash: String,
    total_tokens: Option<u32>,
    latency_ms: u128,
}

/// OpenAI-compatible `chat/completions` client. Works against the hosted
/// API and against local servers that speak the same protocol.
pub struct OpenAiCompatibleClient {
    config: LlmConfig,
    client: reqwest::Client,
    metrics: RetryMetrics,
}

impl OpenAiCompatibleClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.provider == LlmProviderKind::OpenAi && config.api_key.is_none() {
            return Err(LlmError::Config(
                "api_key is required for the hosted OpenAI provider".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.unwrap_or(60)))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            metrics: RetryMetrics::new(),
        })
    }

    pub fn retry_metrics(&self) -> RetryMetricsSummary {
        self.metrics.summary()
    }

    async fn make_request(&self, prompt: &str) -> Result<Completion, LlmError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let url = format!("{}/chat/completions", base_url);

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let payload = serde_json::to_vec(&body)
            .map_err(|e| LlmError::Request(format!("failed to serialize request: {}", e)))?;
        let prompt_hash = sha256_hex(&payload);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let start = Instant::now();
        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| LlmError::Request(format!("HTTP request failed: {}", e)))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| LlmError::Request(format!("failed to read response body: {}", e)))?;
        let latency_ms = start.elapsed().as_millis();

        if !status.is_success() {
            let preview: String = raw.chars().take(300).collect();
            return Err(LlmError::Request(format!("HTTP {}: {}", status, preview)));
        }

        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| LlmError::Response(format!("unparseable completion payload: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("completion carried no choices".to_string()))?;

        Ok(Completion {
            response_hash: sha256_hex(content.as_bytes()),
            prompt_hash,
            total_tokens: parsed.usage.unwrap_or_default().total_tokens,
            latency_ms,
            content,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        let attempts = self.config.retry.max_retries.max(1);
        let mut last_error: Option<LlmError> = None;

        for attempt in 1..=attempts {
            match self.make_request(prompt).await {
                Ok(completion) => {
                    self.metrics.record(attempt, true);
                    log::debug!(
                        "llm completion model={} attempt={} latency_ms={} tokens={:?} prompt_sha={} response_sha={}",
                        self.config.model,
                        attempt,
                        completion.latency_ms,
                        completion.total_tokens,
                        &completion.prompt_hash[..12],
                        &completion.response_hash[..12],
                    );
                    return Ok(completion.content);
                }
                Err(e) => {
                    self.metrics.record(attempt, false);
                    log::warn!(
                        "llm request attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        let backoff = compute_backoff(attempt, &self.config.retry);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Request("no request attempts were made".to_string())))
    }

    fn client_info(&self) -> LlmInfo {
        LlmInfo {
            provider: match self.config.provider {
                LlmProviderKind::OpenAi => "openai".to_string(),
                LlmProviderKind::Local => "local".to_string(),
                LlmProviderKind::Stub => "stub".to_string(),
            },
            model: self.config.model.clone(),
        }
    }
}

/// Builds the client matching a config.
pub struct LlmClientFactory;

impl LlmClientFactory {
    pub fn create(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        match config.provider {
            LlmProviderKind::Stub => Ok(Arc::new(StubLlmClient::new())),
            LlmProviderKind::OpenAi | LlmProviderKind::Local => {
                Ok(Arc::new(OpenAiCompatibleClient::new(config.clone())?))
            }
        }
    }
}
