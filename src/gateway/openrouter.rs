//! OpenRouter chat completions over HTTP.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::{ChatRequest, ChatResponse, FinishReason, Message};

/// One HTTP-level completion call, without retries or accounting.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest response body read into memory.
const MAX_RESPONSE_BYTES: usize = 1_024 * 1_024;

/// Platform ceiling on request size: 1,048,576 tokens at 3 chars per token.
/// The analysis layer enforces the much tighter model limit before this.
const MAX_INPUT_CHARS: usize = 1_048_576 * 3;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as `HTTP-Referer` for OpenRouter app attribution.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub app_title: Option<String>,
}

impl OpenRouterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            referer: None,
            app_title: None,
        }
    }

    /// `OPENROUTER_API_KEY` is required. `OPENROUTER_BASE_URL`,
    /// `OPENROUTER_TIMEOUT_SECONDS`, `OPENROUTER_REFERER` and
    /// `OPENROUTER_APP_TITLE` are optional.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("OPENROUTER_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(raw) = std::env::var("OPENROUTER_TIMEOUT_SECONDS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ProviderError::config(format!(
                    "OPENROUTER_TIMEOUT_SECONDS must be whole seconds, got {raw:?}"
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        config.referer = std::env::var("OPENROUTER_REFERER").ok();
        config.app_title = std::env::var("OPENROUTER_APP_TITLE").ok();
        Ok(config)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("referer", &self.referer)
            .field("app_title", &self.app_title)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Adapter
// =============================================================================

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl OpenRouterAdapter {
    pub fn new(config: OpenRouterConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| ProviderError::config("API key contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, auth);
        for (name, value) in [
            ("HTTP-Referer", config.referer.as_deref()),
            ("X-Title", config.app_title.as_deref()),
        ] {
            if let Some(v) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            timeout: config.timeout,
        })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(OpenRouterConfig::from_env()?)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Http(err)
        }
    }

    /// Read the body, refusing to buffer more than `MAX_RESPONSE_BYTES`.
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<String, ProviderError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(e))?
        {
            if bytes.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(ProviderError::upstream(
                    format!("response body exceeds {MAX_RESPONSE_BYTES} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let chars: usize = req.messages.iter().map(|m| m.content.chars().count()).sum();
        if chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "request of {chars} chars exceeds the platform limit of {MAX_INPUT_CHARS}"
            )));
        }

        let started = Instant::now();
        let body = CompletionRequest {
            model: req.model.model_id(),
            messages: &req.messages,
            max_tokens: req.max_tokens,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let mut context = ErrorContext::new().with_status(status);
        if let Some(id) = header_str(response.headers(), "x-request-id") {
            context = context.with_request_id(id);
        }
        let retry_after = header_str(response.headers(), RETRY_AFTER.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let text = self.read_capped(response).await?;
        if !(200..300).contains(&status) {
            let (message, context) = error_details(&text, status, context);
            tracing::debug!(status, code = ?context.provider_code, "openrouter returned an error");
            return Err(ProviderError::from_status(status, message, context, retry_after));
        }

        let mut resp = parse_completion(&text, context)?;
        resp.latency = started.elapsed();
        Ok(resp)
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Message and code from an error body, falling back to the status line.
fn error_details(body: &str, status: u16, context: ErrorContext) -> (String, ErrorContext) {
    let error = serde_json::from_str::<CompletionResponse>(body)
        .ok()
        .and_then(|r| r.error);
    match error {
        Some(error) => {
            let context = match error.code {
                Some(serde_json::Value::String(code)) => context.with_code(code),
                Some(serde_json::Value::Null) | None => context,
                Some(other) => context.with_code(other.to_string()),
            };
            let message = error.message.unwrap_or_else(|| format!("HTTP {status}"));
            (message, context)
        }
        None => (format!("HTTP {status}"), context),
    }
}

/// Turn a 2xx body into a response. The text is passed through untouched.
/// An empty completion, or one cut by the provider's content filter, is an
/// error since neither can stand in for a summary or a report.
fn parse_completion(body: &str, context: ErrorContext) -> Result<ChatResponse, ProviderError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::upstream(format!("malformed completion JSON: {e}"), false))?;

    if let Some(error) = parsed.error {
        return Err(ProviderError::Upstream {
            message: error.message.unwrap_or_default(),
            retryable: false,
            context: Some(context),
        });
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::upstream("completion has no choices", false))?;
    let finish_reason = FinishReason::from(choice.finish_reason);
    let content = choice.message.and_then(|m| m.content).unwrap_or_default();
    if finish_reason == FinishReason::ContentFilter {
        return Err(ProviderError::refused(if content.is_empty() {
            "completion withheld by the content filter".to_string()
        } else {
            content
        }));
    }
    if content.trim().is_empty() {
        return Err(ProviderError::upstream("completion is empty", false));
    }

    let usage = parsed.usage.unwrap_or_default();
    let mut resp = ChatResponse::from_text(content);
    resp.input_tokens = usage.prompt_tokens.unwrap_or(0);
    resp.output_tokens = usage.completion_tokens.unwrap_or(0);
    resp.finish_reason = finish_reason;
    Ok(resp)
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}
