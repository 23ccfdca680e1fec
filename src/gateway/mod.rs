//! LLM access: the [`ChatGateway`] seam and its OpenRouter implementation.

pub mod error;
pub mod openrouter;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::CallRecord;

pub use error::{ErrorContext, ProviderError, DEFAULT_RETRY_AFTER};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

/// Role-tagged messages in, one completion out. The analysis core only ever
/// sees this trait, so tests can script replies per stage.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[async_trait]
impl<G: ChatGateway + ?Sized> ChatGateway for Arc<G> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        (**self).chat(req).await
    }
}

/// Retry behaviour of [`ProviderGateway`]. The default makes one attempt.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    /// First backoff step; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Upper bound on any single wait, including a provider `Retry-After`.
    pub max_retry_wait: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay: Duration::from_secs(1),
            max_retry_wait: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// How long to wait before attempt `attempt + 1`, or `None` to give up.
    fn wait_before_retry(&self, err: &ProviderError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries || !err.is_retryable() {
            return None;
        }
        let wait = match err {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => self.retry_base_delay.saturating_mul(1 << attempt.min(5)),
        };
        Some(wait.min(self.max_retry_wait))
    }
}

/// OpenRouter behind the [`ChatGateway`] seam, with usage recording per
/// attempt and optional retries.
pub struct ProviderGateway<U: UsageSink> {
    adapter: OpenRouterAdapter,
    usage: Arc<U>,
    config: GatewayConfig,
}

impl<U: UsageSink> ProviderGateway<U> {
    pub fn from_env(usage: Arc<U>) -> Result<Self, ProviderError> {
        Ok(Self::with_config(
            OpenRouterAdapter::from_env()?,
            usage,
            GatewayConfig::default(),
        ))
    }

    pub fn with_config(adapter: OpenRouterAdapter, usage: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            adapter,
            usage,
            config,
        }
    }
}

#[async_trait]
impl<U: UsageSink> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let err = match self.adapter.chat(&req).await {
                Ok(resp) => {
                    self.usage.record(CallRecord::succeeded(&req, &resp)).await;
                    return Ok(resp);
                }
                Err(err) => err,
            };
            self.usage
                .record(CallRecord::failed(&req, &err, started.elapsed()))
                .await;

            let Some(wait) = self.config.wait_before_retry(&err, attempt) else {
                return Err(err);
            };
            tracing::debug!(
                caller = req.attribution.caller,
                attempt,
                ?wait,
                code = err.code(),
                "retrying llm call"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
