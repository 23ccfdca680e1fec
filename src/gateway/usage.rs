//! Per-call accounting.
//!
//! The gateway builds one [`CallRecord`] per HTTP attempt and hands it to a
//! [`UsageSink`]. The CLI logs records through `tracing`; tests collect them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::ProviderError;
use super::types::{ChatRequest, ChatResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failed {
        code: &'static str,
        request_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub model: String,
    pub caller: &'static str,
    pub session_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
    pub outcome: CallOutcome,
    pub finished_at: DateTime<Utc>,
}

impl CallRecord {
    fn base(req: &ChatRequest, latency: Duration, outcome: CallOutcome) -> Self {
        Self {
            model: req.model.model_id().to_string(),
            caller: req.attribution.caller,
            session_id: req.attribution.session_id,
            job_id: req.attribution.job_id,
            input_tokens: 0,
            output_tokens: 0,
            latency,
            outcome,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(req: &ChatRequest, resp: &ChatResponse) -> Self {
        Self {
            input_tokens: resp.input_tokens,
            output_tokens: resp.output_tokens,
            ..Self::base(req, resp.latency, CallOutcome::Success)
        }
    }

    pub fn failed(req: &ChatRequest, err: &ProviderError, latency: Duration) -> Self {
        let outcome = CallOutcome::Failed {
            code: err.code(),
            request_id: err.request_id().map(str::to_string),
        };
        Self::base(req, latency, outcome)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CallOutcome::Success
    }
}

/// Receives every call record. Recording must not fail the call it describes.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: CallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: CallRecord) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: CallRecord) {
        let latency_ms = record.latency.as_millis() as u64;
        match &record.outcome {
            CallOutcome::Success => tracing::info!(
                target: "digest_harness::usage",
                model = %record.model,
                caller = record.caller,
                job_id = ?record.job_id,
                input_tokens = record.input_tokens,
                output_tokens = record.output_tokens,
                latency_ms,
                "llm call"
            ),
            CallOutcome::Failed { code, request_id } => tracing::warn!(
                target: "digest_harness::usage",
                model = %record.model,
                caller = record.caller,
                job_id = ?record.job_id,
                code = *code,
                request_id = request_id.as_deref().unwrap_or("-"),
                latency_ms,
                "llm call failed"
            ),
        }
    }
}
