//! Failures reported by the chat backend.

use std::time::Duration;

/// Wait applied to a 429 that carries no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Diagnostic details lifted from a failed HTTP exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// Provider error code, e.g. `context_length_exceeded`.
    pub provider_code: Option<String>,
    /// Value of the `x-request-id` response header.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: ErrorContext,
    },

    /// The provider's tokenizer counted more than the model window. The local
    /// estimate undershot, so retrying the same prompt cannot succeed.
    #[error("prompt exceeds the model context window: {message}")]
    ContextLength {
        message: String,
        context: ErrorContext,
    },

    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("model refused: {message}")]
    Refused { message: String },

    #[error("provider error: {message}")]
    Upstream {
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Classify a non-2xx response.
    pub fn from_status(
        status: u16,
        message: String,
        context: ErrorContext,
        retry_after: Option<Duration>,
    ) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
                context,
            },
            400 | 413 if is_context_overflow(&message, &context) => {
                Self::ContextLength { message, context }
            }
            400 | 413 => Self::InvalidRequest {
                message,
                context: Some(context),
            },
            _ => Self::Upstream {
                message,
                retryable: status >= 500 || status == 408,
                context: Some(context),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>, retryable: bool) -> Self {
        Self::Upstream {
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Upstream { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::ContextLength { .. }
            | Self::InvalidRequest { .. }
            | Self::Refused { .. }
            | Self::Config(_) => false,
        }
    }

    /// Short code for logs and usage records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::ContextLength { .. } => "context_length",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Refused { .. } => "refused",
            Self::Upstream { .. } => "upstream",
            Self::Timeout(_) => "timeout",
            Self::Http(_) => "http",
            Self::Config(_) => "config",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } | Self::ContextLength { context, .. } => {
                Some(context)
            }
            Self::InvalidRequest { context, .. } | Self::Upstream { context, .. } => {
                context.as_ref()
            }
            Self::Refused { .. } | Self::Timeout(_) | Self::Http(_) | Self::Config(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

fn is_context_overflow(message: &str, context: &ErrorContext) -> bool {
    if context.provider_code.as_deref() == Some("context_length_exceeded") {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("context length") || lower.contains("maximum context")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let ctx = ErrorContext::new;

        let err = ProviderError::from_status(429, "slow down".into(), ctx(), None);
        assert!(matches!(
            err,
            ProviderError::RateLimited { retry_after, .. } if retry_after == DEFAULT_RETRY_AFTER
        ));
        let err = ProviderError::from_status(
            429,
            "slow down".into(),
            ctx(),
            Some(Duration::from_secs(3)),
        );
        assert!(matches!(
            err,
            ProviderError::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(3)
        ));

        let err = ProviderError::from_status(413, "payload too big".into(), ctx(), None);
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));

        let err = ProviderError::from_status(503, "down".into(), ctx(), None);
        assert!(err.is_retryable());
        let err = ProviderError::from_status(401, "bad key".into(), ctx(), None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn context_overflow_is_recognised_by_code_or_message() {
        let by_code = ProviderError::from_status(
            400,
            "too long".into(),
            ErrorContext::new().with_code("context_length_exceeded"),
            None,
        );
        assert_eq!(by_code.code(), "context_length");
        assert!(!by_code.is_retryable());

        let by_message = ProviderError::from_status(
            400,
            "This model's maximum context length is 131072 tokens".into(),
            ErrorContext::new(),
            None,
        );
        assert!(matches!(by_message, ProviderError::ContextLength { .. }));
    }

    #[test]
    fn request_id_comes_from_context() {
        let ctx = ErrorContext::new().with_status(500).with_request_id("req-1");
        let err = ProviderError::from_status(500, "boom".into(), ctx, None);
        assert_eq!(err.request_id(), Some("req-1"));
        assert_eq!(err.code(), "upstream");
        assert_eq!(ProviderError::refused("no").request_id(), None);
    }
}
