//! The one path every analysis call takes to the model.

use std::sync::Arc;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message};
use crate::tokens::estimate_messages;

use super::AnalysisError;

/// Gateway plus model, guarded by a pre-flight size check.
#[derive(Clone)]
pub struct Backend {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
    context_limit: usize,
    max_output_tokens: Option<u32>,
}

impl Backend {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        model: ChatModel,
        context_limit: usize,
        max_output_tokens: Option<u32>,
    ) -> Self {
        Self {
            gateway,
            model,
            context_limit,
            max_output_tokens,
        }
    }

    pub fn model(&self) -> &ChatModel {
        &self.model
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    /// Estimated size of `messages`, or `SizeExceeded` over the context limit.
    pub fn check(&self, messages: &[Message]) -> Result<usize, AnalysisError> {
        let estimated = estimate_messages(messages);
        if estimated > self.context_limit {
            return Err(AnalysisError::SizeExceeded {
                estimated,
                limit: self.context_limit,
            });
        }
        Ok(estimated)
    }

    /// Send `messages` and return the completion text verbatim.
    pub async fn invoke(
        &self,
        messages: Vec<Message>,
        attribution: Attribution,
    ) -> Result<String, AnalysisError> {
        let estimated = self.check(&messages)?;
        tracing::debug!(
            caller = attribution.caller,
            tokens = estimated,
            limit = self.context_limit,
            "pre-flight estimate"
        );

        let mut req = ChatRequest::new(self.model.clone(), messages, attribution);
        if let Some(max) = self.max_output_tokens {
            req = req.max_tokens(max);
        }

        let resp = self.gateway.chat(req).await?;
        Ok(resp.content)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("model", &self.model)
            .field("context_limit", &self.context_limit)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, ProviderError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChatGateway for Counting {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.max_tokens, Some(512));
            Ok(ChatResponse::from_text("ok"))
        }
    }

    fn backend(limit: usize) -> (Backend, Arc<Counting>) {
        let gw = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let backend = Backend::new(gw.clone(), ChatModel::openrouter("test/model"), limit, Some(512));
        (backend, gw)
    }

    #[tokio::test]
    async fn oversized_payload_never_reaches_the_gateway() {
        let (backend, gw) = backend(100);
        let err = backend
            .invoke(vec![Message::user("x".repeat(303))], Attribution::new("test"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::SizeExceeded {
                estimated: 101,
                limit: 100
            }
        ));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn payload_at_the_limit_is_sent() {
        let (backend, gw) = backend(100);
        let out = backend
            .invoke(vec![Message::user("x".repeat(300))], Attribution::new("test"))
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(gw.calls.load(Ordering::SeqCst), 1);
    }
}
