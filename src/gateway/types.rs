//! Request and response shapes shared by the gateway and the analysis core.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who made a call. Usage records and logs carry it so a single line can be
/// traced back to the session, the run, and the stage.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub session_id: Option<Uuid>,
    /// One id per `Analyzer::run`.
    pub job_id: Option<Uuid>,
    /// Stage label such as `analysis::reduce`.
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_session(self, session_id: Uuid) -> Self {
        Self {
            session_id: Some(session_id),
            ..self
        }
    }

    pub fn with_job(self, job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, serialized as OpenRouter expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// OpenRouter model id, e.g. `google/gemini-2.5-flash-lite`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatModel(String);

impl ChatModel {
    pub fn openrouter(model_id: impl Into<String>) -> Self {
        Self(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ChatModel,
    pub messages: Vec<Message>,
    /// Cap on generated tokens. `None` leaves the provider default.
    pub max_tokens: Option<u32>,
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            max_tokens: None,
            attribution,
        }
    }

    pub fn max_tokens(self, max: u32) -> Self {
        Self {
            max_tokens: Some(max),
            ..self
        }
    }

    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rfind(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Output hit `max_tokens`; the text is cut short but still usable.
    Length,
    ContentFilter,
    Other(String),
    Missing,
}

impl From<Option<String>> for FinishReason {
    fn from(raw: Option<String>) -> Self {
        let Some(raw) = raw else {
            return Self::Missing;
        };
        match raw.as_str() {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other(raw),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    /// Provider-reported counts; zero when the provider omits usage.
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    /// A finished response carrying only text, for in-process gateways.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::ZERO,
            finish_reason: FinishReason::Stop,
        }
    }
}
