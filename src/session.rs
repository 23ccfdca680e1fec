//! Conversation sessions and the process-wide registry that owns them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::gateway::Message;
use crate::scan::CodeCorpus;

/// Conversation state retained between an analysis and its follow-ups.
///
/// Only the analyzer mutates a session, and only at stage boundaries: reset
/// when a run starts, seed when it succeeds, append after each answer.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    history: Vec<Message>,
    corpus: Option<Arc<CodeCorpus>>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            history: Vec::new(),
            corpus: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn corpus(&self) -> Option<&Arc<CodeCorpus>> {
        self.corpus.as_ref()
    }

    /// Drop history and corpus.
    pub fn reset(&mut self) {
        self.history.clear();
        self.corpus = None;
    }

    pub(crate) fn set_corpus(&mut self, corpus: Arc<CodeCorpus>) {
        self.corpus = Some(corpus);
    }

    pub(crate) fn replace_history(&mut self, history: Vec<Message>) {
        self.history = history;
    }

    pub(crate) fn push_exchange(&mut self, question: String, answer: String) {
        self.history.push(Message::user(question));
        self.history.push(Message::assistant(answer));
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Registry of live sessions keyed by id.
///
/// The outer lock is held only for map operations; each session has its own
/// async lock so a long analysis never blocks lookups of other sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, SharedSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a fresh empty session.
    pub fn create(&self) -> (Uuid, SharedSession) {
        let session = Session::new();
        let id = session.id();
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        self.map().insert(id, shared.clone());
        tracing::debug!(session_id = %id, "session created");
        (id, shared)
    }

    pub fn get(&self, id: &Uuid) -> Option<SharedSession> {
        self.map().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<SharedSession> {
        let removed = self.map().remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
