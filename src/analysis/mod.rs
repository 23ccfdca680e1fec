//! Hierarchical map-reduce analysis of a codebase.
//!
//! ```text
//! scan -> route -+-> single call ----------------------------------+-> report
//!                +-> chunk -> map (parallel) -> reduce rounds ------+
//!                                               -> synthesis
//! ```
//!
//! Every run ends with exactly one terminal event, `report` or `error`.

pub mod backend;
pub mod budget;
pub mod error;
pub mod events;
pub mod map;
pub mod reduce;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{AnalyzerConfig, Limits};
use crate::gateway::{Attribution, ChatGateway, ChatModel, Message, ProviderGateway, UsageSink};
use crate::prompts::follow_up_seed;
use crate::scan::{CodeCorpus, CorpusProvider, FsScanner, ScanError};
use crate::session::Session;
use crate::text_chunking::chunk_text;

pub use backend::Backend;
pub use budget::Route;
pub use error::AnalysisError;
pub use events::{
    EventLog, EventLogError, EventWriter, JsonlEventSink, NoopSink, ProgressEvent, ProgressSink,
    Stage, Tee,
};

pub struct Analyzer {
    backend: Backend,
    corpus: Arc<dyn CorpusProvider>,
    limits: Limits,
}

impl Analyzer {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        corpus: Arc<dyn CorpusProvider>,
        model: ChatModel,
        limits: Limits,
    ) -> Self {
        let backend = Backend::new(gateway, model, limits.context_limit, limits.max_output_tokens);
        Self {
            backend,
            corpus,
            limits,
        }
    }

    /// OpenRouter gateway from `OPENROUTER_*` variables and a filesystem
    /// scanner, both configured from `config`.
    pub fn from_config<U: UsageSink + 'static>(
        config: &AnalyzerConfig,
        usage: Arc<U>,
    ) -> Result<Self, AnalysisError> {
        config.limits.validate()?;
        let gateway = ProviderGateway::from_env(usage)?;
        let scanner = FsScanner::new(config.scan.clone())?;
        Ok(Self::new(
            Arc::new(gateway),
            Arc::new(scanner),
            ChatModel::openrouter(config.model.clone()),
            config.limits.clone(),
        ))
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Clear history and corpus.
    pub fn reset(&self, session: &mut Session) {
        session.reset();
    }

    /// Analyse the project at `path`, streaming progress into `sink`.
    ///
    /// The session is reset first; on success it holds the context needed
    /// for [`Analyzer::ask`]. The final event is `report` on success and
    /// `error` otherwise, mirroring the return value.
    pub async fn run(
        &self,
        session: &mut Session,
        path: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<String, AnalysisError> {
        self.reset(session);
        let attribution = Attribution::new("analysis")
            .with_session(session.id())
            .with_job(Uuid::new_v4());

        let result = self.run_stages(session, path, sink, &attribution).await;
        match &result {
            Ok(report) => sink.emit(ProgressEvent::report(report.clone())),
            Err(err) => {
                tracing::error!(error = %err, "analysis failed");
                sink.emit(ProgressEvent::failed(err));
            }
        }
        result
    }

    /// [`Analyzer::run`] without progress reporting.
    pub async fn run_blocking(
        &self,
        session: &mut Session,
        path: &Path,
    ) -> Result<String, AnalysisError> {
        self.run(session, path, &mut NoopSink).await
    }

    /// Answer a follow-up question from the session's history. History grows
    /// by the question and the answer on success and is untouched on failure.
    pub async fn ask(&self, session: &mut Session, question: &str) -> Result<String, AnalysisError> {
        if !session.has_history() {
            return Err(AnalysisError::NoSessionYet);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        let mut messages = session.history().to_vec();
        messages.push(Message::user(question));

        let attribution = Attribution::new("analysis::ask").with_session(session.id());
        let answer = self.backend.invoke(messages, attribution).await?;
        session.push_exchange(question.to_string(), answer.clone());
        Ok(answer)
    }

    async fn scan(&self, path: &Path) -> Result<Arc<CodeCorpus>, AnalysisError> {
        let provider = self.corpus.clone();
        let path = path.to_path_buf();
        let corpus = tokio::task::spawn_blocking(move || provider.scan(&path))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))??;
        Ok(Arc::new(corpus))
    }

    async fn run_stages(
        &self,
        session: &mut Session,
        path: &Path,
        sink: &mut dyn ProgressSink,
        attribution: &Attribution,
    ) -> Result<String, AnalysisError> {
        let corpus = self.scan(path).await?;
        session.set_corpus(corpus.clone());

        match budget::route(&corpus, &self.limits) {
            Route::SingleCall { prompt, estimated } => {
                tracing::info!(
                    tokens = estimated,
                    threshold = self.limits.single_call_threshold(),
                    "using single-call strategy"
                );
                sink.emit(ProgressEvent::single_call());
                sink.emit(ProgressEvent::single_pass());

                let mut history = prompt.to_messages();
                let report = self
                    .backend
                    .invoke(history.clone(), with_caller(attribution, "analysis::single"))
                    .await?;
                history.push(Message::assistant(report.clone()));
                session.replace_history(history);
                Ok(report)
            }
            Route::MapReduce { estimated } => {
                tracing::info!(
                    tokens = estimated,
                    threshold = self.limits.single_call_threshold(),
                    "using hierarchical map-reduce"
                );
                let report = self.map_reduce(corpus.clone(), sink, attribution).await?;
                session.replace_history(follow_up_seed(&corpus.root_path, &corpus.tree, &report));
                Ok(report)
            }
        }
    }

    async fn map_reduce(
        &self,
        corpus: Arc<CodeCorpus>,
        sink: &mut dyn ProgressSink,
        attribution: &Attribution,
    ) -> Result<String, AnalysisError> {
        let chunk_budget = budget::chunk_budget(&corpus, &self.limits);
        let chunks = chunk_text(&corpus.content, chunk_budget);
        let total_chunks = chunks.len();
        tracing::info!(
            chunks = total_chunks,
            chunk_budget,
            context_limit = self.limits.context_limit,
            overhead = budget::map_overhead(&corpus),
            margin = self.limits.chunk_safety_margin,
            "chunked codebase"
        );
        sink.emit(ProgressEvent::chunked(total_chunks, chunk_budget));

        let summaries = map::map_chunks(
            &self.backend,
            &corpus,
            &chunks,
            self.limits.workers_for(total_chunks),
            sink,
            &with_caller(attribution, "analysis::map"),
        )
        .await?;
        drop(chunks);

        // Reduce and synthesis run on their own task; events come back over
        // the channel, whose closure marks the end of the stage.
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let (result_tx, result_rx) = oneshot::channel();
        let backend = self.backend.clone();
        let limits = self.limits.clone();
        let reduce_attr = with_caller(attribution, "analysis::reduce");
        let synth_attr = with_caller(attribution, "analysis::synthesis");

        let _reduce_task = AbortOnDrop(tokio::spawn(async move {
            let mut events_tx = events_tx;
            let outcome = async {
                let consolidated = reduce::reduce(
                    &backend,
                    &corpus,
                    summaries,
                    &limits,
                    &mut events_tx,
                    &reduce_attr,
                )
                .await?;
                reduce::synthesize(&backend, &corpus, &consolidated, total_chunks, synth_attr)
                    .await
            }
            .await;
            let _ = result_tx.send(outcome);
        }));

        while let Some(event) = events_rx.recv().await {
            sink.emit(event);
        }

        result_rx
            .await
            .map_err(|_| AnalysisError::Worker("reduce task ended without a result".to_string()))?
    }
}

/// Stops the reduce task when the `run` future is dropped mid-flight, so no
/// backend calls outlive the caller.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn with_caller(base: &Attribution, caller: &'static str) -> Attribution {
    Attribution {
        caller,
        ..base.clone()
    }
}
