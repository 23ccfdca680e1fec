//! Progress events and the sinks that consume them.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Chunking,
    Mapping,
    Reducing,
    Report,
    Error,
}

/// One step of a run, in emission order. Serializes as a flat object tagged
/// by `stage`, e.g. `{"stage":"mapping","message":"...","chunk":3,"total":12}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum ProgressEvent {
    Chunking {
        message: String,
        total_chunks: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_budget: Option<usize>,
    },
    Mapping {
        message: String,
        /// Completed chunks so far; 0 on the dispatch event.
        chunk: usize,
        total: usize,
    },
    Reducing {
        message: String,
        round: usize,
        /// Completed batches so far; 0 on the round-start event.
        batch: usize,
        total_batches: usize,
        /// Summaries entering the round; only on the round-start event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_summaries: Option<usize>,
    },
    Report {
        message: String,
        report: String,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn single_call() -> Self {
        Self::Chunking {
            message: "Codebase fits in the context window; using a single call.".to_string(),
            total_chunks: 1,
            chunk_budget: None,
        }
    }

    pub fn chunked(total_chunks: usize, chunk_budget: usize) -> Self {
        Self::Chunking {
            message: format!(
                "Chunking: split codebase into {total_chunks} chunk(s) of ~{chunk_budget} tokens each."
            ),
            total_chunks,
            chunk_budget: Some(chunk_budget),
        }
    }

    pub fn single_pass() -> Self {
        Self::Mapping {
            message: "Mapping: analysing the full codebase in one pass...".to_string(),
            chunk: 1,
            total: 1,
        }
    }

    pub fn map_dispatch(workers: usize, total: usize) -> Self {
        Self::Mapping {
            message: format!(
                "Mapping: launching {workers} parallel worker(s) for {total} chunk(s)..."
            ),
            chunk: 0,
            total,
        }
    }

    pub fn chunk_done(completed: usize, total: usize) -> Self {
        Self::Mapping {
            message: format!("Mapping: chunk {completed}/{total} complete."),
            chunk: completed,
            total,
        }
    }

    pub fn round_start(round: usize, total_summaries: usize, total_batches: usize) -> Self {
        Self::Reducing {
            message: format!(
                "Reduce round {round}: consolidating {total_summaries} summaries into {total_batches} batch(es)..."
            ),
            round,
            batch: 0,
            total_batches,
            total_summaries: Some(total_summaries),
        }
    }

    pub fn batch_done(round: usize, completed: usize, total_batches: usize) -> Self {
        Self::Reducing {
            message: format!("Reduce round {round}: batch {completed}/{total_batches} complete."),
            round,
            batch: completed,
            total_batches,
            total_summaries: None,
        }
    }

    pub fn report(report: impl Into<String>) -> Self {
        Self::Report {
            message: "Analysis complete.".to_string(),
            report: report.into(),
        }
    }

    pub fn failed(error: &dyn std::fmt::Display) -> Self {
        Self::Error {
            message: format!("Analysis failed: {error}"),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Chunking { .. } => Stage::Chunking,
            Self::Mapping { .. } => Stage::Mapping,
            Self::Reducing { .. } => Stage::Reducing,
            Self::Report { .. } => Stage::Report,
            Self::Error { .. } => Stage::Error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Chunking { message, .. }
            | Self::Mapping { message, .. }
            | Self::Reducing { message, .. }
            | Self::Report { message, .. }
            | Self::Error { message } => message,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage(), Stage::Report | Stage::Error)
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Push-style consumer of progress events.
pub trait ProgressSink: Send {
    fn emit(&mut self, event: ProgressEvent);
}

/// Forwards into a channel. A dropped receiver silently discards events.
impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&mut self, _event: ProgressEvent) {}
}

/// Collects every event in order.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ProgressEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ProgressEvent> {
        self.events
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.events.iter().filter(|e| e.stage() == stage).count()
    }

    pub fn last(&self) -> Option<&ProgressEvent> {
        self.events.last()
    }
}

impl ProgressSink for EventLog {
    fn emit(&mut self, event: ProgressEvent) {
        self.events.push(event);
    }
}

/// Fans one event out to two sinks.
pub struct Tee<'a> {
    pub first: &'a mut dyn ProgressSink,
    pub second: &'a mut dyn ProgressSink,
}

impl ProgressSink for Tee<'_> {
    fn emit(&mut self, event: ProgressEvent) {
        self.first.emit(event.clone());
        self.second.emit(event);
    }
}

// =============================================================================
// JSONL file sink
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("event writer failed: {0}")]
    Join(String),
}

/// Writes each event as one JSON line on a background thread.
pub struct JsonlEventSink {
    sender: mpsc::Sender<ProgressEvent>,
}

pub struct EventWriter {
    handle: Option<std::thread::JoinHandle<Result<(), EventLogError>>>,
}

impl EventWriter {
    /// Wait for all queued events to reach disk. Drop the sink first.
    pub fn join(mut self) -> Result<(), EventLogError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(EventLogError::Join("event writer panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlEventSink {
    /// Truncates `path` if it exists.
    pub fn create(path: impl AsRef<Path>) -> Result<(Self, EventWriter), EventLogError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<ProgressEvent>();
        let handle = std::thread::spawn(move || write_events(file, receiver));
        Ok((
            Self { sender },
            EventWriter {
                handle: Some(handle),
            },
        ))
    }
}

impl ProgressSink for JsonlEventSink {
    fn emit(&mut self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!("event writer stopped; dropping progress event");
        }
    }
}

fn write_events(
    file: std::fs::File,
    receiver: mpsc::Receiver<ProgressEvent>,
) -> Result<(), EventLogError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line =
            serde_json::to_string(&event).map_err(|e| EventLogError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}
