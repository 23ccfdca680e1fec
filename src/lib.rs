#![forbid(unsafe_code)]

//! # digest-harness
//!
//! Ask an LLM to explain a codebase that does not fit in its context window.
//!
//! A project directory is flattened into a single corpus (tree plus file
//! contents). Small corpora go to the model in one call. Larger ones are split
//! into line-aligned chunks, each chunk is summarized independently, and the
//! summaries are merged in rounds of batched consolidation until one remains.
//! A final synthesis call turns it into the report. The session then keeps
//! enough context to answer follow-up questions.
//!
//! Every model call goes through one pre-flight size check, so an oversized
//! request fails locally instead of being truncated by the provider.

pub mod analysis;
pub mod batching;
pub mod config;
pub mod gateway;
pub mod prompts;
pub mod scan;
pub mod session;
pub mod text_chunking;
pub mod tokens;

pub use analysis::{
    AnalysisError, Analyzer, EventLog, NoopSink, ProgressEvent, ProgressSink, Route, Stage,
};
pub use config::{AnalyzerConfig, ConfigError, Limits, ScanConfig};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use scan::{CodeCorpus, CorpusProvider, FsScanner, ScanError};
pub use session::{Session, SessionStore, SharedSession};
