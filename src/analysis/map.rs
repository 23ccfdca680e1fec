//! Map stage: one independent summary per chunk.

use futures::stream::{self, StreamExt};

use crate::gateway::Attribution;
use crate::prompts::{render_map, MapFields};
use crate::scan::CodeCorpus;
use crate::text_chunking::TextChunk;

use super::backend::Backend;
use super::events::{ProgressEvent, ProgressSink};
use super::AnalysisError;

/// Summarize one chunk. Errors carry the chunk position.
pub async fn summarize_chunk(
    backend: &Backend,
    corpus: &CodeCorpus,
    chunk: &TextChunk,
    total_chunks: usize,
    attribution: Attribution,
) -> Result<String, AnalysisError> {
    let prompt = render_map(MapFields {
        chunk_index: chunk.index,
        total_chunks,
        project_path: &corpus.root_path,
        tree: &corpus.tree,
        code: &chunk.text,
    });
    tracing::info!(
        chunk = chunk.index,
        total = total_chunks,
        tokens = chunk.tokens,
        prompt = prompt.template_slug,
        "mapping chunk"
    );
    backend
        .invoke(prompt.to_messages(), attribution)
        .await
        .map_err(|e| e.in_chunk(chunk.index, total_chunks))
}

/// Summarize every chunk with at most `workers` calls in flight.
///
/// Emits a dispatch event, then one event per completion in completion order.
/// The returned summaries are in chunk order. The first failure drops every
/// outstanding call.
pub async fn map_chunks(
    backend: &Backend,
    corpus: &CodeCorpus,
    chunks: &[TextChunk],
    workers: usize,
    sink: &mut dyn ProgressSink,
    attribution: &Attribution,
) -> Result<Vec<String>, AnalysisError> {
    let total = chunks.len();
    sink.emit(ProgressEvent::map_dispatch(workers, total));
    tracing::info!(workers, chunks = total, "map stage started");

    let mut summaries = vec![String::new(); total];
    let tasks: Vec<_> = chunks
        .iter()
        .map(|chunk| {
            let attribution = attribution.clone();
            async move {
                let result = summarize_chunk(backend, corpus, chunk, total, attribution).await;
                (chunk.index, result)
            }
        })
        .collect();
    let mut pending = stream::iter(tasks).buffer_unordered(workers.max(1));

    let mut completed = 0;
    while let Some((index, result)) = pending.next().await {
        summaries[index - 1] = result?;
        completed += 1;
        tracing::debug!(chunk = index, completed, total, "chunk complete");
        sink.emit(ProgressEvent::chunk_done(completed, total));
    }

    Ok(summaries)
}
