//! Reduce stage and final synthesis.
//!
//! Reduction runs in rounds. Each round batches the surviving summaries,
//! consolidates every batch concurrently, and waits for all of them before the
//! next round is built. A single survivor ends the loop.

use futures::stream::{self, StreamExt};

use crate::batching::{Batcher, SummaryBatch};
use crate::config::Limits;
use crate::gateway::Attribution;
use crate::prompts::{join_summaries, render_reduce, render_synthesis, ReduceFields, SynthesisFields};
use crate::scan::CodeCorpus;

use super::backend::Backend;
use super::budget::reduce_overhead;
use super::events::{ProgressEvent, ProgressSink};
use super::AnalysisError;

async fn consolidate(
    backend: &Backend,
    corpus: &CodeCorpus,
    batch: SummaryBatch,
    attribution: Attribution,
) -> Result<String, AnalysisError> {
    let payload = join_summaries(&batch.summaries);
    let prompt = render_reduce(ReduceFields {
        project_path: &corpus.root_path,
        tree: &corpus.tree,
        summaries: &payload,
    });
    tracing::debug!(
        items = batch.len(),
        tokens = batch.tokens,
        prompt = prompt.template_slug,
        "consolidating batch"
    );
    backend.invoke(prompt.to_messages(), attribution).await
}

/// Collapse `summaries` into one.
///
/// One summary is returned as is without a backend call. An empty input is
/// rejected rather than starting a round with nothing to reduce.
pub async fn reduce(
    backend: &Backend,
    corpus: &CodeCorpus,
    summaries: Vec<String>,
    limits: &Limits,
    sink: &mut dyn ProgressSink,
    attribution: &Attribution,
) -> Result<String, AnalysisError> {
    if summaries.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "reduce needs at least one summary".to_string(),
        ));
    }

    let batcher = Batcher::new(
        limits.reduce_budget,
        limits.reduce_batch_max,
        reduce_overhead(corpus),
    );

    let mut round = 1;
    let mut current = summaries;

    while current.len() > 1 {
        let total_summaries = current.len();
        let batches = batcher.batch_converging(current);
        let total = batches.len();

        tracing::info!(
            round,
            summaries = total_summaries,
            batches = total,
            budget = limits.reduce_budget,
            available = batcher.available(),
            "reduce round started"
        );
        for (i, batch) in batches.iter().enumerate().take(3) {
            tracing::debug!(
                round,
                batch = i + 1,
                items = batch.len(),
                tokens = batch.tokens,
                "reduce batch"
            );
        }
        sink.emit(ProgressEvent::round_start(round, total_summaries, total));

        let mut results = vec![String::new(); total];
        let mut pending = stream::iter(batches.into_iter().enumerate().map(|(i, batch)| {
            let attribution = attribution.clone();
            async move { (i, consolidate(backend, corpus, batch, attribution).await) }
        }))
        .buffer_unordered(limits.workers_for(total));

        let mut completed = 0;
        while let Some((i, result)) = pending.next().await {
            results[i] = result.map_err(|e| e.in_batch(round, i + 1, total))?;
            completed += 1;
            tracing::debug!(round, batch = i + 1, completed, total, "batch complete");
            sink.emit(ProgressEvent::batch_done(round, completed, total));
        }

        current = results;
        round += 1;
    }

    current
        .pop()
        .ok_or_else(|| AnalysisError::Worker("reduce finished with no summary".to_string()))
}

/// Turn the consolidated summary into the final report.
pub async fn synthesize(
    backend: &Backend,
    corpus: &CodeCorpus,
    summary: &str,
    total_chunks: usize,
    attribution: Attribution,
) -> Result<String, AnalysisError> {
    let prompt = render_synthesis(SynthesisFields {
        total_chunks,
        project_path: &corpus.root_path,
        tree: &corpus.tree,
        summary,
    });
    tracing::info!(total_chunks, prompt = prompt.template_slug, "final synthesis");
    backend
        .invoke(prompt.to_messages(), attribution)
        .await
        .map_err(AnalysisError::in_synthesis)
}
