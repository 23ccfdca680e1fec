//! Routing and budget arithmetic.
//!
//! All overheads are measured by rendering the real templates with the live
//! project path and tree and an empty payload, so a large tree shrinks the
//! room left for code instead of silently overflowing the window.

use crate::config::Limits;
use crate::prompts::{
    render_analysis, render_map, render_reduce, AnalysisFields, MapFields, PromptInstance,
    ReduceFields,
};
use crate::scan::CodeCorpus;
use crate::tokens::estimate_tokens;

/// Wide chunk position used when measuring map overhead before the chunk
/// count is known.
const PLACEHOLDER_POSITION: usize = 99_999;

#[derive(Debug, Clone)]
pub enum Route {
    /// The whole codebase fits: one call with this prompt.
    SingleCall {
        prompt: PromptInstance,
        estimated: usize,
    },
    MapReduce {
        estimated: usize,
    },
}

impl Route {
    pub fn estimated(&self) -> usize {
        match self {
            Route::SingleCall { estimated, .. } | Route::MapReduce { estimated } => *estimated,
        }
    }

    pub fn is_single_call(&self) -> bool {
        matches!(self, Route::SingleCall { .. })
    }
}

fn prompt_tokens(prompt: &PromptInstance) -> usize {
    estimate_tokens(&prompt.system) + estimate_tokens(&prompt.user)
}

/// Single call when system plus full prompt fit under
/// `context_limit - overhead_reserve`, map-reduce otherwise.
pub fn route(corpus: &CodeCorpus, limits: &Limits) -> Route {
    let prompt = render_analysis(AnalysisFields {
        project_path: &corpus.root_path,
        tree: &corpus.tree,
        code: &corpus.content,
    });
    let estimated = prompt_tokens(&prompt);
    if estimated <= limits.single_call_threshold() {
        Route::SingleCall { prompt, estimated }
    } else {
        Route::MapReduce { estimated }
    }
}

/// System prompt plus map template with no code.
pub fn map_overhead(corpus: &CodeCorpus) -> usize {
    prompt_tokens(&render_map(MapFields {
        chunk_index: PLACEHOLDER_POSITION,
        total_chunks: PLACEHOLDER_POSITION,
        project_path: &corpus.root_path,
        tree: &corpus.tree,
        code: "",
    }))
}

/// Code budget per chunk, never below `min_chunk_tokens`.
pub fn chunk_budget(corpus: &CodeCorpus, limits: &Limits) -> usize {
    limits
        .context_limit
        .saturating_sub(map_overhead(corpus))
        .saturating_sub(limits.chunk_safety_margin)
        .max(limits.min_chunk_tokens)
}

/// System prompt plus reduce template with no summaries.
pub fn reduce_overhead(corpus: &CodeCorpus) -> usize {
    prompt_tokens(&render_reduce(ReduceFields {
        project_path: &corpus.root_path,
        tree: &corpus.tree,
        summaries: "",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(content_chars: usize, tree: &str) -> CodeCorpus {
        CodeCorpus {
            root_path: "/work/project".to_string(),
            tree: tree.to_string(),
            content: "x".repeat(content_chars),
            file_count: 1,
        }
    }

    #[test]
    fn fifty_thousand_tokens_is_a_single_call() {
        let route = route(&corpus(150_000, "/work/project"), &Limits::default());
        assert!(route.is_single_call());
        assert!(route.estimated() >= 50_000);
    }

    #[test]
    fn five_hundred_thousand_tokens_is_map_reduce() {
        let route = route(&corpus(1_500_000, "/work/project"), &Limits::default());
        assert!(!route.is_single_call());
        assert!(route.estimated() >= 500_000);
    }

    #[test]
    fn threshold_is_inclusive() {
        let limits = Limits::default();
        let base = corpus(0, "/work/project");
        let overhead = route(&base, &limits).estimated();
        // Pad content so the total lands exactly on the threshold.
        let pad = (limits.single_call_threshold() - overhead) * 3;
        let at = route(&corpus(pad, "/work/project"), &limits);
        assert_eq!(at.estimated(), limits.single_call_threshold());
        assert!(at.is_single_call());

        let over = route(&corpus(pad + 3, "/work/project"), &limits);
        assert!(!over.is_single_call());
    }

    #[test]
    fn big_tree_shrinks_the_chunk_budget() {
        let limits = Limits::default();
        let small = chunk_budget(&corpus(0, "/work/project"), &limits);
        let tree = "├── some/deeply/nested/file.rs\n".repeat(3_000);
        let large = chunk_budget(&corpus(0, &tree), &limits);

        assert!(small > 110_000);
        assert!(small < limits.context_limit - limits.chunk_safety_margin);
        assert!(large < small - 29_000);
    }

    #[test]
    fn chunk_budget_has_a_floor() {
        let limits = Limits::default();
        let tree = "x".repeat(600_000);
        assert_eq!(chunk_budget(&corpus(0, &tree), &limits), 1_000);
    }

    #[test]
    fn reduce_overhead_counts_the_tree() {
        let with_tree = reduce_overhead(&corpus(0, &"t".repeat(30_000)));
        let without = reduce_overhead(&corpus(0, ""));
        assert_eq!(with_tree - without, 10_000);
    }
}
