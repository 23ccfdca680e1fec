//! Greedy grouping of summaries into token-bounded reduce batches.

use crate::prompts::{summary_heading, SUMMARY_SEPARATOR};
use crate::tokens::CHARS_PER_TOKEN;

/// An ordered, non-empty group of summaries consolidated by one reduce call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryBatch {
    pub summaries: Vec<String>,
    /// Estimate of the joined payload, headings and separators included.
    pub tokens: usize,
    chars: usize,
}

impl SummaryBatch {
    fn open(summary: String) -> Self {
        let mut batch = Self {
            summaries: Vec::new(),
            tokens: 0,
            chars: 0,
        };
        batch.push(summary);
        batch
    }

    /// Characters the payload grows by if `summary` is appended.
    fn growth(&self, summary: &str) -> usize {
        let separator = if self.summaries.is_empty() {
            0
        } else {
            SUMMARY_SEPARATOR.len()
        };
        separator + summary_heading(self.summaries.len() + 1).len() + summary.chars().count()
    }

    fn tokens_with(&self, summary: &str) -> usize {
        (self.chars + self.growth(summary)) / CHARS_PER_TOKEN
    }

    fn push(&mut self, summary: String) {
        self.chars += self.growth(&summary);
        self.tokens = self.chars / CHARS_PER_TOKEN;
        self.summaries.push(summary);
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Packs summaries into batches under a payload ceiling and an item cap.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    available: usize,
    max_items: usize,
}

impl Batcher {
    /// `overhead_tokens` is the estimate of the system prompt plus the reduce
    /// template rendered with no summaries; it is subtracted from `budget`.
    pub fn new(budget: usize, max_items: usize, overhead_tokens: usize) -> Self {
        Self {
            available: budget.saturating_sub(overhead_tokens),
            max_items: max_items.max(1),
        }
    }

    /// Token room left for summaries in a single batch.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Group `summaries` in order. A summary that alone exceeds the payload
    /// ceiling is placed in a batch by itself.
    pub fn batch(&self, summaries: Vec<String>) -> Vec<SummaryBatch> {
        let mut batches = Vec::new();
        let mut current: Option<SummaryBatch> = None;

        for summary in summaries {
            current = Some(match current.take() {
                Some(mut batch)
                    if batch.len() < self.max_items
                        && batch.tokens_with(&summary) <= self.available =>
                {
                    batch.push(summary);
                    batch
                }
                Some(batch) => {
                    batches.push(batch);
                    SummaryBatch::open(summary)
                }
                None => SummaryBatch::open(summary),
            });
        }

        batches.extend(current);
        batches
    }

    /// Like [`Batcher::batch`], but guarantees fewer batches than inputs when
    /// there is more than one input. If every summary had to stand alone, the
    /// round pairs neighbours instead so reduction still converges; the
    /// pre-flight guard rejects any pair that truly cannot fit.
    pub fn batch_converging(&self, summaries: Vec<String>) -> Vec<SummaryBatch> {
        let n = summaries.len();
        let batches = self.batch(summaries);
        if n < 2 || batches.len() < n {
            return batches;
        }

        tracing::warn!(
            summaries = n,
            available = self.available,
            "every summary exceeds the reduce payload alone; pairing neighbours"
        );
        let mut paired: Vec<SummaryBatch> = Vec::with_capacity(n.div_ceil(2));
        for summary in batches.into_iter().flat_map(|b| b.summaries) {
            match paired.last_mut() {
                Some(last) if last.len() < 2 => last.push(summary),
                _ => paired.push(SummaryBatch::open(summary)),
            }
        }
        paired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::join_summaries;
    use crate::tokens::estimate_tokens;

    fn summaries(n: usize, chars: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                let head = format!("summary {i}:");
                format!("{head}{}", "s".repeat(chars - head.len()))
            })
            .collect()
    }

    #[test]
    fn item_cap_splits_twenty_five_into_twenty_and_five() {
        let input = summaries(25, 12_000);
        let batcher = Batcher::new(90_000, 20, 1_500);
        let batches = batcher.batch(input.clone());

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 20);
        assert_eq!(batches[1].len(), 5);
        // 240,000 chars of text plus 424 of headings and separators.
        assert_eq!(batches[0].tokens, 80_141);

        let flattened: Vec<String> = batches.into_iter().flat_map(|b| b.summaries).collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn token_ceiling_closes_batches() {
        // 1,000 tokens each, 2,500 available => two per batch.
        let batcher = Batcher::new(3_000, 20, 500);
        assert_eq!(batcher.available(), 2_500);

        let batches = batcher.batch(summaries(5, 3_000));
        let sizes: Vec<usize> = batches.iter().map(SummaryBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        for batch in &batches {
            assert!(batch.tokens <= batcher.available());
        }
    }

    #[test]
    fn oversized_summary_is_isolated() {
        let mut input = summaries(2, 300);
        input.insert(1, "z".repeat(30_000));
        let batches = Batcher::new(1_000, 20, 0).batch(input);

        let sizes: Vec<usize> = batches.iter().map(SummaryBatch::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
        assert_eq!(batches[1].tokens, 10_004);
    }

    #[test]
    fn overhead_larger_than_budget_degrades_to_singletons() {
        let batches = Batcher::new(100, 20, 500).batch(summaries(3, 30));
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn converging_pairs_neighbours_when_nothing_fits_together() {
        let input = summaries(5, 3_000);
        let batches = Batcher::new(1_200, 20, 0).batch_converging(input.clone());

        let sizes: Vec<usize> = batches.iter().map(SummaryBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[0].tokens, 2_011);
        let flattened: Vec<String> = batches.into_iter().flat_map(|b| b.summaries).collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn converging_keeps_normal_batches() {
        let batcher = Batcher::new(90_000, 20, 1_500);
        assert_eq!(batcher.batch_converging(summaries(25, 12_000)).len(), 2);
        assert_eq!(batcher.batch_converging(summaries(1, 12_000)).len(), 1);
    }

    #[test]
    fn no_summaries_no_batches() {
        assert!(Batcher::new(90_000, 20, 0).batch(Vec::new()).is_empty());
    }

    #[test]
    fn batch_tokens_match_the_joined_payload() {
        // 20 x 30 chars is 200 tokens of text, but 341 once framed.
        let batcher = Batcher::new(250, 20, 0);
        let batches = batcher.batch(summaries(20, 30));
        assert!(batches.len() > 1);
        for batch in &batches {
            let rendered = estimate_tokens(&join_summaries(&batch.summaries));
            assert_eq!(batch.tokens, rendered);
            assert!(rendered <= batcher.available());
        }
    }
}
