//! Line-preserving text chunking under a token budget.
//!
//! The input is a concatenated source listing, so chunks break on line
//! boundaries rather than paragraphs or sentences.
//!
//! # Example
//!
//! ```rust
//! use digest_harness::text_chunking::chunk_text;
//!
//! let text = "line one\nline two\n".repeat(1_000);
//! let chunks = chunk_text(&text, 1_000);
//!
//! assert!(chunks.len() > 1);
//! let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(rebuilt, text);
//! ```
//!
//! # Algorithm
//!
//! 1. **Fast path**: text within `budget * 3` characters is one chunk
//! 2. **Line packing**: lines (with their endings) accumulate until the next
//!    line would cross the ceiling, then the chunk closes
//! 3. **Hard split**: a single line longer than the ceiling flushes the current
//!    chunk and is cut into ceiling-sized pieces
//!
//! Chunks partition the input: concatenating them reproduces it exactly.

use crate::tokens::{estimate_tokens, max_chars_for};

/// A chunk of text with its estimated token count and source offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 1-based position in the chunk sequence.
    pub index: usize,
    pub text: String,
    /// Estimated tokens (chars / 3).
    pub tokens: usize,
    /// Character offset of the first char in the source text.
    pub char_start: usize,
    /// Character offset one past the last char.
    pub char_end: usize,
}

/// Packs lines into chunks, tracking char offsets as it goes.
struct ChunkBuilder {
    max_chars: usize,
    chunks: Vec<TextChunk>,
    current: String,
    current_chars: usize,
    offset: usize,
}

impl ChunkBuilder {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_chars: 0,
            offset: 0,
        }
    }

    fn push_line(&mut self, line: &str) {
        let line_chars = line.chars().count();

        if line_chars > self.max_chars {
            self.flush();
            self.hard_split(line);
            return;
        }

        if self.current_chars + line_chars > self.max_chars {
            self.flush();
        }
        self.current.push_str(line);
        self.current_chars += line_chars;
    }

    fn hard_split(&mut self, line: &str) {
        let mut rest = line;
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .nth(self.max_chars)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let (piece, tail) = rest.split_at(cut);
            self.current.push_str(piece);
            self.current_chars = piece.chars().count();
            self.flush();
            rest = tail;
        }
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.current);
        let chars = std::mem::take(&mut self.current_chars);
        self.chunks.push(TextChunk {
            index: self.chunks.len() + 1,
            tokens: estimate_tokens(&text),
            char_start: self.offset,
            char_end: self.offset + chars,
            text,
        });
        self.offset += chars;
    }

    fn finish(mut self) -> Vec<TextChunk> {
        self.flush();
        self.chunks
    }
}

/// Split `text` into ordered chunks whose estimates stay within
/// `budget_tokens`. A zero budget is treated as one token.
pub fn chunk_text(text: &str, budget_tokens: usize) -> Vec<TextChunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let max_chars = max_chars_for(budget_tokens.max(1));
    let total_chars = text.chars().count();

    if total_chars <= max_chars {
        return vec![TextChunk {
            index: 1,
            text: text.to_string(),
            tokens: estimate_tokens(text),
            char_start: 0,
            char_end: total_chars,
        }];
    }

    let mut builder = ChunkBuilder::new(max_chars);
    for line in text.split_inclusive('\n') {
        builder.push_line(line);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(chunks: &[TextChunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 100).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "fn main() {\n    println!(\"hi\");\n}\n";
        let chunks = chunk_text(text, 1_000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, text.chars().count());
    }

    #[test]
    fn test_lines_are_never_split_when_they_fit() {
        // 10 lines of 30 chars, budget of 20 tokens = 60 chars => 2 lines per chunk.
        let line = format!("{}\n", "x".repeat(29));
        let text = line.repeat(10);
        let chunks = chunk_text(&text, 20);

        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert_eq!(chunk.text, line.repeat(2));
            assert!(chunk.tokens <= 20);
        }
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_oversized_line_is_hard_split() {
        let text = format!("short\n{}\ntail\n", "y".repeat(100));
        let chunks = chunk_text(&text, 10); // 30 chars

        assert_eq!(rebuild(&chunks), text);
        assert_eq!(chunks[0].text, "short\n");
        // 101 chars of "yyy...\n" become 30 + 30 + 30 + 11.
        assert_eq!(chunks[1].text.chars().count(), 30);
        assert_eq!(chunks[4].text, "yyyyyyyyyy\n");
        assert_eq!(chunks[5].text, "tail\n");
        for chunk in &chunks {
            assert!(chunk.tokens <= 10);
        }
    }

    #[test]
    fn test_indices_and_offsets_are_contiguous() {
        let text = "alpha\nbeta\ngamma\ndelta\nepsilon\n".repeat(20);
        let chunks = chunk_text(&text, 8);

        let mut expected_start = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i + 1);
            assert_eq!(chunk.char_start, expected_start);
            assert_eq!(chunk.char_end - chunk.char_start, chunk.text.chars().count());
            assert!(!chunk.text.is_empty());
            expected_start = chunk.char_end;
        }
        assert_eq!(expected_start, text.chars().count());
    }

    #[test]
    fn test_multibyte_text_reconstructs() {
        let text = "├── src\n│   └── lib.rs\n".repeat(50) + &"é".repeat(200);
        let chunks = chunk_text(&text, 15);
        assert!(chunks.len() > 1);
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn test_zero_budget_still_makes_progress() {
        let chunks = chunk_text("abcdefg", 0);
        assert_eq!(rebuild(&chunks), "abcdefg");
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_forty_files_into_six_chunks() {
        // 9000 lines of 100 chars => 900,000 chars => 300,000 estimated tokens.
        let line = format!("{}\n", "c".repeat(99));
        let file = line.repeat(225);
        let text = file.repeat(40);
        assert_eq!(estimate_tokens(&text), 300_000);

        let chunks = chunk_text(&text, 50_000);
        assert_eq!(chunks.len(), 6);
        for chunk in &chunks {
            assert!(chunk.tokens <= 50_000);
        }
        assert_eq!(rebuild(&chunks), text);
    }
}
