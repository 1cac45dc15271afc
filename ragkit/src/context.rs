//! Context assembly: pick the retrieved chunks that go into the prompt.

use std::collections::HashSet;

use tracing::debug;

use crate::document::{AssembledContext, RetrievalResult};

/// Lowercase alphanumeric words of `text`.
pub(crate) fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of the word sets of `a` and `b`.
///
/// Two texts without any words are identical (1.0).
pub fn word_overlap(a: &str, b: &str) -> f32 {
    jaccard(&word_set(a), &word_set(b))
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Greedy, budget-bounded selection of retrieved chunks.
///
/// Candidates are visited best-first. A candidate is taken when its word
/// overlap with every chunk taken so far is at most `dedup_threshold` and
/// its text still fits in the remaining character budget. A candidate that
/// does not fit is skipped; smaller ones after it are still considered.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    dedup_threshold: f32,
}

impl ContextAssembler {
    /// Create an assembler treating chunks with a word overlap above
    /// `dedup_threshold` as duplicates.
    pub fn new(dedup_threshold: f32) -> Self {
        Self { dedup_threshold }
    }

    /// Select chunks from `result` whose combined size is at most `budget`
    /// characters.
    pub fn assemble(&self, result: &RetrievalResult, budget: usize) -> AssembledContext {
        let ranked = RetrievalResult::ranked(result.chunks.clone());
        let mut context = AssembledContext::default();
        let mut accepted_words: Vec<HashSet<String>> = Vec::new();
        let mut size = 0;

        for candidate in ranked.chunks {
            if size >= budget {
                break;
            }
            let len = candidate.chunk.char_len();
            if size + len > budget {
                debug!(chunk.id = %candidate.chunk.id, len, remaining = budget - size, "chunk exceeds context budget");
                continue;
            }
            let words = word_set(&candidate.chunk.text);
            if accepted_words.iter().any(|seen| jaccard(seen, &words) > self.dedup_threshold) {
                debug!(chunk.id = %candidate.chunk.id, "skipping near-duplicate chunk");
                continue;
            }
            size += len;
            accepted_words.push(words);
            context.chunks.push(candidate);
        }

        debug!(selected = context.len(), size, budget, "assembled context");
        context
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::{Chunk, ScoredChunk};

    fn result(items: &[(&str, &str, f32)]) -> RetrievalResult {
        RetrievalResult::ranked(
            items
                .iter()
                .map(|(id, text, score)| ScoredChunk {
                    chunk: Chunk::from_record(id.to_string(), text.to_string(), HashMap::new()),
                    score: *score,
                })
                .collect(),
        )
    }

    fn ids(context: &AssembledContext) -> Vec<&str> {
        context.chunks.iter().map(|c| c.chunk.id.as_str()).collect()
    }

    #[test]
    fn overlap_of_identical_and_disjoint_texts() {
        assert_eq!(word_overlap("The sky is blue", "the SKY is blue!"), 1.0);
        assert_eq!(word_overlap("red green", "blue yellow"), 0.0);
        assert_eq!(word_overlap("", ""), 1.0);
    }

    #[test]
    fn empty_result_gives_empty_context() {
        let context = ContextAssembler::new(0.8).assemble(&RetrievalResult::default(), 100);
        assert!(context.is_empty());
        assert_eq!(context.size(), 0);
    }

    #[test]
    fn near_duplicates_are_dropped() {
        let input = result(&[
            ("a", "the sky is blue today", 0.9),
            ("b", "the sky is blue today!", 0.8),
            ("c", "water boils at 100 degrees", 0.7),
        ]);
        let context = ContextAssembler::new(0.8).assemble(&input, 1_000);
        assert_eq!(ids(&context), ["a", "c"]);
    }

    #[test]
    fn oversized_chunk_is_skipped_but_later_ones_fit() {
        let input = result(&[
            ("a", "0123456789", 0.9),
            ("b", "this text is far too long to fit", 0.8),
            ("c", "short", 0.7),
        ]);
        let context = ContextAssembler::new(1.0).assemble(&input, 16);
        assert_eq!(ids(&context), ["a", "c"]);
        assert_eq!(context.size(), 15);
    }
}
