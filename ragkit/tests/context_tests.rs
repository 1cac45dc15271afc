//! Property tests for context assembly.

use std::collections::HashMap;

use proptest::prelude::*;
use ragkit::{Chunk, ContextAssembler, RetrievalResult, ScoredChunk, word_overlap};

const WORDS: [&str; 8] = ["sky", "blue", "water", "boils", "rust", "safe", "paris", "france"];

fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(proptest::sample::select(WORDS.to_vec()), 1..8).prop_map(|w| w.join(" "))
}

fn arb_result() -> impl Strategy<Value = RetrievalResult> {
    proptest::collection::vec((arb_text(), 0.0f32..1.0), 0..12).prop_map(|items| {
        RetrievalResult::ranked(
            items
                .into_iter()
                .enumerate()
                .map(|(i, (text, score))| ScoredChunk {
                    chunk: Chunk::from_record(format!("doc_{i}"), text, HashMap::new()),
                    score,
                })
                .collect(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The selected chunks never exceed the budget.
    #[test]
    fn context_fits_the_budget(result in arb_result(), budget in 1usize..120) {
        let context = ContextAssembler::new(0.8).assemble(&result, budget);
        prop_assert!(context.size() <= budget);
    }

    /// No two selected chunks are near-duplicates.
    #[test]
    fn selected_chunks_are_not_near_duplicates(result in arb_result(), threshold in 0.1f32..1.0) {
        let context = ContextAssembler::new(threshold).assemble(&result, 10_000);
        for (i, a) in context.chunks.iter().enumerate() {
            for b in &context.chunks[i + 1..] {
                prop_assert!(word_overlap(&a.chunk.text, &b.chunk.text) <= threshold);
            }
        }
    }

    /// Selection keeps retrieval order.
    #[test]
    fn selection_preserves_rank_order(result in arb_result(), budget in 1usize..200) {
        let context = ContextAssembler::new(0.9).assemble(&result, budget);
        for window in context.chunks.windows(2) {
            prop_assert!(window[0].score >= window[1].score);
        }
    }
}
