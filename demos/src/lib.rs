//! Offline stand-ins used by the demos so they run with zero API keys.
//!
//! Embeddings come from [`ragkit::mock::HashEmbedding`]; this crate adds a
//! language model that answers by quoting the context.

use std::collections::HashSet;

use async_trait::async_trait;
use ragkit::{GenerationRequest, LanguageModel};

// ---------------------------------------------------------------------------
// ExtractiveModel: answers by quoting the best-matching context passage
// ---------------------------------------------------------------------------

/// A [`LanguageModel`] that picks the numbered context passage sharing the
/// most words with the question and returns it with its citation marker.
pub struct ExtractiveModel;

#[async_trait]
impl LanguageModel for ExtractiveModel {
    async fn generate(&self, request: GenerationRequest) -> ragkit::Result<String> {
        let question = request
            .prompt
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("Question: "))
            .unwrap_or_default();
        let question_words: HashSet<String> = words(question).collect();

        let best = request
            .prompt
            .lines()
            .filter_map(passage)
            .map(|(marker, text)| {
                let overlap = words(text).filter(|w| question_words.contains(w)).count();
                (overlap, marker, text)
            })
            .max_by_key(|(overlap, marker, _)| (*overlap, std::cmp::Reverse(*marker)));

        Ok(match best {
            Some((overlap, marker, text)) if overlap > 0 => format!("{} [{marker}]", text.trim()),
            _ => "I could not find that in the provided context.".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "extractive-demo"
    }
}

/// Split a `[n] text` context line.
fn passage(line: &str) -> Option<(usize, &str)> {
    let rest = line.strip_prefix('[')?;
    let (marker, text) = rest.split_once(']')?;
    Some((marker.parse().ok()?, text))
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2).map(str::to_lowercase)
}
