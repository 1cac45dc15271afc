//! Prompt construction, answer generation and citation extraction.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{GenerationSettings, NoContextPolicy};
use crate::document::{AssembledContext, Answer, Citation, Grounding};
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::llm::{GenerationRequest, LanguageModel};
use crate::retry::{with_retry, with_timeout};

const NO_CONTEXT_INSTRUCTIONS: &str = "No supporting documents were found for this question. \
    Answer from general knowledge and state clearly that the answer is not based on the \
    document collection.";

/// Turns a query and its assembled context into a cited [`Answer`].
///
/// The only component that creates answers. Stateless per call.
pub struct GenerationOrchestrator {
    llm: Arc<dyn LanguageModel>,
    settings: GenerationSettings,
    marker: Regex,
    marker_list: Regex,
}

impl GenerationOrchestrator {
    /// Create an orchestrator calling `llm` with `settings`.
    ///
    /// `settings.retry` only shapes the backoff: a transient failure is
    /// retried exactly once whatever its attempt budget says.
    pub fn new(llm: Arc<dyn LanguageModel>, mut settings: GenerationSettings) -> Result<Self> {
        settings.retry = settings.retry.with_max_attempts(2);
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| RagError::Configuration(format!("citation pattern: {e}")))
        };
        Ok(Self {
            llm,
            settings,
            marker: compile(r"\[([^\[\]\n]*)\]")?,
            marker_list: compile(r"^\s*\d+(?:\s*,\s*\d+)*\s*$")?,
        })
    }

    /// The prompt sent for `query` with `context`.
    ///
    /// Deterministic: system instructions, the context chunks numbered
    /// `[1]`, `[2]`, ... in selection order, then the question.
    pub fn build_prompt(&self, query: &str, context: &AssembledContext) -> String {
        let mut prompt = String::new();
        if context.is_empty() {
            let _ = writeln!(prompt, "{NO_CONTEXT_INSTRUCTIONS}\n");
        } else {
            let _ = writeln!(prompt, "{}\n\nContext:", self.settings.system_prompt);
            for (i, scored) in context.chunks.iter().enumerate() {
                let _ = writeln!(prompt, "[{}] {}", i + 1, scored.chunk.text.trim());
            }
            prompt.push('\n');
        }
        let _ = write!(prompt, "Question: {}\nAnswer:", query.trim());
        prompt
    }

    /// Answer `query` from `context`.
    ///
    /// With an empty context the configured [`NoContextPolicy`] decides:
    /// `Refuse` returns the fallback message without calling the model,
    /// `AnswerWithoutContext` asks the model and flags the answer.
    ///
    /// # Errors
    ///
    /// [`RagError::GenerationService`] if the model fails, after one retry
    /// for transient failures.
    pub async fn generate(&self, query: &str, context: &AssembledContext) -> Result<Answer> {
        if context.is_empty() && self.settings.no_context_policy == NoContextPolicy::Refuse {
            info!("no relevant context, returning fallback answer");
            return Ok(Answer {
                text: self.settings.fallback_message.clone(),
                citations: Vec::new(),
                grounding: Grounding::NoContextRefused,
                model: String::new(),
                retrieved_context: Vec::new(),
            });
        }

        let request = GenerationRequest {
            prompt: self.build_prompt(query, context),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };
        let model = self.llm.model_name();
        let timeout = self.settings.request_timeout();
        debug!(model, prompt_len = request.prompt.len(), context_chunks = context.len(), "generating answer");

        let text = with_retry(&self.settings.retry, "generate", || {
            with_timeout(timeout, self.llm.generate(request.clone()), || {
                RagError::generation(model, ServiceErrorKind::Timeout, "generation timed out")
            })
        })
        .await
        .inspect_err(|e| error!(model, error = %e, "generation failed"))?;

        let text = text.trim().to_string();
        let (citations, grounding) = if context.is_empty() {
            (Vec::new(), Grounding::NoSupportingContext)
        } else {
            (self.citations(&text, context), Grounding::Grounded)
        };

        Ok(Answer {
            text,
            citations,
            grounding,
            model: model.to_string(),
            retrieved_context: context.chunks.iter().map(|c| c.chunk.text.clone()).collect(),
        })
    }

    /// Citations referenced by `[n]` / `[n, m]` markers in `text`, in order of
    /// first appearance.
    ///
    /// Brackets that do not start with a digit are prose and ignored. A
    /// malformed or out-of-range marker makes the whole answer uncited.
    pub fn citations(&self, text: &str, context: &AssembledContext) -> Vec<Citation> {
        let mut seen = HashSet::new();
        let mut markers = Vec::new();

        for capture in self.marker.captures_iter(text) {
            let inner = capture.get(1).map_or("", |m| m.as_str());
            if !inner.trim_start().starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            if !self.marker_list.is_match(inner) {
                warn!(marker = inner, "unparseable citation marker, dropping citations");
                return Vec::new();
            }
            for number in inner.split(',') {
                let marker = match number.trim().parse::<usize>() {
                    Ok(n) if (1..=context.len()).contains(&n) => n,
                    _ => {
                        warn!(marker = number.trim(), available = context.len(), "citation marker out of range, dropping citations");
                        return Vec::new();
                    }
                };
                if seen.insert(marker) {
                    markers.push(marker);
                }
            }
        }

        markers
            .into_iter()
            .map(|marker| {
                let chunk = &context.chunks[marker - 1].chunk;
                Citation {
                    marker,
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    title: chunk.title().map(str::to_string),
                    uri: chunk.uri().map(str::to_string),
                }
            })
            .collect()
    }
}
