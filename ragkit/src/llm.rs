//! Language model seam used by the generation step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

/// A text generation backend.
///
/// Implementations perform exactly one remote call per
/// [`generate`](LanguageModel::generate); deadlines and retries are applied
/// by the [`GenerationOrchestrator`](crate::GenerationOrchestrator).
/// Failures should be reported as [`RagError::GenerationService`]
/// with a [`ServiceErrorKind`](crate::ServiceErrorKind) so transient ones can
/// be retried.
///
/// [`RagError::GenerationService`]: crate::RagError::GenerationService
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate text for `request`.
    async fn generate(&self, request: GenerationRequest) -> Result<String>;

    /// Identifier of the model, reported on every [`Answer`](crate::Answer).
    fn model_name(&self) -> &str;
}
