//! Text-generation abstraction for Kiln.
//!
//! The training core never talks to a language model directly. When a caller
//! asks for a narrative analysis of a finished job, the analyzer hands a
//! prompt to whatever implements [`TextGenerator`] and falls back to its own
//! deterministic summary if that fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when asking a collaborator for text.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationError {
    /// The collaborator is not configured (e.g. missing API key).
    #[error("Generator not configured: {0}")]
    NotConfigured(String),

    /// The request could not be delivered (network issues, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The collaborator answered with an error (rate limiting, invalid input).
    #[error("Response Error: {0}")]
    ResponseError(String),

    /// The collaborator answered, but with nothing usable.
    #[error("Empty response from generator")]
    EmptyResponse,

    /// Other unexpected errors.
    #[error("Other Generation Error: {0}")]
    Other(String),
}

/// Parameters for controlling generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParameters {
    /// Sampling temperature, between 0 and 2.
    pub temperature: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self { temperature: Some(0.4), max_tokens: Some(1024) }
    }
}

/// The response from a text generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedText {
    /// The generated content.
    pub content: String,

    /// Optional: the ID of the model that produced the content.
    pub model_id: Option<String>,
}

/// A collaborator able to turn a prompt into free-form text.
///
/// Implementations must be `Send + Sync` so one instance can serve analyses
/// for many jobs concurrently.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates a text completion for `prompt`.
    ///
    /// # Errors
    /// Returns a `GenerationError` if generation fails.
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<GenerationParameters>,
    ) -> Result<GeneratedText, GenerationError>;

    /// Returns the ID of the backing model.
    fn model_id(&self) -> &str;
}

/// A generator that replays a fixed answer. Useful for tests and demos.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    answer: Result<String, GenerationError>,
}

impl StaticGenerator {
    /// Always answers with `content`.
    #[must_use]
    pub fn answering(content: impl Into<String>) -> Self {
        Self { answer: Ok(content.into()) }
    }

    /// Always fails with `error`.
    #[must_use]
    pub fn failing(error: GenerationError) -> Self {
        Self { answer: Err(error) }
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    async fn generate_text(
        &self,
        _prompt: &str,
        _parameters: Option<GenerationParameters>,
    ) -> Result<GeneratedText, GenerationError> {
        let content = self.answer.clone()?;
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(GeneratedText { content, model_id: Some(self.model_id().to_string()) })
    }

    fn model_id(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_generator_answers() {
        let generator = StaticGenerator::answering("Summary\nAll good");
        let out = generator.generate_text("prompt", None).await.unwrap();
        assert_eq!(out.content, "Summary\nAll good");
        assert_eq!(out.model_id.as_deref(), Some("static"));
    }

    #[tokio::test]
    async fn test_static_generator_rejects_blank_answer() {
        let generator = StaticGenerator::answering("   ");
        let err = generator.generate_text("prompt", None).await.unwrap_err();
        assert_eq!(err, GenerationError::EmptyResponse);
    }

    #[tokio::test]
    async fn test_static_generator_failing() {
        let generator = StaticGenerator::failing(GenerationError::NotConfigured("no key".into()));
        let err = generator.generate_text("prompt", None).await.unwrap_err();
        assert!(err.to_string().contains("no key"));
    }

    #[test]
    fn test_default_parameters() {
        let params = GenerationParameters::default();
        assert_eq!(params.max_tokens, Some(1024));
    }
}
