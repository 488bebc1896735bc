//! Prompt completion and embedding requests.

use super::{ModelParameters, ProviderDomainError};
use serde::{Deserialize, Serialize};

fn normalize_model(model: impl Into<String>) -> Result<String, ProviderDomainError> {
    let normalized = model.into().trim().to_owned();
    if normalized.is_empty() {
        return Err(ProviderDomainError::EmptyModel);
    }
    Ok(normalized)
}

/// A raw prompt continuation request, without chat roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    model: String,
    prompt: String,
    parameters: ModelParameters,
    stream: bool,
}

impl CompletionRequest {
    /// Creates a non-streaming completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderDomainError::EmptyModel`] when the model is blank
    /// and [`ProviderDomainError::EmptyPrompt`] when the prompt is empty.
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Self, ProviderDomainError> {
        let normalized_model = normalize_model(model)?;
        let text = prompt.into();
        if text.is_empty() {
            return Err(ProviderDomainError::EmptyPrompt);
        }
        Ok(Self {
            model: normalized_model,
            prompt: text,
            parameters: ModelParameters::default(),
            stream: false,
        })
    }

    /// Sets sampling parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderDomainError::InvalidParameter`] for out-of-range
    /// values.
    pub fn with_parameters(
        mut self,
        parameters: ModelParameters,
    ) -> Result<Self, ProviderDomainError> {
        parameters.validate()?;
        self.parameters = parameters;
        Ok(self)
    }

    /// Selects streaming or complete delivery.
    #[must_use]
    pub const fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the prompt text.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Returns sampling parameters.
    #[must_use]
    pub const fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    /// Returns whether the response is streamed.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.stream
    }
}

/// A request for one embedding vector per input text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    model: String,
    texts: Vec<String>,
}

impl EmbeddingRequest {
    /// Creates an embedding request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderDomainError::EmptyModel`] when the model is blank
    /// and [`ProviderDomainError::EmptyTexts`] when there is nothing to
    /// embed.
    pub fn new<I, S>(model: impl Into<String>, texts: I) -> Result<Self, ProviderDomainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let normalized_model = normalize_model(model)?;
        let inputs: Vec<String> = texts.into_iter().map(Into::into).collect();
        if inputs.is_empty() {
            return Err(ProviderDomainError::EmptyTexts);
        }
        Ok(Self {
            model: normalized_model,
            texts: inputs,
        })
    }

    /// Returns the embedding model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the texts in request order.
    #[must_use]
    pub fn texts(&self) -> &[String] {
        &self.texts
    }
}

/// Embedding vectors, index-aligned with the request's texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embeddings {
    /// Model that produced the vectors.
    pub model: String,
    /// One vector per input text.
    pub vectors: Vec<Vec<f32>>,
}
