//! Generation requests and sampling parameters.

use super::{ChatMessage, ProviderDomainError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sampling parameters. Unset values use the backend's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Sampling temperature in `0.0..=2.0`.
    pub temperature: Option<f32>,
    /// Nucleus sampling mass in `0.0..=1.0`.
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff.
    pub top_k: Option<u32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sequences that end generation.
    pub stop: Vec<String>,
    /// Seed for reproducible sampling.
    pub seed: Option<u64>,
    /// Backend-specific extras passed through untouched.
    pub extra: BTreeMap<String, Value>,
}

impl ModelParameters {
    /// Sets the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets nucleus sampling.
    #[must_use]
    pub const fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Sets the top-k cutoff.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Sets the generation limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets stop sequences.
    #[must_use]
    pub fn with_stop(mut self, stop: impl IntoIterator<Item = String>) -> Self {
        self.stop = stop.into_iter().collect();
        self
    }

    /// Sets the sampling seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub(super) fn validate(&self) -> Result<(), ProviderDomainError> {
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(ProviderDomainError::InvalidParameter {
                name: "temperature",
                value: temperature.to_string(),
            });
        }
        if let Some(top_p) = self.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(ProviderDomainError::InvalidParameter {
                name: "top_p",
                value: top_p.to_string(),
            });
        }
        if self.max_tokens == Some(0) {
            return Err(ProviderDomainError::InvalidParameter {
                name: "max_tokens",
                value: "0".to_owned(),
            });
        }
        Ok(())
    }
}

/// One logical request to a model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    model: String,
    messages: Vec<ChatMessage>,
    parameters: ModelParameters,
    stream: bool,
}

impl GenerateRequest {
    /// Creates a non-streaming request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderDomainError`] when the model name is blank or there
    /// are no messages.
    pub fn new(
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Result<Self, ProviderDomainError> {
        let normalized_model = model.into().trim().to_owned();
        if normalized_model.is_empty() {
            return Err(ProviderDomainError::EmptyModel);
        }
        if messages.is_empty() {
            return Err(ProviderDomainError::EmptyMessages);
        }
        Ok(Self {
            model: normalized_model,
            messages,
            parameters: ModelParameters::default(),
            stream: false,
        })
    }

    /// Creates a request from a single user prompt.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderDomainError::EmptyModel`] when the model is blank.
    pub fn prompt(
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Self, ProviderDomainError> {
        Self::new(model, vec![ChatMessage::user(prompt)])
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

    /// Returns the conversation.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
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
