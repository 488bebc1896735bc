//! Diagnostic record of one logical provider request.

use super::{BackendId, CompletionRequest, EmbeddingRequest, GenerateRequest, ModelParameters};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The backend answered.
    Success,
    /// Transient failures exhausted the retry ceiling.
    RetryableError,
    /// The backend rejected the request.
    FatalError,
}

/// One logical request to one backend, across its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCall {
    backend: BackendId,
    model: String,
    parameters: ModelParameters,
    streaming: bool,
    attempts: u32,
    outcome: Option<CallOutcome>,
}

impl ProviderCall {
    /// Starts a record for `request` against `backend`.
    #[must_use]
    pub fn new(backend: BackendId, request: &GenerateRequest) -> Self {
        Self::start(
            backend,
            request.model(),
            request.parameters().clone(),
            request.is_streaming(),
        )
    }

    /// Starts a record for a prompt completion.
    #[must_use]
    pub fn for_completion(backend: BackendId, request: &CompletionRequest) -> Self {
        Self::start(
            backend,
            request.model(),
            request.parameters().clone(),
            request.is_streaming(),
        )
    }

    /// Starts a record for an embedding request.
    #[must_use]
    pub fn for_embedding(backend: BackendId, request: &EmbeddingRequest) -> Self {
        Self::start(backend, request.model(), ModelParameters::default(), false)
    }

    fn start(backend: BackendId, model: &str, parameters: ModelParameters, streaming: bool) -> Self {
        Self {
            backend,
            model: model.to_owned(),
            parameters,
            streaming,
            attempts: 0,
            outcome: None,
        }
    }

    /// Counts one more attempt.
    pub const fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Records the terminal outcome.
    pub const fn finish(&mut self, outcome: CallOutcome) {
        self.outcome = Some(outcome);
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &BackendId {
        &self.backend
    }

    /// Returns the model requested.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the sampling parameters.
    #[must_use]
    pub const fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    /// Returns whether the call streamed.
    #[must_use]
    pub const fn streaming(&self) -> bool {
        self.streaming
    }

    /// Returns the attempts made, including the first.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the terminal outcome, once known.
    #[must_use]
    pub const fn outcome(&self) -> Option<CallOutcome> {
        self.outcome
    }
}
