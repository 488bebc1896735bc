//! Contract every inference backend satisfies.

use crate::provider::domain::{
    BackendId, CompletionRequest, EmbeddingRequest, GenerateRequest, ModelResponse, StreamChunk,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Raw chunk stream produced by a backend.
pub type ChunkStream = BoxStream<'static, BackendResult<StreamChunk>>;

/// Errors reported by a backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend did not answer in time.
    #[error("backend timed out: {0}")]
    Timeout(String),

    /// The backend failed internally.
    #[error("backend server error ({status}): {message}")]
    Server {
        /// Status code reported by the backend.
        status: u16,
        /// Backend-supplied message.
        message: String,
    },

    /// The backend is throttling requests.
    #[error("backend rate limited: {0}")]
    RateLimited(String),

    /// The backend does not serve the requested model.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// The backend refused the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend answered with output that breaks the contract.
    #[error("malformed backend output: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Returns whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited(_)
        )
    }
}

/// Health summary for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    /// Backend checked.
    pub backend: BackendId,
    /// Whether it answered.
    pub healthy: bool,
    /// Models it serves, when healthy.
    pub models: usize,
    /// Failure description, when unhealthy.
    pub error: Option<String>,
}

/// An inference backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Returns the identifier the backend is registered under.
    fn id(&self) -> &BackendId;

    /// Generates a complete response.
    async fn complete(&self, request: &GenerateRequest) -> BackendResult<ModelResponse>;

    /// Opens a chunk stream. Errors before the first chunk are returned here;
    /// later ones arrive on the stream.
    async fn stream(&self, request: &GenerateRequest) -> BackendResult<ChunkStream>;

    /// Continues a raw prompt and returns the whole text.
    async fn complete_prompt(&self, request: &CompletionRequest) -> BackendResult<ModelResponse>;

    /// Continues a raw prompt as a chunk stream, with the same error split
    /// as [`Self::stream`].
    async fn stream_prompt(&self, request: &CompletionRequest) -> BackendResult<ChunkStream>;

    /// Embeds each text, returning vectors in input order.
    async fn embed(&self, request: &EmbeddingRequest) -> BackendResult<Vec<Vec<f32>>>;

    /// Lists the models the backend serves.
    async fn list_models(&self) -> BackendResult<Vec<String>>;

    /// Reports whether the backend is usable.
    async fn health(&self) -> BackendHealth {
        match self.list_models().await {
            Ok(models) => BackendHealth {
                backend: self.id().clone(),
                healthy: true,
                models: models.len(),
                error: None,
            },
            Err(err) => BackendHealth {
                backend: self.id().clone(),
                healthy: false,
                models: 0,
                error: Some(err.to_string()),
            },
        }
    }
}
