//! Domain types for model requests, responses, and call records.

mod call;
mod completion;
mod error;
mod ids;
mod message;
mod request;
mod response;

pub use call::{CallOutcome, ProviderCall};
pub use completion::{CompletionRequest, EmbeddingRequest, Embeddings};
pub use error::ProviderDomainError;
pub use ids::BackendId;
pub use message::{ChatMessage, ChatRole};
pub use request::{GenerateRequest, ModelParameters};
pub use response::{ModelResponse, StreamChunk, TokenUsage};
