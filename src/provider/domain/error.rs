//! Error types for provider domain validation.

use thiserror::Error;

/// Errors returned while constructing provider domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderDomainError {
    /// A backend identifier is empty after trimming.
    #[error("backend identifier must not be empty")]
    EmptyBackendId,

    /// The model name is empty after trimming.
    #[error("model name must not be empty")]
    EmptyModel,

    /// A request carries no messages.
    #[error("generation request must contain at least one message")]
    EmptyMessages,

    /// A completion request carries an empty prompt.
    #[error("completion prompt must not be empty")]
    EmptyPrompt,

    /// An embedding request carries no texts.
    #[error("embedding request must contain at least one text")]
    EmptyTexts,

    /// A sampling parameter is out of range.
    #[error("parameter '{name}' out of range: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rejected value, formatted.
        value: String,
    },
}
