//! Discovered tool schemas and call results.

use super::ToolProtocolDomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    name: String,
    description: Option<String>,
    input_schema: Value,
    output_schema: Option<Value>,
}

impl ToolSchema {
    /// Creates a tool schema.
    ///
    /// # Errors
    ///
    /// Returns [`ToolProtocolDomainError::EmptyToolName`] when `name` is
    /// empty after trimming.
    pub fn new(name: impl Into<String>, input_schema: Value) -> Result<Self, ToolProtocolDomainError> {
        let normalized_name = name.into().trim().to_owned();
        if normalized_name.is_empty() {
            return Err(ToolProtocolDomainError::EmptyToolName);
        }

        Ok(Self {
            name: normalized_name,
            description: None,
            input_schema,
            output_schema: None,
        })
    }

    /// Sets a description. Blank descriptions are ignored.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let normalized = description.into().trim().to_owned();
        self.description = (!normalized.is_empty()).then_some(normalized);
        self
    }

    /// Sets an output schema.
    #[must_use]
    pub fn with_output_schema(mut self, output_schema: Value) -> Self {
        self.output_schema = Some(output_schema);
        self
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the input schema.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Returns the output schema, if any.
    #[must_use]
    pub const fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }
}

/// Result of a tool call as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Content blocks returned by the tool.
    pub content: Value,
    /// Structured output, when the tool declares an output schema.
    pub structured_content: Option<Value>,
    /// Whether the tool reported a failure of its own.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful result.
    #[must_use]
    pub const fn success(content: Value) -> Self {
        Self {
            content,
            structured_content: None,
            is_error: false,
        }
    }

    /// Creates a tool-declared failure.
    #[must_use]
    pub const fn failure(content: Value) -> Self {
        Self {
            content,
            structured_content: None,
            is_error: true,
        }
    }

    /// Returns the first text block, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_array()
            .and_then(|blocks| blocks.iter().find_map(|block| block.get("text")))
            .and_then(Value::as_str)
            .or_else(|| self.content.as_str())
    }
}
