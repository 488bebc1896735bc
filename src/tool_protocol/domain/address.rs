//! Tool server address value objects.

use super::ToolProtocolDomainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A tool server launched as a local process and spoken to over stdio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioAddress {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_directory: Option<String>,
}

impl StdioAddress {
    /// Creates a stdio address.
    ///
    /// # Errors
    ///
    /// Returns [`ToolProtocolDomainError::EmptyStdioCommand`] when `command`
    /// is empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, ToolProtocolDomainError> {
        let normalized_command = command.into().trim().to_owned();
        if normalized_command.is_empty() {
            return Err(ToolProtocolDomainError::EmptyStdioCommand);
        }

        Ok(Self {
            command: normalized_command,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
        })
    }

    /// Sets command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Sets an explicit working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ToolProtocolDomainError::EmptyWorkingDirectory`] when the
    /// value is empty after trimming.
    pub fn with_working_directory(
        mut self,
        value: impl Into<String>,
    ) -> Result<Self, ToolProtocolDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(ToolProtocolDomainError::EmptyWorkingDirectory);
        }

        self.working_directory = Some(normalized);
        Ok(self)
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the optional working directory.
    #[must_use]
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }
}

/// A tool server reachable over HTTP.
///
/// The address validates and persists like any other, but only connectors
/// that report support for it can open it. The stdio connector does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpAddress {
    endpoint: String,
}

impl HttpAddress {
    /// Creates an HTTP address.
    ///
    /// # Errors
    ///
    /// Returns [`ToolProtocolDomainError`] when `endpoint` is empty or does
    /// not start with `http://` or `https://`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ToolProtocolDomainError> {
        let normalized_endpoint = endpoint.into().trim().to_owned();
        if normalized_endpoint.is_empty() {
            return Err(ToolProtocolDomainError::EmptyHttpEndpoint);
        }

        let has_valid_prefix = normalized_endpoint.starts_with("http://")
            || normalized_endpoint.starts_with("https://");
        if !has_valid_prefix {
            return Err(ToolProtocolDomainError::InvalidHttpEndpoint(
                normalized_endpoint,
            ));
        }

        Ok(Self {
            endpoint: normalized_endpoint,
        })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Where a tool server lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "config")]
pub enum ServerAddress {
    /// Local process over stdio.
    Stdio(StdioAddress),
    /// Remote endpoint over HTTP. Stored configuration only unless the
    /// connector supports it.
    Http(HttpAddress),
}

impl ServerAddress {
    /// Creates a stdio address.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioAddress::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, ToolProtocolDomainError> {
        Ok(Self::Stdio(StdioAddress::new(command)?))
    }

    /// Creates an HTTP address.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpAddress::new`].
    pub fn http(endpoint: impl Into<String>) -> Result<Self, ToolProtocolDomainError> {
        Ok(Self::Http(HttpAddress::new(endpoint)?))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio(address) => write!(formatter, "stdio:{}", address.command()),
            Self::Http(address) => formatter.write_str(address.endpoint()),
        }
    }
}
