//! Stdio connector speaking newline-delimited JSON-RPC 2.0.
//!
//! Launches the server process described by a [`StdioAddress`] and drives
//! the `initialize`, `notifications/initialized`, `tools/list`, and
//! `tools/call` methods over its stdin and stdout. Requests on one session
//! are serialized.

use crate::tool_protocol::domain::{ServerAddress, StdioAddress, ToolCallResult, ToolSchema};
use crate::tool_protocol::ports::{SessionError, SessionResult, ToolConnector, ToolSession};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

const JSONRPC_VERSION: &str = "2.0";

/// Launches stdio tool servers.
#[derive(Debug, Clone, Default)]
pub struct StdioConnector {
    client_name: String,
}

impl StdioConnector {
    /// Creates a connector that identifies itself as `client_name`.
    #[must_use]
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn spawn(address: &StdioAddress) -> SessionResult<Child> {
        let mut command = Command::new(address.command());
        command
            .args(address.args())
            .envs(address.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(directory) = address.working_directory() {
            command.current_dir(directory);
        }
        command.spawn().map_err(SessionError::transport)
    }
}

#[async_trait]
impl ToolConnector for StdioConnector {
    fn supports(&self, address: &ServerAddress) -> bool {
        matches!(address, ServerAddress::Stdio(_))
    }

    async fn open(&self, address: &ServerAddress) -> SessionResult<Arc<dyn ToolSession>> {
        let ServerAddress::Stdio(stdio) = address else {
            return Err(SessionError::Unsupported(address.to_string()));
        };
        let mut child = Self::spawn(stdio)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Protocol("child stdin unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Protocol("child stdout unavailable".to_owned()))?;
        tracing::debug!(command = stdio.command(), "tool server process started");

        let client_name = if self.client_name.is_empty() {
            env!("CARGO_PKG_NAME").to_owned()
        } else {
            self.client_name.clone()
        };
        Ok(Arc::new(StdioSession {
            channel: Mutex::new(Channel {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            client_name,
        }))
    }
}

struct Channel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

struct StdioSession {
    channel: Mutex<Channel>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    client_name: String,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<Value>,
    result: Option<Value>,
    error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<WireTool>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    name: String,
    description: Option<String>,
    #[serde(default)]
    input_schema: Value,
    output_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Value,
    structured_content: Option<Value>,
    #[serde(default)]
    is_error: bool,
}

impl StdioSession {
    async fn write_line(channel: &mut Channel, message: &impl Serialize) -> SessionResult<()> {
        let mut line = serde_json::to_vec(message)
            .map_err(|err| SessionError::Protocol(err.to_string()))?;
        line.push(b'\n');
        channel
            .stdin
            .write_all(&line)
            .await
            .map_err(SessionError::transport)?;
        channel.stdin.flush().await.map_err(SessionError::transport)
    }

    async fn request<T>(&self, method: &str, params: Value) -> SessionResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut channel = self.channel.lock().await;
        Self::write_line(
            &mut channel,
            &Request {
                jsonrpc: JSONRPC_VERSION,
                id,
                method,
                params,
            },
        )
        .await?;

        loop {
            let line = channel
                .stdout
                .next_line()
                .await
                .map_err(SessionError::transport)?
                .ok_or_else(|| {
                    SessionError::transport(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "tool server closed its output",
                    ))
                })?;
            if line.trim().is_empty() {
                continue;
            }
            let response: Response = serde_json::from_str(&line)
                .map_err(|err| SessionError::Protocol(err.to_string()))?;
            // Server-initiated requests and notifications carry no matching id.
            if response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(SessionError::Rejected {
                    code: error.code,
                    message: error.message,
                });
            }
            let result = response
                .result
                .ok_or_else(|| SessionError::Protocol(format!("{method}: empty result")))?;
            return serde_json::from_value(result)
                .map_err(|err| SessionError::Protocol(format!("{method}: {err}")));
        }
    }

    async fn notify(&self, method: &str) -> SessionResult<()> {
        let mut channel = self.channel.lock().await;
        Self::write_line(
            &mut channel,
            &Notification {
                jsonrpc: JSONRPC_VERSION,
                method,
            },
        )
        .await
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn initialize(&self, supported_versions: &[String]) -> SessionResult<String> {
        let offered = supported_versions
            .first()
            .ok_or_else(|| SessionError::Protocol("no protocol version to offer".to_owned()))?;
        let result: InitializeResult = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": offered,
                    "capabilities": {},
                    "clientInfo": {
                        "name": self.client_name,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        self.notify("notifications/initialized").await?;
        Ok(result.protocol_version)
    }

    async fn list_tools(&self) -> SessionResult<Vec<ToolSchema>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map_or_else(|| json!({}), |value| json!({ "cursor": value }));
            let page: ListToolsResult = self.request("tools/list", params).await?;
            for wire in page.tools {
                let mut schema = ToolSchema::new(wire.name, wire.input_schema)
                    .map_err(|err| SessionError::Protocol(err.to_string()))?;
                if let Some(description) = wire.description {
                    schema = schema.with_description(description);
                }
                if let Some(output_schema) = wire.output_schema {
                    schema = schema.with_output_schema(output_schema);
                }
                tools.push(schema);
            }
            let Some(next) = page.next_cursor.filter(|value| !value.is_empty()) else {
                return Ok(tools);
            };
            cursor = Some(next);
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> SessionResult<ToolCallResult> {
        let result: CallToolResult = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(ToolCallResult {
            content: result.content,
            structured_content: result.structured_content,
            is_error: result.is_error,
        })
    }

    async fn close(&self) -> SessionResult<()> {
        let mut child = self.child.lock().await;
        match child.start_kill() {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => return Ok(()),
            Err(err) => return Err(SessionError::transport(err)),
        }
        child.wait().await.map_err(SessionError::transport)?;
        Ok(())
    }
}
