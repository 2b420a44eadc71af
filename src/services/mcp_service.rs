use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::{TransportConfig, MAX_BATCH_LIMIT};
use crate::error::TransportError;
use crate::models::command::{Command, Params, ToolKind};

const SESSION_HEADER: &str = "mcp-session-id";
const CLIENT_NAME: &str = "scenebatch";
const BODY_PREVIEW_CHARS: usize = 300;

/// The two remote entry points of the scene service.
#[async_trait]
pub trait SceneTransport: Send + Sync {
    /// Runs up to [`MAX_BATCH_LIMIT`] commands in one remote call and returns
    /// the raw response.
    async fn batch_execute(&self, commands: &[Command]) -> Result<Value, TransportError>;

    /// Runs a single tool call and returns the raw response.
    async fn call(&self, tool: ToolKind, params: &Params) -> Result<Value, TransportError>;

    async fn ping(&self) -> Result<(), TransportError>;
}

/// JSON-RPC over streamable HTTP, as spoken by the editor's MCP bridge.
pub struct McpHttpTransport {
    client: Client,
    url: String,
    timeout: Duration,
    protocol_version: String,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    initialized: tokio::sync::Mutex<bool>,
}

impl McpHttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.server_url.clone(),
            timeout: config.timeout(),
            protocol_version: config.protocol_version.clone(),
            next_id: AtomicU64::new(0),
            session_id: Mutex::new(None),
            initialized: tokio::sync::Mutex::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn current_session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session(&self, session: Option<String>) {
        *self
            .session_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    fn map_send_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Unreachable {
                url: self.url.clone(),
                message: err.to_string(),
            }
        } else {
            TransportError::Protocol(err.to_string())
        }
    }

    async fn post(&self, payload: &Value) -> Result<String, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream, application/json")
            .json(payload);
        if let Some(session) = self.current_session() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.set_session(Some(session.to_string()));
        }

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body.chars().take(BODY_PREVIEW_CHARS).collect(),
            });
        }
        Ok(body)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Vec<Value>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let started = Instant::now();
        let body = match self.post(&payload).await {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(id, method, elapsed_ms = started.elapsed().as_millis() as u64, error = %err, "request failed");
                return Err(err);
            }
        };
        let messages = parse_body(&body);
        tracing::debug!(
            id,
            method,
            messages = messages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response received"
        );
        Ok(messages)
    }

    async fn notify(&self, method: &str) {
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": {}});
        if let Err(err) = self.post(&payload).await {
            tracing::debug!(method, error = %err, "notification not delivered");
        }
    }

    async fn ensure_initialized(&self) -> Result<(), TransportError> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        self.request(
            "initialize",
            json!({
                "protocolVersion": self.protocol_version,
                "capabilities": {},
                "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
            }),
        )
        .await?;
        self.notify("notifications/initialized").await;
        *initialized = true;
        tracing::info!(session = ?self.current_session(), "scene service session initialized");
        Ok(())
    }

    async fn reset_session(&self) {
        *self.initialized.lock().await = false;
        self.set_session(None);
    }

    async fn tool_call(&self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        self.ensure_initialized().await?;
        let params = json!({"name": name, "arguments": arguments});

        let messages = match self.request("tools/call", params.clone()).await {
            Err(TransportError::Http { status: 404, .. }) => {
                tracing::warn!("scene service session expired, re-initializing");
                self.reset_session().await;
                self.ensure_initialized().await?;
                self.request("tools/call", params).await?
            }
            other => other?,
        };

        messages
            .into_iter()
            .rev()
            .find(Value::is_object)
            .ok_or_else(|| TransportError::Protocol("no response from scene service".to_string()))
    }
}

#[async_trait]
impl SceneTransport for McpHttpTransport {
    async fn batch_execute(&self, commands: &[Command]) -> Result<Value, TransportError> {
        if commands.len() > MAX_BATCH_LIMIT {
            return Err(TransportError::Protocol(format!(
                "batch_execute supports at most {MAX_BATCH_LIMIT} commands, got {}",
                commands.len()
            )));
        }
        let commands =
            serde_json::to_value(commands).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.tool_call("batch_execute", json!({"commands": commands}))
            .await
    }

    async fn call(&self, tool: ToolKind, params: &Params) -> Result<Value, TransportError> {
        self.tool_call(tool.as_str(), Value::Object(params.clone()))
            .await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.request("ping", json!({})).await.map(|_| ())
    }
}

/// Splits a response body into JSON-RPC messages. Event streams carry one
/// message per `data:` line; `data: null` heartbeats are dropped.
pub fn parse_body(body: &str) -> Vec<Value> {
    let data_lines: Vec<&str> = body
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .collect();

    if data_lines.is_empty() {
        return serde_json::from_str::<Value>(body.trim())
            .ok()
            .filter(|v| !v.is_null())
            .into_iter()
            .collect();
    }

    data_lines
        .into_iter()
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .filter(|v| !v.is_null())
        .collect()
}
