//! MCP over streamable HTTP.
//!
//! Each request is a JSON-RPC 2.0 POST. Apps may answer with plain JSON or a
//! single server-sent event whose `data:` line carries the JSON-RPC response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::tools::{CallerContext, ToolCall, ToolError, ToolInfo, ToolProxy, ToolResult};
use crate::types::{AgentId, AppId, RegisteredApp};

pub const PROTOCOL_VERSION: &str = "2025-11-25";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Sessions unused for this long are dropped.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

const SESSION_HEADER: &str = "mcp-session-id";
const LEGACY_SESSION_HEADER: &str = "x-session-id";
const AGENT_ID_HEADER: &str = "x-agent-id";
const METADATA_HEADER: &str = "x-mcp-metadata";

/// Caller headers never forwarded to an app. The session header is set by
/// the proxy itself.
const SKIPPED_HEADERS: [&str; 6] = [
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    SESSION_HEADER,
    LEGACY_SESSION_HEADER,
];

/// Reply to a session-bound request.
enum RpcReply {
    Result(Value),
    SessionExpired,
}

/// A cached session ID and when it was last used.
struct Session {
    id: String,
    last_used: Instant,
}

/// [`ToolProxy`] that talks MCP to the app's `mcp_endpoint`.
///
/// Sessions are keyed by (agent, app), so two agents never share server-side
/// tool state. Sessions idle for longer than the idle TTL are evicted when a
/// new one is opened.
pub struct McpHttpProxy {
    client: reqwest::Client,
    timeout: Duration,
    idle_ttl: Duration,
    sessions: Mutex<HashMap<(AgentId, AppId), Session>>,
    next_id: AtomicU64,
}

impl McpHttpProxy {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            idle_ttl: SESSION_IDLE_TTL,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Number of live (agent, app) sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn request(&self, method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        })
    }

    /// Open a session and return its ID.
    async fn initialize(&self, endpoint: &str, headers: &HeaderMap) -> Result<String, ToolError> {
        let body = self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "thronglets",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        );

        let resp = self
            .client
            .post(endpoint)
            .headers(headers.clone())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::ToolCallFailed(format!("initialize request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(ToolError::ToolCallFailed(format!(
                "failed to initialize MCP session: {}",
                resp.status()
            )));
        }

        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .or_else(|| resp.headers().get(LEGACY_SESSION_HEADER))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ToolError::ToolCallFailed("no session ID in MCP response".into()))?;

        // The initialized notification carries no reply worth reading.
        let notify = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        if let Err(e) = self
            .client
            .post(endpoint)
            .headers(headers.clone())
            .header(SESSION_HEADER, &session)
            .timeout(self.timeout)
            .json(&notify)
            .send()
            .await
        {
            debug!(error = %e, "initialized notification failed");
        }

        debug!(endpoint, session = %session, "MCP session established");
        Ok(session)
    }

    async fn rpc(
        &self,
        endpoint: &str,
        headers: &HeaderMap,
        session: &str,
        method: &str,
        params: Value,
    ) -> Result<RpcReply, ToolError> {
        let resp = self
            .client
            .post(endpoint)
            .headers(headers.clone())
            .header(SESSION_HEADER, session)
            .timeout(self.timeout)
            .json(&self.request(method, params))
            .send()
            .await
            .map_err(|e| ToolError::ToolCallFailed(format!("{method} request failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(RpcReply::SessionExpired);
        }
        if !resp.status().is_success() {
            return Err(ToolError::ToolCallFailed(format!(
                "{method} failed: {}",
                resp.status()
            )));
        }

        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::ToolCallFailed(format!("failed to read {method} reply: {e}")))?;

        let message = parse_reply(&body, is_sse)?;
        rpc_result(message).map(RpcReply::Result)
    }

    async fn session_for(
        &self,
        key: &(AgentId, AppId),
        endpoint: &str,
        headers: &HeaderMap,
    ) -> Result<String, ToolError> {
        if let Some(session) = self.sessions.lock().await.get_mut(key) {
            session.last_used = Instant::now();
            return Ok(session.id.clone());
        }
        let session = self.initialize(endpoint, headers).await?;

        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let idle_ttl = self.idle_ttl;
        sessions.retain(|_, s| s.last_used.elapsed() < idle_ttl);
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "Evicted idle MCP sessions");
        }
        sessions.insert(
            key.clone(),
            Session {
                id: session.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(session)
    }
}

impl Default for McpHttpProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProxy for McpHttpProxy {
    async fn list_tools(&self, app: &RegisteredApp) -> Result<Vec<ToolInfo>, ToolError> {
        let endpoint = app.card.mcp_endpoint.as_str();
        let headers = build_headers(None)?;
        info!(app_id = %app.app_id, endpoint, "Fetching tools from app");

        let session = self.initialize(endpoint, &headers).await?;
        let result = match self
            .rpc(endpoint, &headers, &session, "tools/list", json!({}))
            .await?
        {
            RpcReply::Result(result) => result,
            RpcReply::SessionExpired => {
                return Err(ToolError::ToolCallFailed(
                    "session rejected by app during tools/list".into(),
                ));
            }
        };

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter(|t| !t.is_null())
                    .filter_map(|t| serde_json::from_value::<ToolInfo>(t.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(tools)
    }

    async fn call_tool(
        &self,
        app: &RegisteredApp,
        call: &ToolCall,
        caller: &CallerContext,
    ) -> Result<ToolResult, ToolError> {
        let endpoint = app.card.mcp_endpoint.as_str();
        let headers = build_headers(Some(caller))?;
        let key = (caller.agent_id.clone(), app.app_id.clone());
        let params = json!({ "name": call.name, "arguments": call.arguments });

        let session = self.session_for(&key, endpoint, &headers).await?;
        let result = match self
            .rpc(endpoint, &headers, &session, "tools/call", params.clone())
            .await?
        {
            RpcReply::Result(result) => result,
            RpcReply::SessionExpired => {
                warn!(app_id = %app.app_id, agent_id = %caller.agent_id, "MCP session expired, reconnecting");
                self.sessions.lock().await.remove(&key);
                let session = self.session_for(&key, endpoint, &headers).await?;
                match self
                    .rpc(endpoint, &headers, &session, "tools/call", params)
                    .await?
                {
                    RpcReply::Result(result) => result,
                    RpcReply::SessionExpired => {
                        self.sessions.lock().await.remove(&key);
                        return Err(ToolError::ToolCallFailed(
                            "session rejected by app after reconnect".into(),
                        ));
                    }
                }
            }
        };

        serde_json::from_value(result)
            .map_err(|e| ToolError::ToolCallFailed(format!("malformed tool result: {e}")))
    }

    async fn forget_app(&self, app_id: &AppId) {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|(_, app), _| app != app_id);
        debug!(app_id = %app_id, dropped = before - sessions.len(), "Dropped MCP sessions for app");
    }

    async fn forget_agent(&self, agent_id: &AgentId) {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|(agent, _), _| agent != agent_id);
        debug!(agent_id = %agent_id, dropped = before - sessions.len(), "Dropped MCP sessions for agent");
    }
}

/// Base MCP headers plus the caller's passthrough headers and identity.
fn build_headers(caller: Option<&CallerContext>) -> Result<HeaderMap, ToolError> {
    let mut headers = HeaderMap::new();

    if let Some(caller) = caller {
        for (name, value) in &caller.headers {
            if SKIPPED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!(header = %name, "Skipping header that cannot be forwarded"),
            }
        }

        let agent_id = HeaderValue::from_str(caller.agent_id.as_str())
            .map_err(|_| ToolError::ToolCallFailed("agent ID is not a valid header".into()))?;
        headers.insert(HeaderName::from_static(AGENT_ID_HEADER), agent_id);

        if !caller.metadata.is_empty() {
            let encoded = serde_json::to_string(&caller.metadata)
                .map_err(|e| ToolError::ToolCallFailed(format!("bad metadata: {e}")))?;
            let value = HeaderValue::from_str(&encoded)
                .map_err(|_| ToolError::ToolCallFailed("metadata is not a valid header".into()))?;
            headers.insert(HeaderName::from_static(METADATA_HEADER), value);
        }
    }

    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/event-stream"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// Decode a JSON-RPC reply carried as plain JSON or as an SSE stream.
pub fn parse_reply(body: &str, is_sse: bool) -> Result<Value, ToolError> {
    let payload = if is_sse || body.trim_start().starts_with("event:") {
        body.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .ok_or_else(|| ToolError::ToolCallFailed("no data found in SSE response".into()))?
    } else {
        body.trim()
    };

    serde_json::from_str(payload)
        .map_err(|e| ToolError::ToolCallFailed(format!("invalid JSON-RPC reply: {e}")))
}

/// Extract `result` from a JSON-RPC reply, turning `error` into a failure.
fn rpc_result(mut message: Value) -> Result<Value, ToolError> {
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ToolError::ToolCallFailed(text.to_string()));
    }
    Ok(message
        .get_mut("result")
        .map(Value::take)
        .unwrap_or_else(|| json!({})))
}
