//! Tool execution bridge between agents and apps.
//!
//! [`ToolProxy`] is the transport seam; [`ToolBridge`] resolves apps, refuses
//! unhealthy ones and caches tool listings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::Error;
use crate::storage::Storage;
use crate::types::{AgentId, AppId, Metadata, RegisteredApp};

/// How long a fetched tool list is served from cache.
pub const TOOL_CACHE_TTL: Duration = Duration::from_secs(300);

/// Errors from tool listing and execution
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("app not found: {0}")]
    AppNotFound(AppId),

    #[error("app '{name}' ({app_id}) is not healthy")]
    AppUnhealthy { app_id: AppId, name: String },

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error(transparent)]
    Storage(#[from] Error),
}

/// A tool advertised by an app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A single tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Metadata,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

/// Outcome of a tool invocation as reported by the app
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(
        default,
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<serde_json::Value>,
}

impl ToolResult {
    /// Text content items joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Who is calling a tool, forwarded to the app
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallerContext {
    pub agent_id: AgentId,
    /// Request headers to pass through, keyed by lowercase name
    pub headers: BTreeMap<String, String>,
    pub metadata: Metadata,
}

impl CallerContext {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            headers: BTreeMap::new(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Transport to an app's tool endpoint.
///
/// Implementations keep per-(agent, app) session state apart.
#[async_trait]
pub trait ToolProxy: Send + Sync {
    async fn list_tools(&self, app: &RegisteredApp) -> Result<Vec<ToolInfo>, ToolError>;

    async fn call_tool(
        &self,
        app: &RegisteredApp,
        call: &ToolCall,
        caller: &CallerContext,
    ) -> Result<ToolResult, ToolError>;

    /// Drop any session state held for an app.
    async fn forget_app(&self, _app_id: &AppId) {}

    /// Drop any session state held for an agent.
    async fn forget_agent(&self, _agent_id: &AgentId) {}
}

/// Resolves apps and forwards tool requests to a [`ToolProxy`].
pub struct ToolBridge {
    storage: Arc<dyn Storage>,
    proxy: Arc<dyn ToolProxy>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<AppId, (Instant, Vec<ToolInfo>)>>,
}

impl ToolBridge {
    pub fn new(storage: Arc<dyn Storage>, proxy: Arc<dyn ToolProxy>) -> Self {
        Self {
            storage,
            proxy,
            cache_ttl: TOOL_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn resolve(&self, app_id: &AppId) -> Result<RegisteredApp, ToolError> {
        self.storage
            .get_app(app_id)
            .await?
            .ok_or_else(|| ToolError::AppNotFound(app_id.clone()))
    }

    /// Tools offered by an app, served from cache while fresh.
    #[instrument(name = "tools::list", skip(self, app_id), fields(app_id = %app_id))]
    pub async fn list_tools(&self, app_id: &AppId) -> Result<Vec<ToolInfo>, ToolError> {
        let app = self.resolve(app_id).await?;

        if let Some((fetched_at, tools)) = self.cache.lock().await.get(app_id)
            && fetched_at.elapsed() < self.cache_ttl
        {
            debug!(count = tools.len(), "Serving cached tool list");
            return Ok(tools.clone());
        }

        let tools = self.proxy.list_tools(&app).await?;
        debug!(count = tools.len(), "Fetched tool list");
        self.cache
            .lock()
            .await
            .insert(app_id.clone(), (Instant::now(), tools.clone()));
        Ok(tools)
    }

    /// Invoke a tool on a healthy app on behalf of `caller`.
    #[instrument(
        name = "tools::call",
        skip(self, app_id, call, caller),
        fields(app_id = %app_id, tool = %call.name, agent_id = %caller.agent_id)
    )]
    pub async fn call_tool(
        &self,
        app_id: &AppId,
        call: &ToolCall,
        caller: &CallerContext,
    ) -> Result<ToolResult, ToolError> {
        let app = self.resolve(app_id).await?;
        if !app.healthy {
            return Err(ToolError::AppUnhealthy {
                app_id: app.app_id,
                name: app.card.name,
            });
        }
        self.proxy.call_tool(&app, call, caller).await
    }

    /// Forget everything held for an app: its cached tool list and any
    /// proxy sessions. Called when the app is deleted or its card changes.
    pub async fn forget_app(&self, app_id: &AppId) {
        self.clear_cache(Some(app_id)).await;
        self.proxy.forget_app(app_id).await;
    }

    /// Forget proxy sessions opened on behalf of an agent.
    pub async fn forget_agent(&self, agent_id: &AgentId) {
        self.proxy.forget_agent(agent_id).await;
    }

    /// Drop cached tool lists for one app, or all apps.
    pub async fn clear_cache(&self, app_id: Option<&AppId>) {
        let mut cache = self.cache.lock().await;
        match app_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::AppCard;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProxy {
        lists: AtomicUsize,
        calls: AtomicUsize,
        forgotten: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolProxy for CountingProxy {
        async fn list_tools(&self, _app: &RegisteredApp) -> Result<Vec<ToolInfo>, ToolError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ToolInfo {
                name: "forecast".to_string(),
                description: "weather".to_string(),
                input_schema: json!({ "type": "object" }),
            }])
        }

        async fn call_tool(
            &self,
            _app: &RegisteredApp,
            call: &ToolCall,
            caller: &CallerContext,
        ) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult {
                content: vec![json!({
                    "type": "text",
                    "text": format!("{} for {}", call.name, caller.agent_id)
                })],
                ..Default::default()
            })
        }

        async fn forget_app(&self, app_id: &AppId) {
            self.forgotten.lock().unwrap().push(format!("app:{app_id}"));
        }

        async fn forget_agent(&self, agent_id: &AgentId) {
            self.forgotten.lock().unwrap().push(format!("agent:{agent_id}"));
        }
    }

    async fn setup() -> (Arc<InMemoryStorage>, Arc<CountingProxy>, ToolBridge, AppId) {
        let storage = Arc::new(InMemoryStorage::new());
        let app = storage
            .register_app(RegisteredApp::new(AppCard {
                name: "weather".to_string(),
                description: "forecasts".to_string(),
                scenario: "travel".to_string(),
                mcp_endpoint: "http://localhost:1/mcp".to_string(),
                health_check_url: "http://localhost:1/health".to_string(),
                icon_url: None,
                tags: Vec::new(),
            }))
            .await
            .unwrap();
        let proxy = Arc::new(CountingProxy::default());
        let bridge = ToolBridge::new(storage.clone(), proxy.clone());
        (storage, proxy, bridge, app.app_id)
    }

    #[tokio::test]
    async fn tool_list_is_cached() {
        let (_storage, proxy, bridge, app_id) = setup().await;

        bridge.list_tools(&app_id).await.unwrap();
        let tools = bridge.list_tools(&app_id).await.unwrap();
        assert_eq!(tools[0].name, "forecast");
        assert_eq!(proxy.lists.load(Ordering::SeqCst), 1);

        bridge.clear_cache(Some(&app_id)).await;
        bridge.list_tools(&app_id).await.unwrap();
        assert_eq!(proxy.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forget_app_clears_cache_and_proxy_sessions() {
        let (_storage, proxy, bridge, app_id) = setup().await;

        bridge.list_tools(&app_id).await.unwrap();
        bridge.forget_app(&app_id).await;
        bridge.forget_agent(&AgentId::from("alice")).await;
        bridge.list_tools(&app_id).await.unwrap();

        assert_eq!(proxy.lists.load(Ordering::SeqCst), 2);
        assert_eq!(
            *proxy.forgotten.lock().unwrap(),
            vec![format!("app:{app_id}"), "agent:alice".to_string()]
        );
    }

    #[tokio::test]
    async fn expired_cache_refetches() {
        let (_storage, proxy, bridge, app_id) = setup().await;
        let bridge = bridge.with_cache_ttl(Duration::ZERO);

        bridge.list_tools(&app_id).await.unwrap();
        bridge.list_tools(&app_id).await.unwrap();
        assert_eq!(proxy.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_app_is_reported() {
        let (_storage, _proxy, bridge, _app_id) = setup().await;
        let err = bridge
            .call_tool(
                &AppId::from("ghost"),
                &ToolCall::new("forecast"),
                &CallerContext::new(AgentId::from("alice")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::AppNotFound(_)));
    }

    #[tokio::test]
    async fn unhealthy_app_refuses_calls() {
        let (storage, proxy, bridge, app_id) = setup().await;
        let mut app = storage.get_app(&app_id).await.unwrap().unwrap();
        app.healthy = false;
        storage.update_app(app).await.unwrap();

        let err = bridge
            .call_tool(
                &app_id,
                &ToolCall::new("forecast"),
                &CallerContext::new(AgentId::from("alice")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::AppUnhealthy { .. }));
        assert_eq!(proxy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn call_forwards_caller() {
        let (_storage, _proxy, bridge, app_id) = setup().await;
        let result = bridge
            .call_tool(
                &app_id,
                &ToolCall::new("forecast").with_argument("city", json!("Oslo")),
                &CallerContext::new(AgentId::from("alice")),
            )
            .await
            .unwrap();
        assert_eq!(result.text(), "forecast for alice");
        assert!(!result.is_error);
    }

    #[test]
    fn caller_headers_are_lowercased() {
        let caller = CallerContext::new(AgentId::from("a")).with_header("X-Trace", "1");
        assert_eq!(caller.headers.get("x-trace").map(String::as_str), Some("1"));
    }
}
