// src/mcp/mod.rs
// MCP protocol bridge
//
// Translates between the streaming JSON-RPC protocol and the internal
// registry/operation model. The bridge owns the protocol-visible tool set;
// sync_tools() reconciles it against the registry after every feature-set
// transition. Dispatch resolves the executable from the registry at call
// time, wraps it in the execute_tool span, applies the compact/detail
// projection and feeds the request metrics.

pub mod http;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::trace::Status;
use opentelemetry::KeyValue;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
        ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    ErrorData, ServerHandler,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::error::{ErrorCode, McpError};
use crate::registry::ToolRegistry;
use crate::telemetry::{extract_parent_context, Instruments};
use crate::tools::ToolContext;
use crate::utils::{arg_bool, sanitize_args, truncate, Args};

/// Span-attribute cap for the rendered result.
const RESULT_ATTRIBUTE_CAP: usize = 1024;

/// The MCP server handler. Cloned per transport session; all state is
/// shared behind Arcs.
#[derive(Clone)]
pub struct NetworkMcpServer {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    instruments: Arc<Instruments>,
    /// Names currently exposed over the protocol, keyed to their descriptors.
    tools: Arc<RwLock<BTreeMap<String, rmcp::model::Tool>>>,
    sync_lock: Arc<Mutex<()>>,
}

impl NetworkMcpServer {
    pub fn new(
        registry: Arc<ToolRegistry>,
        ctx: Arc<ToolContext>,
        instruments: Arc<Instruments>,
    ) -> Self {
        Self {
            registry,
            ctx,
            instruments,
            tools: Arc::new(RwLock::new(BTreeMap::new())),
            sync_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Number of tools currently visible over the protocol.
    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Reconcile the protocol-visible tool set against the registry.
    /// Serialized by an internal mutex; called once at startup and from the
    /// discovery change callback after registry mutations settle.
    pub async fn sync_tools(&self) {
        let _guard = self.sync_lock.lock().await;

        let desired: BTreeMap<String, rmcp::model::Tool> = self
            .registry
            .snapshot()
            .await
            .iter()
            .map(|op| (op.name.clone(), op.to_tool()))
            .collect();

        let mut tools = self.tools.write().await;
        let added: Vec<&str> = desired
            .keys()
            .filter(|name| !tools.contains_key(*name))
            .map(String::as_str)
            .collect();
        let removed: Vec<&str> = tools
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !added.is_empty() || !removed.is_empty() {
            info!(
                added = added.len(),
                removed = removed.len(),
                total = desired.len(),
                "tool set synchronized"
            );
            debug!(?added, ?removed, "tool set changes");
        }
        *tools = desired;
    }

    /// Run one tool call through the instrumentation middleware.
    async fn dispatch(&self, tool_name: &str, args: Args) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let detail = arg_bool(&args, "detail", false);

        let outcome = match self.registry.get(tool_name).await {
            // The Arc keeps an in-flight call alive even if the operation
            // is unregistered mid-call.
            Some(op) => {
                match tokio::time::timeout(
                    self.ctx.config.tool_timeout,
                    op.run(self.ctx.clone(), args),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(McpError::new(
                        ErrorCode::InternalError,
                        tool_name,
                        format!(
                            "operation did not complete within {}s",
                            self.ctx.config.tool_timeout.as_secs()
                        ),
                    )),
                }
            }
            None => Err(McpError::crd_not_available(tool_name)),
        };

        let span = tracing::Span::current();
        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(result) => {
                let projected = result.project(detail);
                let body = serde_json::to_string(&projected)
                    .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
                span.record(
                    "gen_ai.tool.call.result",
                    truncate(&body, RESULT_ATTRIBUTE_CAP).as_str(),
                );

                for finding in &projected.findings {
                    self.instruments.findings_total.add(
                        1,
                        &[
                            KeyValue::new("severity", finding.severity.as_str()),
                            KeyValue::new("analyzer", tool_name.to_string()),
                        ],
                    );
                }
                self.record_request(tool_name, "", elapsed);

                Ok(CallToolResult::success(vec![Content::text(body)]))
            }
            Err(err) => {
                let code = err.code.as_str();
                span.record("error.type", code);
                span.set_status(Status::error(err.message.clone()));
                // The error event doubles as the structured log record.
                tracing::error!(
                    tool = tool_name,
                    error.code = code,
                    detail = err.detail.as_deref().unwrap_or(""),
                    "tool call failed: {}",
                    err.message
                );

                self.instruments.errors_total.add(
                    1,
                    &[
                        KeyValue::new("error.code", code),
                        KeyValue::new("gen_ai.tool.name", tool_name.to_string()),
                    ],
                );
                self.record_request(tool_name, code, elapsed);

                let body = serde_json::to_string(&err)
                    .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
                Ok(CallToolResult::error(vec![Content::text(body)]))
            }
        }
    }

    fn record_request(&self, tool_name: &str, error_type: &'static str, elapsed: f64) {
        let dimensions = [
            KeyValue::new("gen_ai.tool.name", tool_name.to_string()),
            KeyValue::new("error.type", error_type),
        ];
        self.instruments.request_duration.record(elapsed, &dimensions);
        self.instruments.request_count.add(1, &dimensions);
    }
}

/// Carrier for W3C trace propagation pulled from `_meta`.
fn meta_carrier(meta: &rmcp::model::Meta) -> HashMap<String, String> {
    let mut carrier = HashMap::new();
    for key in ["traceparent", "tracestate"] {
        if let Some(value) = meta.get(key).and_then(|v| v.as_str()) {
            carrier.insert(key.to_string(), value.to_string());
        }
    }
    carrier
}

fn protocol_version_str() -> String {
    serde_json::to_value(ProtocolVersion::default())
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

impl ServerHandler for NetworkMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "mcp-k8s-networking".into(),
                title: Some("Kubernetes networking diagnostics for AI agents".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Diagnose Kubernetes networking: the available tools track the networking \
                 providers installed in this cluster and return structured findings."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: self.tools.read().await.values().cloned().collect(),
                next_cursor: None,
                meta: None,
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let tool_name = request.name.to_string();
            let args: Args = request.arguments.clone().unwrap_or_default();

            // Absent propagation headers yield the root context.
            let parent_cx = extract_parent_context(&meta_carrier(&context.meta));

            let span_name = format!("execute_tool {tool_name}");
            let span = tracing::info_span!(
                "execute_tool",
                "otel.name" = %span_name,
                "otel.kind" = "server",
                "gen_ai.operation.name" = "execute_tool",
                "gen_ai.tool.name" = %tool_name,
                "mcp.method.name" = "tools/call",
                "mcp.protocol.version" = %protocol_version_str(),
                "jsonrpc.request.id" = %context.id,
                "gen_ai.tool.call.arguments" = %sanitize_args(&args),
                "gen_ai.tool.call.result" = tracing::field::Empty,
                "error.type" = tracing::field::Empty,
                "mcp.session.id" = tracing::field::Empty,
            );
            span.set_parent(parent_cx);
            if let Some(parts) = context.extensions.get::<axum::http::request::Parts>()
                && let Some(session) = parts
                    .headers
                    .get("mcp-session-id")
                    .and_then(|v| v.to_str().ok())
            {
                span.record("mcp.session.id", session);
            }

            let dispatch_span = span.clone();
            self.dispatch(&tool_name, args)
                .instrument(dispatch_span)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_carrier_extracts_both_keys() {
        let mut meta = rmcp::model::Meta::default();
        meta.insert(
            "traceparent".to_string(),
            serde_json::json!("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        );
        meta.insert("tracestate".to_string(), serde_json::json!("vendor=1"));
        meta.insert("other".to_string(), serde_json::json!("ignored"));

        let carrier = meta_carrier(&meta);
        assert_eq!(carrier.len(), 2);
        assert!(carrier["traceparent"].starts_with("00-4bf92f35"));
        assert_eq!(carrier["tracestate"], "vendor=1");
    }

    #[test]
    fn test_meta_carrier_absent_is_empty() {
        let carrier = meta_carrier(&rmcp::model::Meta::default());
        assert!(carrier.is_empty());
    }

    #[test]
    fn test_protocol_version_renders() {
        assert!(!protocol_version_str().is_empty());
    }
}
