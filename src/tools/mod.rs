//! src/tools/mod.rs
//! Operation descriptors and the catalog of agent-invocable diagnostics.
//!
//! An [`Operation`] couples a stable name, a JSON-Schema argument contract
//! and an async execution closure. Operations are value objects: discovery
//! transitions register and unregister them at runtime, so schemas are
//! assembled by hand rather than derived at compile time.

pub mod calico;
pub mod cilium;
pub mod core;
pub mod factory;
pub mod flannel;
pub mod gateway_api;
pub mod istio;
pub mod kgateway;
pub mod kuma;
pub mod linkerd;

use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::discovery::FeatureSet;
use crate::error::McpError;
use crate::kube::Clients;
use crate::model::ToolResult;
use crate::probe::ProbeManager;
use crate::skills::SkillRegistry;
use crate::utils::Args;

/// Shared runtime context handed to every operation invocation.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub clients: Clients,
    pub probes: Arc<ProbeManager>,
    pub skills: Arc<SkillRegistry>,
}

impl ToolContext {
    /// Namespace to query: explicit argument, else the configured filter,
    /// else cluster-wide.
    pub fn namespace_scope<'a>(&'a self, args: &'a Args) -> Option<&'a str> {
        crate::utils::arg_str(args, "namespace").or(self.config.default_namespace.as_deref())
    }
}

type OperationFuture = Pin<Box<dyn Future<Output = Result<ToolResult, McpError>> + Send>>;
type OperationHandler = Arc<dyn Fn(Arc<ToolContext>, Args) -> OperationFuture + Send + Sync>;

/// A named, schema-described, agent-invocable diagnostic.
#[derive(Clone)]
pub struct Operation {
    pub name: String,
    pub description: String,
    pub input_schema: Map<String, Value>,
    /// Networking provider this operation is scoped to, if any.
    pub provider: Option<&'static str>,
    handler: OperationHandler,
}

impl Operation {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Map<String, Value>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<ToolContext>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, McpError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            provider: None,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    pub fn for_provider(mut self, provider: &'static str) -> Self {
        self.provider = Some(provider);
        self
    }

    pub async fn run(&self, ctx: Arc<ToolContext>, args: Args) -> Result<ToolResult, McpError> {
        (self.handler)(ctx, args).await
    }

    /// Protocol-facing tool descriptor.
    pub fn to_tool(&self) -> rmcp::model::Tool {
        rmcp::model::Tool {
            name: self.name.clone().into(),
            title: None,
            description: Some(self.description.clone().into()),
            input_schema: Arc::new(self.input_schema.clone()),
            output_schema: None,
            icons: None,
            annotations: None,
            meta: None,
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .finish()
    }
}

/// The desired operation set for a feature set: the always-on core plus
/// every enabled provider's catalog. Reconciliation registers these and
/// unregisters whatever else is present.
pub fn catalog_for(features: &FeatureSet) -> Vec<Operation> {
    let mut ops = core::operations();
    if features.gateway_api {
        ops.extend(gateway_api::operations(features));
    }
    if features.istio {
        ops.extend(istio::operations(features));
    }
    if features.cilium {
        ops.extend(cilium::operations(features));
    }
    if features.calico {
        ops.extend(calico::operations(features));
    }
    if features.linkerd {
        ops.extend(linkerd::operations(features));
    }
    if features.kuma {
        ops.extend(kuma::operations(features));
    }
    if features.kgateway {
        ops.extend(kgateway::operations(features));
    }
    if features.flannel {
        ops.extend(flannel::operations());
    }
    ops
}

/// Assembles the draft 2020-12 object schema for an operation's arguments.
/// Every operation accepts the universal `detail` boolean, added at build
/// time so individual catalogs cannot forget it.
#[derive(Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, name: &str, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "string", "description": description}),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn integer(mut self, name: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "integer", "description": description}),
        );
        self
    }

    pub fn boolean(mut self, name: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": "boolean", "description": description}),
        );
        self
    }

    pub fn build(mut self) -> Map<String, Value> {
        self.properties.entry("detail".to_string()).or_insert(json!({
            "type": "boolean",
            "description": "Include detail and suggestion fields in findings (default false)"
        }));
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(self.properties));
        if !self.required.is_empty() {
            schema.insert("required".to_string(), json!(self.required));
        }
        schema
    }
}
