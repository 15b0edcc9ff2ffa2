//! src/tools/factory.rs
//! Generic builders for dynamic-client list/get operations.
//!
//! Provider catalogs are mostly inventories over CRD-backed resources; the
//! two constructors here stamp those out from a [`Gvr`] plus the served
//! version discovery resolved, so each provider module stays declarative.

use kube::api::{DynamicObject, ListParams};

use crate::error::McpError;
use crate::kube::Gvr;
use crate::model::{Category, Finding, ResourceRef, Severity, ToolMetadata, ToolResult};
use crate::utils::{arg_i64, require_str, truncate};

use super::{Operation, SchemaBuilder};

/// Upper bound on items rendered by a list operation.
const LIST_LIMIT_DEFAULT: u32 = 100;
/// Detail payloads are object dumps; keep them token-bounded.
const DETAIL_CAP: usize = 4096;

/// Map a kube API failure on a CRD-backed collection. A 404 here means the
/// CRD vanished since registration.
pub fn map_dynamic_error(tool: &str, err: kube::Error) -> McpError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => McpError::crd_not_available(tool),
        other => McpError::internal(tool, other),
    }
}

fn object_ref(obj: &DynamicObject, gvr: &Gvr, version: &str) -> ResourceRef {
    let mut resource = ResourceRef::new(gvr.kind, obj.metadata.name.clone().unwrap_or_default())
        .with_api_version(if gvr.group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{version}", gvr.group)
        });
    if let Some(ns) = &obj.metadata.namespace {
        resource = resource.in_namespace(ns.clone());
    }
    resource
}

fn object_dump(obj: &DynamicObject) -> String {
    serde_json::to_string_pretty(&obj.data)
        .map(|dump| truncate(&dump, DETAIL_CAP))
        .unwrap_or_default()
}

/// Build a `list_*` operation over one dynamic resource type.
pub fn list_operation(
    name: &'static str,
    description: &'static str,
    gvr: Gvr,
    version: &str,
    category: Category,
    provider: Option<&'static str>,
) -> Operation {
    let version = version.to_string();
    let schema = SchemaBuilder::new()
        .string("namespace", "Namespace to query; all namespaces when omitted", false)
        .integer("limit", "Maximum number of resources to return (default 100)")
        .build();

    let op = Operation::new(name, description, schema, move |ctx, args| {
        let version = version.clone();
        async move {
            let namespace = ctx.namespace_scope(&args).map(String::from);
            let limit = arg_i64(&args, "limit")
                .and_then(|l| u32::try_from(l).ok())
                .unwrap_or(LIST_LIMIT_DEFAULT);
            let api = ctx
                .clients
                .dynamic(&gvr.api_resource(&version), namespace.as_deref());
            let list = api
                .list(&ListParams::default().limit(limit))
                .await
                .map_err(|e| map_dynamic_error(name, e))?;

            let mut findings = Vec::with_capacity(list.items.len());
            for obj in &list.items {
                let resource = object_ref(obj, &gvr, &version);
                let scope = resource
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "cluster".to_string());
                findings.push(
                    Finding::new(
                        Severity::Info,
                        category,
                        format!("{} {scope}/{}", gvr.kind, resource.name),
                    )
                    .with_resource(resource)
                    .with_detail(object_dump(obj)),
                );
            }
            if findings.is_empty() {
                findings.push(Finding::new(
                    Severity::Info,
                    category,
                    format!(
                        "no {} found in {}",
                        gvr.plural,
                        namespace.as_deref().unwrap_or("any namespace")
                    ),
                ));
            }

            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(p) = provider {
                meta = meta.with_provider(p);
            }
            if let Some(ns) = namespace {
                meta = meta.in_namespace(ns);
            }
            Ok(ToolResult::new(findings, meta))
        }
    });
    match provider {
        Some(p) => op.for_provider(p),
        None => op,
    }
}

/// Build a `get_*` operation over one dynamic resource type. A missing
/// object is a warning finding, not an error.
pub fn get_operation(
    name: &'static str,
    description: &'static str,
    gvr: Gvr,
    version: &str,
    category: Category,
    provider: Option<&'static str>,
) -> Operation {
    let version = version.to_string();
    let schema = SchemaBuilder::new()
        .string("name", "Resource name", true)
        .string("namespace", "Namespace the resource lives in", false)
        .build();

    let op = Operation::new(name, description, schema, move |ctx, args| {
        let version = version.clone();
        async move {
            let target = require_str(&args, "name", name)?.to_string();
            let namespace = ctx.namespace_scope(&args).map(String::from);
            let api = ctx
                .clients
                .dynamic(&gvr.api_resource(&version), namespace.as_deref());

            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(p) = provider {
                meta = meta.with_provider(p);
            }
            if let Some(ns) = &namespace {
                meta = meta.in_namespace(ns.clone());
            }

            match api.get(&target).await {
                Ok(obj) => {
                    let resource = object_ref(&obj, &gvr, &version);
                    let finding = Finding::new(
                        Severity::Info,
                        category,
                        format!("{} {target} found", gvr.kind),
                    )
                    .with_resource(resource)
                    .with_detail(object_dump(&obj));
                    Ok(ToolResult::new(vec![finding], meta))
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    let finding = Finding::new(
                        Severity::Warning,
                        category,
                        format!(
                            "{} {target} not found in {}",
                            gvr.kind,
                            namespace.as_deref().unwrap_or("any namespace")
                        ),
                    );
                    Ok(ToolResult::new(vec![finding], meta))
                }
                Err(e) => Err(McpError::internal(name, e)),
            }
        }
    });
    match provider {
        Some(p) => op.for_provider(p),
        None => op,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_dynamic_error_404_is_crd_gone() {
        let err = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the server could not find the requested resource".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        let mapped = map_dynamic_error("list_gateways", err);
        assert_eq!(mapped.code, crate::error::ErrorCode::CrdNotAvailable);
        assert_eq!(mapped.tool, "list_gateways");
    }

    #[test]
    fn test_list_operation_descriptor() {
        let gvr = Gvr::new("gateway.networking.k8s.io", "Gateway", "gateways");
        let op = list_operation(
            "list_gateways",
            "List Gateway API gateways",
            gvr,
            "v1",
            Category::Routing,
            Some("gateway_api"),
        );
        assert_eq!(op.name, "list_gateways");
        assert_eq!(op.provider, Some("gateway_api"));
        assert_eq!(op.input_schema["properties"]["namespace"]["type"], "string");
        assert_eq!(op.input_schema["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn test_get_operation_requires_name() {
        let gvr = Gvr::new("cilium.io", "CiliumNetworkPolicy", "ciliumnetworkpolicies");
        let op = get_operation(
            "get_ciliumnetworkpolicy",
            "Get one CiliumNetworkPolicy",
            gvr,
            "v2",
            Category::Policy,
            Some("cilium"),
        );
        assert_eq!(op.input_schema["required"], serde_json::json!(["name"]));
    }
}
