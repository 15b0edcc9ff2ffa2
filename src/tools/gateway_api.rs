//! src/tools/gateway_api.rs
//! Gateway API catalog: resource inventories plus misconfiguration scans
//! and a manifest designer.

use kube::api::ListParams;

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::{Category, Finding, ResourceRef, Severity, ToolMetadata, ToolResult};
use crate::skills::gateway::{gateway_manifest, route_manifest};
use crate::utils::{arg_i64, arg_str, nested_array, nested_str, require_str};

use super::factory::{get_operation, list_operation, map_dynamic_error};
use super::{Operation, SchemaBuilder};

pub const PROVIDER: &str = "gateway_api";
const VERSION_KEY: &str = "gateway.networking.k8s.io";

const GATEWAY: Gvr = Gvr::new("gateway.networking.k8s.io", "Gateway", "gateways");
const GATEWAY_CLASS: Gvr = Gvr::new("gateway.networking.k8s.io", "GatewayClass", "gatewayclasses");
const HTTP_ROUTE: Gvr = Gvr::new("gateway.networking.k8s.io", "HTTPRoute", "httproutes");
const GRPC_ROUTE: Gvr = Gvr::new("gateway.networking.k8s.io", "GRPCRoute", "grpcroutes");
const REFERENCE_GRANT: Gvr = Gvr::new(
    "gateway.networking.k8s.io",
    "ReferenceGrant",
    "referencegrants",
);

/// Catalog registered while the Gateway API CRDs are installed.
pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v1").to_string();
    vec![
        list_operation(
            "list_gateways",
            "List Gateway API Gateways and their listeners",
            GATEWAY,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        get_operation(
            "get_gateway",
            "Get one Gateway API Gateway",
            GATEWAY,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        list_operation(
            "list_httproutes",
            "List Gateway API HTTPRoutes",
            HTTP_ROUTE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        get_operation(
            "get_httproute",
            "Get one Gateway API HTTPRoute",
            HTTP_ROUTE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        list_operation(
            "list_grpcroutes",
            "List Gateway API GRPCRoutes",
            GRPC_ROUTE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        get_operation(
            "get_grpcroute",
            "Get one Gateway API GRPCRoute",
            GRPC_ROUTE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        list_operation(
            "list_referencegrants",
            "List Gateway API ReferenceGrants",
            REFERENCE_GRANT,
            "v1beta1",
            Category::Policy,
            Some(PROVIDER),
        ),
        get_operation(
            "get_referencegrant",
            "Get one Gateway API ReferenceGrant",
            REFERENCE_GRANT,
            "v1beta1",
            Category::Policy,
            Some(PROVIDER),
        ),
        scan_gateway_misconfigs(&version),
        check_gateway_conformance(&version),
        design_gateway_api(&version),
    ]
}

/// Cross-check Gateways and HTTPRoutes for the wiring mistakes agents hit
/// most: missing classes, empty listeners, orphaned routes.
fn scan_gateway_misconfigs(version: &str) -> Operation {
    const NAME: &str = "scan_gateway_misconfigs";
    let version = version.to_string();
    let schema = SchemaBuilder::new()
        .string("namespace", "Namespace to scan; all namespaces when omitted", false)
        .build();

    Operation::new(
        NAME,
        "Scan Gateways and HTTPRoutes for common misconfigurations",
        schema,
        move |ctx, args| {
            let version = version.clone();
            async move {
                let namespace = ctx.namespace_scope(&args).map(String::from);
                let mut findings = Vec::new();

                let gateways = ctx
                    .clients
                    .dynamic(&GATEWAY.api_resource(&version), namespace.as_deref())
                    .list(&ListParams::default())
                    .await
                    .map_err(|e| map_dynamic_error(NAME, e))?;
                for gw in &gateways.items {
                    let name = gw.metadata.name.clone().unwrap_or_default();
                    let ns = gw.metadata.namespace.clone().unwrap_or_default();
                    let resource = ResourceRef::new("Gateway", &name).in_namespace(&ns);
                    if nested_str(&gw.data, &["spec", "gatewayClassName"]).is_none() {
                        findings.push(
                            Finding::new(
                                Severity::Warning,
                                Category::Routing,
                                format!("Gateway {ns}/{name} has no gatewayClassName"),
                            )
                            .with_resource(resource.clone())
                            .with_suggestion("set spec.gatewayClassName to an installed class"),
                        );
                    }
                    if nested_array(&gw.data, &["spec", "listeners"])
                        .map(Vec::is_empty)
                        .unwrap_or(true)
                    {
                        findings.push(
                            Finding::new(
                                Severity::Warning,
                                Category::Routing,
                                format!("Gateway {ns}/{name} declares no listeners"),
                            )
                            .with_resource(resource),
                        );
                    }
                }

                let routes = ctx
                    .clients
                    .dynamic(&HTTP_ROUTE.api_resource(&version), namespace.as_deref())
                    .list(&ListParams::default())
                    .await
                    .map_err(|e| map_dynamic_error(NAME, e))?;
                for route in &routes.items {
                    let name = route.metadata.name.clone().unwrap_or_default();
                    let ns = route.metadata.namespace.clone().unwrap_or_default();
                    let resource = ResourceRef::new("HTTPRoute", &name).in_namespace(&ns);
                    if nested_array(&route.data, &["spec", "parentRefs"])
                        .map(Vec::is_empty)
                        .unwrap_or(true)
                    {
                        findings.push(
                            Finding::new(
                                Severity::Warning,
                                Category::Routing,
                                format!("HTTPRoute {ns}/{name} has no parentRefs, it binds to nothing"),
                            )
                            .with_resource(resource.clone())
                            .with_suggestion("add a parentRef pointing at a Gateway"),
                        );
                    }
                    let no_backends = nested_array(&route.data, &["spec", "rules"])
                        .map(|rules| {
                            rules.iter().all(|rule| {
                                nested_array(rule, &["backendRefs"])
                                    .map(Vec::is_empty)
                                    .unwrap_or(true)
                            })
                        })
                        .unwrap_or(true);
                    if no_backends {
                        findings.push(
                            Finding::new(
                                Severity::Warning,
                                Category::Routing,
                                format!("HTTPRoute {ns}/{name} routes to no backends"),
                            )
                            .with_resource(resource),
                        );
                    }
                }

                if findings.is_empty() {
                    findings.push(Finding::new(
                        Severity::Ok,
                        Category::Routing,
                        format!(
                            "no misconfigurations across {} Gateway(s) and {} HTTPRoute(s)",
                            gateways.items.len(),
                            routes.items.len()
                        ),
                    ));
                }

                let mut meta = ToolMetadata::now(&ctx.config.cluster_name).with_provider(PROVIDER);
                if let Some(ns) = namespace {
                    meta = meta.in_namespace(ns);
                }
                Ok(ToolResult::new(findings, meta))
            }
        },
    )
    .for_provider(PROVIDER)
}

/// Report GatewayClass acceptance: a class nothing has accepted means no
/// controller is serving it.
fn check_gateway_conformance(version: &str) -> Operation {
    const NAME: &str = "check_gateway_conformance";
    let version = version.to_string();

    Operation::new(
        NAME,
        "Check GatewayClass acceptance and the served Gateway API version",
        SchemaBuilder::new().build(),
        move |ctx, _args| {
            let version = version.clone();
            async move {
                let classes = ctx
                    .clients
                    .dynamic(&GATEWAY_CLASS.api_resource(&version), None)
                    .list(&ListParams::default())
                    .await
                    .map_err(|e| map_dynamic_error(NAME, e))?;

                let mut findings = vec![Finding::new(
                    Severity::Info,
                    Category::Routing,
                    format!("Gateway API served at version {version}"),
                )];
                for class in &classes.items {
                    let name = class.metadata.name.clone().unwrap_or_default();
                    let controller =
                        nested_str(&class.data, &["spec", "controllerName"]).unwrap_or("unknown");
                    let accepted = nested_array(&class.data, &["status", "conditions"])
                        .map(|conditions| {
                            conditions.iter().any(|c| {
                                nested_str(c, &["type"]) == Some("Accepted")
                                    && nested_str(c, &["status"]) == Some("True")
                            })
                        })
                        .unwrap_or(false);
                    let resource = ResourceRef::new("GatewayClass", &name);
                    if accepted {
                        findings.push(
                            Finding::new(
                                Severity::Ok,
                                Category::Routing,
                                format!("GatewayClass {name} accepted by {controller}"),
                            )
                            .with_resource(resource),
                        );
                    } else {
                        findings.push(
                            Finding::new(
                                Severity::Warning,
                                Category::Routing,
                                format!("GatewayClass {name} is not accepted by any controller"),
                            )
                            .with_resource(resource)
                            .with_suggestion("install or check the controller implementing this class"),
                        );
                    }
                }
                if classes.items.is_empty() {
                    findings.push(Finding::new(
                        Severity::Warning,
                        Category::Routing,
                        "no GatewayClasses installed, Gateways cannot be programmed",
                    ));
                }

                Ok(ToolResult::new(
                    findings,
                    ToolMetadata::now(&ctx.config.cluster_name).with_provider(PROVIDER),
                ))
            }
        },
    )
    .for_provider(PROVIDER)
}

/// Draft Gateway + route manifests for a service without touching the
/// cluster beyond a read.
fn design_gateway_api(version: &str) -> Operation {
    const NAME: &str = "design_gateway_api";
    let version = version.to_string();
    let schema = SchemaBuilder::new()
        .string("service", "Service the design should expose", true)
        .string("namespace", "Service namespace", false)
        .string("hostname", "Hostname the route should match", false)
        .integer("port", "Backend port (default 80)")
        .build();

    Operation::new(
        NAME,
        "Design Gateway API manifests exposing a service, returned as a suggestion",
        schema,
        move |ctx, args| {
            let version = version.clone();
            async move {
                let service = require_str(&args, "service", NAME)?.to_string();
                let namespace = ctx
                    .namespace_scope(&args)
                    .unwrap_or("default")
                    .to_string();
                let hostname = arg_str(&args, "hostname").map(String::from);
                let port = arg_i64(&args, "port").unwrap_or(80);

                let gateway_name = format!("{service}-gateway");
                let manifests = format!(
                    "{}---\n{}",
                    gateway_manifest(&gateway_name, &namespace, &version),
                    route_manifest(
                        "HTTPRoute",
                        &service,
                        &namespace,
                        port,
                        hostname.as_deref(),
                        &gateway_name,
                        &namespace,
                        &version,
                    ),
                );

                let finding = Finding::new(
                    Severity::Info,
                    Category::Routing,
                    format!("Gateway API design for {namespace}/{service}:{port}"),
                )
                .with_detail("review the gatewayClassName placeholder before applying")
                .with_suggestion(manifests);

                Ok(ToolResult::new(
                    vec![finding],
                    ToolMetadata::now(&ctx.config.cluster_name)
                        .with_provider(PROVIDER)
                        .in_namespace(namespace),
                ))
            }
        },
    )
    .for_provider(PROVIDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::compute_from_crds;

    #[test]
    fn test_catalog_names_are_stable() {
        let features = compute_from_crds(vec![(
            "gateway.networking.k8s.io".to_string(),
            vec![("v1".to_string(), true)],
        )]);
        let names: Vec<String> = operations(&features)
            .iter()
            .map(|op| op.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "list_gateways",
                "get_gateway",
                "list_httproutes",
                "get_httproute",
                "list_grpcroutes",
                "get_grpcroute",
                "list_referencegrants",
                "get_referencegrant",
                "scan_gateway_misconfigs",
                "check_gateway_conformance",
                "design_gateway_api",
            ]
        );
    }

    #[test]
    fn test_catalog_is_provider_scoped() {
        let features = compute_from_crds(vec![(
            "gateway.networking.k8s.io".to_string(),
            vec![("v1beta1".to_string(), true)],
        )]);
        for op in operations(&features) {
            assert_eq!(op.provider, Some(PROVIDER), "{}", op.name);
        }
    }

    #[test]
    fn test_nested_misconfig_predicates() {
        let gw = serde_json::json!({"spec": {"listeners": []}});
        assert!(nested_str(&gw, &["spec", "gatewayClassName"]).is_none());
        assert!(crate::utils::nested(&gw, &["spec", "listeners"]).is_some());
        assert!(nested_array(&gw, &["spec", "listeners"]).unwrap().is_empty());
    }
}
