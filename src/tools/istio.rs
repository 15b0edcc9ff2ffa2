//! src/tools/istio.rs
//! Istio catalog: traffic resources plus an mTLS posture check.

use kube::api::ListParams;

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::{Category, Finding, ResourceRef, Severity, ToolMetadata, ToolResult};
use crate::utils::nested_str;

use super::factory::{get_operation, list_operation, map_dynamic_error};
use super::{Operation, SchemaBuilder};

pub const PROVIDER: &str = "istio";
const VERSION_KEY: &str = "networking.istio.io";

const VIRTUAL_SERVICE: Gvr = Gvr::new("networking.istio.io", "VirtualService", "virtualservices");
const DESTINATION_RULE: Gvr = Gvr::new("networking.istio.io", "DestinationRule", "destinationrules");
const PEER_AUTHENTICATION: Gvr = Gvr::new(
    "security.istio.io",
    "PeerAuthentication",
    "peerauthentications",
);

/// Root namespace where mesh-wide policies live.
const ISTIO_ROOT_NAMESPACE: &str = "istio-system";

pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v1").to_string();
    vec![
        list_operation(
            "list_virtualservices",
            "List Istio VirtualServices",
            VIRTUAL_SERVICE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        get_operation(
            "get_virtualservice",
            "Get one Istio VirtualService",
            VIRTUAL_SERVICE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        list_operation(
            "list_destinationrules",
            "List Istio DestinationRules",
            DESTINATION_RULE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        get_operation(
            "get_destinationrule",
            "Get one Istio DestinationRule",
            DESTINATION_RULE,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        list_operation(
            "list_peerauthentications",
            "List Istio PeerAuthentication policies",
            PEER_AUTHENTICATION,
            &version,
            Category::Tls,
            Some(PROVIDER),
        ),
        check_istio_mtls(&version),
    ]
}

/// Summarize the mesh's mTLS posture from its PeerAuthentication policies.
fn check_istio_mtls(version: &str) -> Operation {
    const NAME: &str = "check_istio_mtls";
    let version = version.to_string();
    let schema = SchemaBuilder::new()
        .string("namespace", "Limit the check to one namespace", false)
        .build();

    Operation::new(
        NAME,
        "Check the mesh mTLS posture across PeerAuthentication policies",
        schema,
        move |ctx, args| {
            let version = version.clone();
            async move {
                let namespace = ctx.namespace_scope(&args).map(String::from);
                let policies = ctx
                    .clients
                    .dynamic(&PEER_AUTHENTICATION.api_resource(&version), namespace.as_deref())
                    .list(&ListParams::default())
                    .await
                    .map_err(|e| map_dynamic_error(NAME, e))?;

                let mut findings = Vec::new();
                let mut mesh_wide_mode: Option<String> = None;
                for policy in &policies.items {
                    let name = policy.metadata.name.clone().unwrap_or_default();
                    let ns = policy.metadata.namespace.clone().unwrap_or_default();
                    let mode =
                        nested_str(&policy.data, &["spec", "mtls", "mode"]).unwrap_or("UNSET");
                    if ns == ISTIO_ROOT_NAMESPACE {
                        mesh_wide_mode = Some(mode.to_string());
                    }
                    let severity = match mode {
                        "STRICT" => Severity::Ok,
                        "DISABLE" => Severity::Warning,
                        _ => Severity::Info,
                    };
                    findings.push(
                        Finding::new(
                            severity,
                            Category::Tls,
                            format!("PeerAuthentication {ns}/{name} sets mode {mode}"),
                        )
                        .with_resource(
                            ResourceRef::new("PeerAuthentication", &name).in_namespace(&ns),
                        ),
                    );
                }

                match mesh_wide_mode {
                    Some(mode) => findings.push(Finding::new(
                        if mode == "STRICT" { Severity::Ok } else { Severity::Info },
                        Category::Mesh,
                        format!("mesh-wide mTLS mode is {mode}"),
                    )),
                    None => findings.push(
                        Finding::new(
                            Severity::Warning,
                            Category::Mesh,
                            "no mesh-wide PeerAuthentication, Istio defaults to PERMISSIVE",
                        )
                        .with_suggestion(
                            "run the configure_istio_mtls skill to generate a STRICT policy",
                        ),
                    ),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::compute_from_crds;

    #[test]
    fn test_catalog_names() {
        let features = compute_from_crds(vec![(
            "networking.istio.io".to_string(),
            vec![("v1beta1".to_string(), true)],
        )]);
        let names: Vec<String> = operations(&features)
            .iter()
            .map(|op| op.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "list_virtualservices",
                "get_virtualservice",
                "list_destinationrules",
                "get_destinationrule",
                "list_peerauthentications",
                "check_istio_mtls",
            ]
        );
    }
}
