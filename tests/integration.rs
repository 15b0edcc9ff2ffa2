//! Integration tests for the registry/catalog/skills wiring.
//!
//! These exercise the feature-set-driven reconciliation end to end without
//! a cluster: catalogs, registries and skills are pure until an operation
//! actually runs.

use std::collections::HashSet;

use netmcp::discovery::{compute_from_crds, CrdSignature, FeatureSet};
use netmcp::model::{filter_findings, Category, Finding, ResourceRef, Severity};
use netmcp::registry::ToolRegistry;
use netmcp::skills::SkillRegistry;
use netmcp::tools;

fn features(groups: &[&str]) -> FeatureSet {
    compute_from_crds(
        groups
            .iter()
            .map(|g| -> CrdSignature { (g.to_string(), vec![("v1".to_string(), true)]) }),
    )
}

async fn sync_registry(registry: &ToolRegistry, fs: &FeatureSet) {
    let desired = tools::catalog_for(fs);
    let names: HashSet<String> = desired.iter().map(|op| op.name.clone()).collect();
    for op in desired {
        registry.register(op).await;
    }
    for op in registry.snapshot().await {
        if !names.contains(&op.name) {
            registry.unregister(&op.name).await;
        }
    }
}

#[tokio::test]
async fn gateway_api_install_and_removal_toggles_the_eleven_operations() {
    let registry = ToolRegistry::new();
    sync_registry(&registry, &FeatureSet::default()).await;
    let baseline = registry.len().await;
    assert!(registry.contains("probe_connectivity").await);
    assert!(!registry.contains("list_gateways").await);

    // CRDs installed
    sync_registry(&registry, &features(&["gateway.networking.k8s.io"])).await;
    for name in [
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
    ] {
        assert!(registry.contains(name).await, "{name} should be registered");
    }
    assert_eq!(registry.len().await, baseline + 11);

    // CRDs deleted: the eleven disappear, everything else remains
    sync_registry(&registry, &FeatureSet::default()).await;
    assert_eq!(registry.len().await, baseline);
    assert!(!registry.contains("list_gateways").await);
    assert!(registry.contains("run_skill").await);
}

#[tokio::test]
async fn skills_follow_the_feature_gating_table() {
    let skills = SkillRegistry::new();

    skills.sync_with_features(&features(&["networking.istio.io"])).await;
    assert!(skills.get("configure_istio_mtls").await.is_some());
    assert!(skills.get("configure_traffic_split").await.is_some());
    assert!(skills.get("create_network_policy").await.is_some());
    assert!(skills.get("expose_service_gateway_api").await.is_none());

    // istio gone, gateway api in: traffic split stays (either provider works)
    skills
        .sync_with_features(&features(&["gateway.networking.k8s.io"]))
        .await;
    assert!(skills.get("configure_istio_mtls").await.is_none());
    assert!(skills.get("configure_traffic_split").await.is_some());
    assert!(skills.get("expose_service_gateway_api").await.is_some());
}

#[test]
fn compact_projection_preserves_identity_fields() {
    let findings = vec![
        Finding::new(Severity::Warning, Category::Routing, "no backends")
            .with_resource(ResourceRef::new("Service", "web").in_namespace("shop"))
            .with_detail("selector matches 0 pods")
            .with_suggestion("check labels"),
        Finding::new(Severity::Ok, Category::Dns, "resolution works"),
    ];

    let compact = filter_findings(&findings, false);
    assert_eq!(compact.len(), findings.len());
    for (original, projected) in findings.iter().zip(&compact) {
        assert_eq!(original.severity, projected.severity);
        assert_eq!(original.category, projected.category);
        assert_eq!(original.resource, projected.resource);
        assert_eq!(original.summary, projected.summary);
        assert!(projected.detail.is_none());
        assert!(projected.suggestion.is_none());
    }

    // filter(filter(F, true), false) == filter(F, false)
    assert_eq!(
        filter_findings(&filter_findings(&findings, true), false),
        compact
    );
}

#[test]
fn version_detection_feeds_the_catalog() {
    let fs = compute_from_crds(vec![(
        "gateway.networking.k8s.io".to_string(),
        vec![("v1beta1".to_string(), true), ("v1".to_string(), true)],
    )]);
    assert_eq!(fs.version_or("gateway.networking.k8s.io", "v1"), "v1beta1");

    let ops = tools::catalog_for(&fs);
    assert!(ops.iter().any(|op| op.name == "list_gateways"));
}
