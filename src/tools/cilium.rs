//! src/tools/cilium.rs
//! Cilium catalog: network policies and endpoint state.

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::Category;

use super::factory::{get_operation, list_operation};
use super::Operation;

pub const PROVIDER: &str = "cilium";
const VERSION_KEY: &str = "cilium.io";

const CILIUM_NETWORK_POLICY: Gvr = Gvr::new("cilium.io", "CiliumNetworkPolicy", "ciliumnetworkpolicies");
const CILIUM_ENDPOINT: Gvr = Gvr::new("cilium.io", "CiliumEndpoint", "ciliumendpoints");

pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v2").to_string();
    vec![
        list_operation(
            "list_ciliumnetworkpolicies",
            "List CiliumNetworkPolicies",
            CILIUM_NETWORK_POLICY,
            &version,
            Category::Policy,
            Some(PROVIDER),
        ),
        get_operation(
            "get_ciliumnetworkpolicy",
            "Get one CiliumNetworkPolicy",
            CILIUM_NETWORK_POLICY,
            &version,
            Category::Policy,
            Some(PROVIDER),
        ),
        list_operation(
            "list_ciliumendpoints",
            "List CiliumEndpoints and their identities",
            CILIUM_ENDPOINT,
            &version,
            Category::Connectivity,
            Some(PROVIDER),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::compute_from_crds;

    #[test]
    fn test_catalog_uses_detected_version() {
        let features = compute_from_crds(vec![(
            "cilium.io".to_string(),
            vec![("v2".to_string(), true)],
        )]);
        let ops = operations(&features);
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| op.provider == Some(PROVIDER)));
    }
}
