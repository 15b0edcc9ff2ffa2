//! src/tools/calico.rs
//! Calico catalog: the project's own NetworkPolicy flavor.

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::Category;

use super::factory::{get_operation, list_operation};
use super::Operation;

pub const PROVIDER: &str = "calico";
const VERSION_KEY: &str = "crd.projectcalico.org";

const CALICO_NETWORK_POLICY: Gvr = Gvr::new("crd.projectcalico.org", "NetworkPolicy", "networkpolicies");
const CALICO_GLOBAL_POLICY: Gvr = Gvr::new(
    "crd.projectcalico.org",
    "GlobalNetworkPolicy",
    "globalnetworkpolicies",
);

pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v1").to_string();
    vec![
        list_operation(
            "list_calico_networkpolicies",
            "List Calico NetworkPolicies",
            CALICO_NETWORK_POLICY,
            &version,
            Category::Policy,
            Some(PROVIDER),
        ),
        get_operation(
            "get_calico_networkpolicy",
            "Get one Calico NetworkPolicy",
            CALICO_NETWORK_POLICY,
            &version,
            Category::Policy,
            Some(PROVIDER),
        ),
        list_operation(
            "list_calico_globalnetworkpolicies",
            "List Calico GlobalNetworkPolicies",
            CALICO_GLOBAL_POLICY,
            &version,
            Category::Policy,
            Some(PROVIDER),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_shape() {
        let ops = operations(&FeatureSet::default());
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].name, "list_calico_networkpolicies");
    }
}
