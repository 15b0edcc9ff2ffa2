//! src/tools/linkerd.rs
//! Linkerd catalog: ServiceProfiles describing per-service routing.

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::Category;

use super::factory::{get_operation, list_operation};
use super::Operation;

pub const PROVIDER: &str = "linkerd";
const VERSION_KEY: &str = "linkerd.io";

const SERVICE_PROFILE: Gvr = Gvr::new("linkerd.io", "ServiceProfile", "serviceprofiles");

pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v1alpha2").to_string();
    vec![
        list_operation(
            "list_serviceprofiles",
            "List Linkerd ServiceProfiles",
            SERVICE_PROFILE,
            &version,
            Category::Mesh,
            Some(PROVIDER),
        ),
        get_operation(
            "get_serviceprofile",
            "Get one Linkerd ServiceProfile",
            SERVICE_PROFILE,
            &version,
            Category::Mesh,
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
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.provider == Some("linkerd")));
    }
}
