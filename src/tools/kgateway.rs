//! src/tools/kgateway.rs
//! kgateway catalog: the controller's parameterization resources.

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::Category;

use super::factory::{get_operation, list_operation};
use super::Operation;

pub const PROVIDER: &str = "kgateway";
const VERSION_KEY: &str = "kgateway.dev";

const GATEWAY_PARAMETERS: Gvr = Gvr::new(
    "gateway.kgateway.dev",
    "GatewayParameters",
    "gatewayparameters",
);

pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v1alpha1").to_string();
    vec![
        list_operation(
            "list_kgateway_parameters",
            "List kgateway GatewayParameters",
            GATEWAY_PARAMETERS,
            &version,
            Category::Routing,
            Some(PROVIDER),
        ),
        get_operation(
            "get_kgateway_parameters",
            "Get one kgateway GatewayParameters",
            GATEWAY_PARAMETERS,
            &version,
            Category::Routing,
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
        assert_eq!(ops[0].name, "list_kgateway_parameters");
    }
}
