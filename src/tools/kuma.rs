//! src/tools/kuma.rs
//! Kuma catalog: meshes and their traffic permissions.

use crate::discovery::FeatureSet;
use crate::kube::Gvr;
use crate::model::Category;

use super::factory::{get_operation, list_operation};
use super::Operation;

pub const PROVIDER: &str = "kuma";
const VERSION_KEY: &str = "kuma.io";

const MESH: Gvr = Gvr::new("kuma.io", "Mesh", "meshes");
const MESH_TRAFFIC_PERMISSION: Gvr = Gvr::new(
    "kuma.io",
    "MeshTrafficPermission",
    "meshtrafficpermissions",
);

pub fn operations(features: &FeatureSet) -> Vec<Operation> {
    let version = features.version_or(VERSION_KEY, "v1alpha1").to_string();
    vec![
        list_operation(
            "list_meshes",
            "List Kuma Meshes",
            MESH,
            &version,
            Category::Mesh,
            Some(PROVIDER),
        ),
        get_operation(
            "get_mesh",
            "Get one Kuma Mesh",
            MESH,
            &version,
            Category::Mesh,
            Some(PROVIDER),
        ),
        list_operation(
            "list_meshtrafficpermissions",
            "List Kuma MeshTrafficPermissions",
            MESH_TRAFFIC_PERMISSION,
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
        let names: Vec<&str> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["list_meshes", "get_mesh", "list_meshtrafficpermissions"]
        );
    }
}
