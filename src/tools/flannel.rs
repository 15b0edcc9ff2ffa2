//! src/tools/flannel.rs
//! Flannel catalog. Flannel ships no CRDs, so the single operation checks
//! the DaemonSet the feature detection keyed on.

use kube::api::ListParams;

use crate::error::McpError;
use crate::model::{Category, Finding, ResourceRef, Severity, ToolMetadata, ToolResult};

use super::{Operation, SchemaBuilder};

pub const PROVIDER: &str = "flannel";
const FLANNEL_SELECTOR: &str = "app=flannel";

pub fn operations() -> Vec<Operation> {
    vec![check_flannel_status()]
}

fn check_flannel_status() -> Operation {
    const NAME: &str = "check_flannel_status";

    Operation::new(
        NAME,
        "Check the flannel DaemonSet rollout health",
        SchemaBuilder::new().build(),
        move |ctx, _args| async move {
            let daemonsets = ctx
                .clients
                .daemonsets()
                .list(&ListParams::default().labels(FLANNEL_SELECTOR))
                .await
                .map_err(|e| McpError::internal(NAME, e))?;

            let mut findings = Vec::new();
            for ds in &daemonsets.items {
                let name = ds.metadata.name.clone().unwrap_or_default();
                let ns = ds.metadata.namespace.clone().unwrap_or_default();
                let desired = ds
                    .status
                    .as_ref()
                    .map(|s| s.desired_number_scheduled)
                    .unwrap_or(0);
                let ready = ds
                    .status
                    .as_ref()
                    .map(|s| s.number_ready)
                    .unwrap_or(0);
                let resource = ResourceRef::new("DaemonSet", &name).in_namespace(&ns);
                if ready < desired {
                    findings.push(
                        Finding::new(
                            Severity::Critical,
                            Category::Connectivity,
                            format!(
                                "flannel DaemonSet {ns}/{name} has {ready}/{desired} pods ready"
                            ),
                        )
                        .with_resource(resource)
                        .with_suggestion("inspect the not-ready flannel pods' logs for CNI errors"),
                    );
                } else {
                    findings.push(
                        Finding::new(
                            Severity::Ok,
                            Category::Connectivity,
                            format!(
                                "flannel DaemonSet {ns}/{name} fully ready on {ready} node(s)"
                            ),
                        )
                        .with_resource(resource),
                    );
                }
            }
            if findings.is_empty() {
                findings.push(Finding::new(
                    Severity::Warning,
                    Category::Connectivity,
                    "no DaemonSet matching app=flannel found",
                ));
            }

            Ok(ToolResult::new(
                findings,
                ToolMetadata::now(&ctx.config.cluster_name).with_provider(PROVIDER),
            ))
        },
    )
    .for_provider(PROVIDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_shape() {
        let ops = operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name, "check_flannel_status");
        assert_eq!(ops[0].provider, Some(PROVIDER));
    }
}
