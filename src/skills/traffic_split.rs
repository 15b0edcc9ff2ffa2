//! src/skills/traffic_split.rs
//! Split traffic between service versions by weight, via Istio when it is
//! installed and Gateway API weighted backends otherwise.

use async_trait::async_trait;

use crate::discovery::FeatureSet;
use crate::error::McpError;
use crate::model::{Category, Finding, ResourceRef, Severity};
use crate::utils::{arg_str, require_str, Args};

use super::{Skill, SkillContext, SkillParameter, SkillResult, SkillRun};

pub const SKILL_NAME: &str = "configure_traffic_split";

pub struct ConfigureTrafficSplit {
    prefer_istio: bool,
    istio_version: String,
    gateway_version: String,
}

impl ConfigureTrafficSplit {
    pub fn new(features: &FeatureSet) -> Self {
        Self {
            prefer_istio: features.istio,
            istio_version: features
                .version_or("networking.istio.io", "v1")
                .to_string(),
            gateway_version: features
                .version_or("gateway.networking.k8s.io", "v1")
                .to_string(),
        }
    }
}

#[async_trait]
impl Skill for ConfigureTrafficSplit {
    fn name(&self) -> &'static str {
        SKILL_NAME
    }

    fn description(&self) -> &'static str {
        "Generate manifests splitting traffic between service versions by weight \
         (Istio VirtualService/DestinationRule, or Gateway API HTTPRoute)"
    }

    fn required_crds(&self) -> &'static [&'static str] {
        &[
            "virtualservices.networking.istio.io",
            "httproutes.gateway.networking.k8s.io",
        ]
    }

    fn parameters(&self) -> Vec<SkillParameter> {
        vec![
            SkillParameter::new("service", "string", true, "Service to split traffic for"),
            SkillParameter::new("namespace", "string", false, "Service namespace"),
            SkillParameter::new(
                "versions",
                "string",
                true,
                "Comma-separated version names, e.g. \"v1,v2\"",
            ),
            SkillParameter::new(
                "weights",
                "string",
                true,
                "Comma-separated integer weights summing to 100, e.g. \"90,10\"",
            ),
        ]
    }

    async fn execute(&self, ctx: &SkillContext, args: &Args) -> Result<SkillResult, McpError> {
        let service = require_str(args, "service", SKILL_NAME)?;
        let versions_raw = require_str(args, "versions", SKILL_NAME)?;
        let weights_raw = require_str(args, "weights", SKILL_NAME)?;
        let namespace = arg_str(args, "namespace")
            .or(ctx.config.default_namespace.as_deref())
            .unwrap_or("default");

        let mut run = SkillRun::new();

        // validate_split
        let split = match validate_split(versions_raw, weights_raw) {
            Ok(split) => split,
            Err(summary) => {
                let finding = Finding::new(Severity::Critical, Category::Routing, &summary)
                    .with_suggestion("provide one integer weight per version, summing to 100");
                return Ok(run.fail(SKILL_NAME, "validate_split", vec![finding], summary));
            }
        };
        run.passed(
            "validate_split",
            vec![Finding::new(
                Severity::Ok,
                Category::Routing,
                format!("{} versions with weights summing to 100", split.len()),
            )],
        );

        // check_service
        match ctx.clients.services(Some(namespace)).get(service).await {
            Ok(_) => run.passed(
                "check_service",
                vec![Finding::new(
                    Severity::Ok,
                    Category::Routing,
                    format!("service {namespace}/{service} exists"),
                )
                .with_resource(
                    ResourceRef::new("Service", service).in_namespace(namespace),
                )],
            ),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let summary = format!("service {namespace}/{service} not found");
                let finding = Finding::new(Severity::Critical, Category::Routing, &summary)
                    .with_suggestion("create the service before splitting its traffic");
                return Ok(run.fail(SKILL_NAME, "check_service", vec![finding], summary));
            }
            Err(e) => return Err(McpError::internal(SKILL_NAME, e)),
        }

        // generate_manifests
        let backend = if self.prefer_istio {
            run.manifest(istio_virtual_service(
                service,
                namespace,
                &split,
                &self.istio_version,
            ));
            run.manifest(istio_destination_rule(
                service,
                namespace,
                &split,
                &self.istio_version,
            ));
            "Istio VirtualService + DestinationRule"
        } else {
            run.manifest(weighted_httproute(
                service,
                namespace,
                &split,
                &self.gateway_version,
            ));
            "Gateway API HTTPRoute with weighted backends"
        };
        run.passed(
            "generate_manifests",
            vec![Finding::new(
                Severity::Info,
                Category::Routing,
                format!("generated {backend} for {namespace}/{service}"),
            )],
        );

        Ok(run.finish(
            SKILL_NAME,
            format!(
                "traffic split for {namespace}/{service} across {} versions via {backend}",
                split.len()
            ),
        ))
    }
}

/// Parse and cross-check the versions/weights lists. Pairing is positional,
/// so user order is preserved.
fn validate_split(versions_raw: &str, weights_raw: &str) -> Result<Vec<(String, i64)>, String> {
    let versions: Vec<&str> = versions_raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    let mut weights = Vec::with_capacity(versions.len());
    for raw in weights_raw.split(',').map(str::trim).filter(|w| !w.is_empty()) {
        let weight: i64 = raw
            .parse()
            .map_err(|_| format!("weight \"{raw}\" is not an integer"))?;
        weights.push(weight);
    }

    if versions.len() != weights.len() {
        return Err(format!(
            "versions count ({}) does not match weights count ({})",
            versions.len(),
            weights.len()
        ));
    }
    let total: i64 = weights.iter().sum();
    if total != 100 {
        return Err(format!("weights sum to {total}, expected 100"));
    }

    Ok(versions
        .into_iter()
        .map(String::from)
        .zip(weights)
        .collect())
}

fn istio_virtual_service(
    service: &str,
    namespace: &str,
    split: &[(String, i64)],
    api_version: &str,
) -> String {
    let routes = split
        .iter()
        .map(|(version, weight)| {
            format!(
                "        - destination:\n            host: {service}\n            subset: {version}\n          weight: {weight}"
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"apiVersion: networking.istio.io/{api_version}
kind: VirtualService
metadata:
  name: {service}-split
  namespace: {namespace}
spec:
  hosts:
    - {service}
  http:
    - route:
{routes}
"#
    )
}

fn istio_destination_rule(
    service: &str,
    namespace: &str,
    split: &[(String, i64)],
    api_version: &str,
) -> String {
    let subsets = split
        .iter()
        .map(|(version, _)| {
            format!("    - name: {version}\n      labels:\n        version: {version}")
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"apiVersion: networking.istio.io/{api_version}
kind: DestinationRule
metadata:
  name: {service}-versions
  namespace: {namespace}
spec:
  host: {service}
  subsets:
{subsets}
"#
    )
}

fn weighted_httproute(
    service: &str,
    namespace: &str,
    split: &[(String, i64)],
    api_version: &str,
) -> String {
    let backends = split
        .iter()
        .map(|(version, weight)| {
            format!(
                "        - name: {service}-{version}\n          port: 80\n          weight: {weight}"
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"apiVersion: gateway.networking.k8s.io/{api_version}
kind: HTTPRoute
metadata:
  name: {service}-split
  namespace: {namespace}
spec:
  rules:
    - backendRefs:
{backends}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_split_count_mismatch() {
        let err = validate_split("v1,v2,v3", "50,50").unwrap_err();
        assert!(err.contains("versions count (3)"));
        assert!(err.contains("weights count (2)"));
    }

    #[test]
    fn test_validate_split_sum_enforced() {
        let err = validate_split("v1,v2", "50,40").unwrap_err();
        assert!(err.contains("sum to 90"));
        assert!(validate_split("v1,v2", "50,50").is_ok());
    }

    #[test]
    fn test_validate_split_rejects_garbage_weight() {
        let err = validate_split("v1", "lots").unwrap_err();
        assert!(err.contains("not an integer"));
    }

    #[test]
    fn test_validate_split_preserves_user_order() {
        let split = validate_split("canary,stable", "10,90").unwrap();
        assert_eq!(split[0], ("canary".to_string(), 10));
        assert_eq!(split[1], ("stable".to_string(), 90));
    }

    #[test]
    fn test_virtual_service_manifest_shape() {
        let split = validate_split("v1,v2", "80,20").unwrap();
        let yaml = istio_virtual_service("shop", "store", &split, "v1");
        assert!(yaml.starts_with("apiVersion: networking.istio.io/v1\n"));
        assert!(yaml.contains("kind: VirtualService"));
        assert!(yaml.contains("name: shop-split"));
        assert!(yaml.contains("subset: v1\n          weight: 80"));
        assert!(yaml.contains("subset: v2\n          weight: 20"));
    }

    #[test]
    fn test_destination_rule_subsets() {
        let split = validate_split("v1,v2", "80,20").unwrap();
        let yaml = istio_destination_rule("shop", "store", &split, "v1");
        assert!(yaml.contains("kind: DestinationRule"));
        assert!(yaml.contains("host: shop"));
        assert!(yaml.contains("- name: v1\n      labels:\n        version: v1"));
    }

    #[test]
    fn test_httproute_weighted_backends() {
        let split = validate_split("v1,v2", "70,30").unwrap();
        let yaml = weighted_httproute("shop", "store", &split, "v1");
        assert!(yaml.contains("kind: HTTPRoute"));
        assert!(yaml.contains("name: shop-v1\n          port: 80\n          weight: 70"));
        assert!(yaml.contains("name: shop-v2\n          port: 80\n          weight: 30"));
    }
}
