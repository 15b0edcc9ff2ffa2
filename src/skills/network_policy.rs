//! src/skills/network_policy.rs
//! Generate a NetworkPolicy locking a service down to known sources while
//! always preserving DNS and intra-namespace access.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::McpError;
use crate::model::{Category, Finding, ResourceRef, Severity};
use crate::utils::{arg_i64, arg_str, require_str, yaml_label_lines, Args};

use super::{Skill, SkillContext, SkillParameter, SkillResult, SkillRun};

pub const SKILL_NAME: &str = "create_network_policy";

pub struct CreateNetworkPolicy;

#[async_trait]
impl Skill for CreateNetworkPolicy {
    fn name(&self) -> &'static str {
        SKILL_NAME
    }

    fn description(&self) -> &'static str {
        "Generate a NetworkPolicy restricting ingress to a service while keeping \
         DNS and intra-namespace traffic working"
    }

    fn required_crds(&self) -> &'static [&'static str] {
        &[]
    }

    fn parameters(&self) -> Vec<SkillParameter> {
        vec![
            SkillParameter::new("service", "string", true, "Service to protect"),
            SkillParameter::new("namespace", "string", false, "Service namespace"),
            SkillParameter::new(
                "allowed_sources",
                "string",
                false,
                "Comma-separated namespaces allowed to reach the service; omit for port-only ingress",
            ),
            SkillParameter::new("port", "integer", false, "Port override; defaults to the service ports"),
        ]
    }

    async fn execute(&self, ctx: &SkillContext, args: &Args) -> Result<SkillResult, McpError> {
        let service = require_str(args, "service", SKILL_NAME)?;
        let namespace = arg_str(args, "namespace")
            .or(ctx.config.default_namespace.as_deref())
            .unwrap_or("default");
        let mut allowed_sources: Vec<String> = arg_str(args, "allowed_sources")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        allowed_sources.sort();
        allowed_sources.dedup();

        let mut run = SkillRun::new();

        // inspect_service
        let svc = match ctx.clients.services(Some(namespace)).get(service).await {
            Ok(svc) => svc,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let summary = format!("service {namespace}/{service} not found");
                let finding = Finding::new(Severity::Critical, Category::Policy, &summary);
                return Ok(run.fail(SKILL_NAME, "inspect_service", vec![finding], summary));
            }
            Err(e) => return Err(McpError::internal(SKILL_NAME, e)),
        };

        let selector: BTreeMap<String, String> = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.as_ref())
            .map(|sel| sel.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        if selector.is_empty() {
            let summary = format!(
                "service {namespace}/{service} has no selector, a policy would match no pods"
            );
            let finding = Finding::new(Severity::Critical, Category::Policy, &summary)
                .with_resource(ResourceRef::new("Service", service).in_namespace(namespace));
            return Ok(run.fail(SKILL_NAME, "inspect_service", vec![finding], summary));
        }

        let ports: Vec<i64> = match arg_i64(args, "port") {
            Some(port) => vec![port],
            None => svc
                .spec
                .as_ref()
                .and_then(|spec| spec.ports.as_ref())
                .map(|ports| ports.iter().map(|p| i64::from(p.port)).collect())
                .unwrap_or_default(),
        };

        run.passed(
            "inspect_service",
            vec![Finding::new(
                Severity::Ok,
                Category::Policy,
                format!(
                    "service {namespace}/{service} selects pods by {} label(s) on {} port(s)",
                    selector.len(),
                    ports.len()
                ),
            )
            .with_resource(ResourceRef::new("Service", service).in_namespace(namespace))],
        );

        // generate_policy
        run.manifest(network_policy_manifest(
            service,
            namespace,
            &selector,
            &ports,
            &allowed_sources,
        ));
        let scope = if allowed_sources.is_empty() {
            "port-only ingress".to_string()
        } else {
            format!("ingress from {} namespace(s)", allowed_sources.len())
        };
        run.passed(
            "generate_policy",
            vec![Finding::new(
                Severity::Info,
                Category::Policy,
                format!("generated NetworkPolicy for {namespace}/{service} with {scope}"),
            )],
        );

        Ok(run.finish(
            SKILL_NAME,
            format!("NetworkPolicy for {namespace}/{service}: {scope}, DNS and intra-namespace egress preserved"),
        ))
    }
}

fn ports_block(ports: &[i64], indent: &str) -> String {
    if ports.is_empty() {
        return String::new();
    }
    let mut out = format!("{indent}ports:\n");
    for port in ports {
        out.push_str(&format!(
            "{indent}  - port: {port}\n{indent}    protocol: TCP\n"
        ));
    }
    out
}

/// Assemble the NetworkPolicy. Selector keys and allowed sources arrive
/// sorted so repeated runs emit identical text.
fn network_policy_manifest(
    service: &str,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    ports: &[i64],
    allowed_sources: &[String],
) -> String {
    let pod_selector = yaml_label_lines(selector, 6);

    let ingress = if allowed_sources.is_empty() {
        // single port-only rule
        let mut rule = "    - ".to_string();
        let ports_yaml = ports_block(ports, "      ");
        if ports_yaml.is_empty() {
            rule.push_str("{}\n");
        } else {
            rule.push_str(ports_yaml.trim_start());
        }
        rule
    } else {
        allowed_sources
            .iter()
            .map(|source| {
                let mut rule = format!(
                    "    - from:\n        - namespaceSelector:\n            matchLabels:\n              kubernetes.io/metadata.name: {source}\n"
                );
                rule.push_str(&ports_block(ports, "      "));
                rule
            })
            .collect()
    };

    format!(
        r#"apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: {service}-policy
  namespace: {namespace}
spec:
  podSelector:
    matchLabels:
{pod_selector}
  policyTypes:
    - Ingress
    - Egress
  ingress:
{ingress}  egress:
    - to:
        - namespaceSelector: {{}}
      ports:
        - port: 53
          protocol: UDP
        - port: 53
          protocol: TCP
    - to:
        - podSelector: {{}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> BTreeMap<String, String> {
        let mut sel = BTreeMap::new();
        sel.insert("tier".to_string(), "backend".to_string());
        sel.insert("app".to_string(), "shop".to_string());
        sel
    }

    #[test]
    fn test_port_only_policy_has_single_ingress_rule() {
        let yaml = network_policy_manifest("shop", "store", &selector(), &[8080], &[]);
        assert_eq!(yaml.matches("  ingress:\n").count(), 1);
        // exactly one ingress rule, no from clause
        assert!(!yaml.contains("from:"));
        assert!(yaml.contains("- port: 8080\n          protocol: TCP"));
    }

    #[test]
    fn test_egress_rules_always_present() {
        for sources in [vec![], vec!["frontend".to_string()]] {
            let yaml = network_policy_manifest("shop", "store", &selector(), &[80], &sources);
            assert!(yaml.contains("- port: 53\n          protocol: UDP"));
            assert!(yaml.contains("- port: 53\n          protocol: TCP"));
            assert!(yaml.contains("- podSelector: {}"));
            assert!(yaml.contains("- namespaceSelector: {}"));
            assert!(yaml.contains("policyTypes:\n    - Ingress\n    - Egress"));
        }
    }

    #[test]
    fn test_sources_emit_one_rule_each() {
        let sources = vec!["billing".to_string(), "frontend".to_string()];
        let yaml = network_policy_manifest("shop", "store", &selector(), &[80], &sources);
        assert_eq!(yaml.matches("kubernetes.io/metadata.name:").count(), 2);
        assert!(yaml.contains("kubernetes.io/metadata.name: billing"));
        assert!(yaml.contains("kubernetes.io/metadata.name: frontend"));
        // sources come pre-sorted, billing before frontend
        let billing = yaml.find("billing").unwrap();
        let frontend = yaml.find("frontend").unwrap();
        assert!(billing < frontend);
    }

    #[test]
    fn test_selector_keys_sorted_in_output() {
        let yaml = network_policy_manifest("shop", "store", &selector(), &[80], &[]);
        let app = yaml.find("app: shop").unwrap();
        let tier = yaml.find("tier: backend").unwrap();
        assert!(app < tier);
    }

    #[test]
    fn test_reproducible_output() {
        let a = network_policy_manifest("shop", "store", &selector(), &[80, 443], &[]);
        let b = network_policy_manifest("shop", "store", &selector(), &[80, 443], &[]);
        assert_eq!(a, b);
    }
}
