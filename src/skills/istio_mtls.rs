//! src/skills/istio_mtls.rs
//! Configure namespace-wide Istio mutual TLS: inspect the current posture,
//! surface conflicts, and generate the PeerAuthentication (plus a
//! DestinationRule when STRICT is requested).

use async_trait::async_trait;
use kube::api::ListParams;

use crate::discovery::FeatureSet;
use crate::error::McpError;
use crate::kube::Gvr;
use crate::model::{Category, Finding, ResourceRef, Severity};
use crate::utils::{arg_str, nested_str, require_str, Args};

use super::{Skill, SkillContext, SkillParameter, SkillResult, SkillRun, StepStatus};

pub const SKILL_NAME: &str = "configure_istio_mtls";

const PEER_AUTHENTICATION: Gvr = Gvr::new("security.istio.io", "PeerAuthentication", "peerauthentications");
const DESTINATION_RULE: Gvr = Gvr::new("networking.istio.io", "DestinationRule", "destinationrules");

pub struct ConfigureIstioMtls {
    istio_version: String,
}

impl ConfigureIstioMtls {
    pub fn new(features: &FeatureSet) -> Self {
        Self {
            istio_version: features
                .version_or("networking.istio.io", "v1beta1")
                .to_string(),
        }
    }
}

#[async_trait]
impl Skill for ConfigureIstioMtls {
    fn name(&self) -> &'static str {
        SKILL_NAME
    }

    fn description(&self) -> &'static str {
        "Check a namespace's Istio mTLS posture and generate PeerAuthentication \
         (and DestinationRule for STRICT) manifests"
    }

    fn required_crds(&self) -> &'static [&'static str] {
        &[
            "peerauthentications.security.istio.io",
            "destinationrules.networking.istio.io",
        ]
    }

    fn parameters(&self) -> Vec<SkillParameter> {
        vec![
            SkillParameter::new("namespace", "string", true, "Namespace to configure"),
            SkillParameter::new(
                "mode",
                "string",
                false,
                "mTLS mode: STRICT or PERMISSIVE (default STRICT)",
            ),
        ]
    }

    async fn execute(&self, ctx: &SkillContext, args: &Args) -> Result<SkillResult, McpError> {
        let namespace = require_str(args, "namespace", SKILL_NAME)?;
        let mode = arg_str(args, "mode").unwrap_or("STRICT").to_uppercase();
        if !matches!(mode.as_str(), "STRICT" | "PERMISSIVE") {
            return Err(McpError::invalid_input(
                SKILL_NAME,
                format!("mode must be STRICT or PERMISSIVE, got \"{mode}\""),
            ));
        }

        let mut run = SkillRun::new();

        // check_sidecar_injection
        match ctx.clients.namespaces().get(namespace).await {
            Ok(ns) => {
                let labels = ns.metadata.labels.unwrap_or_default();
                let injected = labels.get("istio-injection").map(String::as_str) == Some("enabled")
                    || labels.contains_key("istio.io/rev");
                if injected {
                    run.passed(
                        "check_sidecar_injection",
                        vec![Finding::new(
                            Severity::Ok,
                            Category::Mesh,
                            format!("namespace {namespace} has sidecar injection enabled"),
                        )],
                    );
                } else {
                    run.warning(
                        "check_sidecar_injection",
                        vec![Finding::new(
                            Severity::Warning,
                            Category::Mesh,
                            format!("namespace {namespace} does not enable sidecar injection"),
                        )
                        .with_suggestion(format!(
                            "kubectl label namespace {namespace} istio-injection=enabled"
                        ))],
                    );
                }
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let summary = format!("namespace {namespace} not found");
                let finding = Finding::new(Severity::Critical, Category::Mesh, &summary);
                return Ok(run.fail(SKILL_NAME, "check_sidecar_injection", vec![finding], summary));
            }
            Err(e) => return Err(McpError::internal(SKILL_NAME, e)),
        }

        // inspect_peer_authentication
        let pa_api = ctx.clients.dynamic(
            &PEER_AUTHENTICATION.api_resource(&self.istio_version),
            Some(namespace),
        );
        let mut findings = Vec::new();
        match pa_api.list(&ListParams::default()).await {
            Ok(list) => {
                for pa in &list.items {
                    let name = pa.metadata.name.clone().unwrap_or_default();
                    let existing = nested_str(&pa.data, &["spec", "mtls", "mode"]).unwrap_or("UNSET");
                    let severity = if existing == mode {
                        Severity::Info
                    } else {
                        Severity::Warning
                    };
                    findings.push(
                        Finding::new(
                            severity,
                            Category::Tls,
                            format!("PeerAuthentication {name} already sets mode {existing}"),
                        )
                        .with_resource(
                            ResourceRef::new("PeerAuthentication", name.clone())
                                .in_namespace(namespace),
                        ),
                    );
                }
                if findings.is_empty() {
                    findings.push(Finding::new(
                        Severity::Info,
                        Category::Tls,
                        format!("no PeerAuthentication policies in {namespace}"),
                    ));
                }
                run.passed("inspect_peer_authentication", findings);
            }
            Err(e) => return Err(McpError::internal(SKILL_NAME, e)),
        }

        // check_destination_rules: only STRICT can conflict
        if mode == "STRICT" {
            let dr_api = ctx.clients.dynamic(
                &DESTINATION_RULE.api_resource(&self.istio_version),
                Some(namespace),
            );
            match dr_api.list(&ListParams::default()).await {
                Ok(list) => {
                    let mut conflicts = Vec::new();
                    for dr in &list.items {
                        let name = dr.metadata.name.clone().unwrap_or_default();
                        if let Some(tls_mode) =
                            nested_str(&dr.data, &["spec", "trafficPolicy", "tls", "mode"])
                            && tls_mode != "ISTIO_MUTUAL"
                        {
                            conflicts.push(
                                Finding::new(
                                    Severity::Warning,
                                    Category::Tls,
                                    format!(
                                        "DestinationRule {name} uses TLS mode {tls_mode}, which breaks STRICT mTLS"
                                    ),
                                )
                                .with_resource(
                                    ResourceRef::new("DestinationRule", name.clone())
                                        .in_namespace(namespace),
                                )
                                .with_suggestion("switch the rule to ISTIO_MUTUAL"),
                            );
                        }
                    }
                    if conflicts.is_empty() {
                        run.passed(
                            "check_destination_rules",
                            vec![Finding::new(
                                Severity::Ok,
                                Category::Tls,
                                format!("no conflicting DestinationRules in {namespace}"),
                            )],
                        );
                    } else {
                        run.warning("check_destination_rules", conflicts);
                    }
                }
                Err(e) => return Err(McpError::internal(SKILL_NAME, e)),
            }
        } else {
            run.step(
                "check_destination_rules",
                StepStatus::Skipped,
                vec![Finding::new(
                    Severity::Info,
                    Category::Tls,
                    "PERMISSIVE mode cannot conflict with DestinationRule TLS settings",
                )],
                None,
            );
        }

        // generate_manifests
        run.manifest(peer_authentication_manifest(
            namespace,
            &mode,
            &self.istio_version,
        ));
        if mode == "STRICT" {
            run.manifest(mtls_destination_rule_manifest(
                namespace,
                &self.istio_version,
            ));
        }
        run.passed(
            "generate_manifests",
            vec![Finding::new(
                Severity::Info,
                Category::Tls,
                format!("generated {mode} mTLS manifests for {namespace}"),
            )],
        );

        Ok(run.finish(
            SKILL_NAME,
            format!("namespace {namespace} mTLS set to {mode}"),
        ))
    }
}

fn peer_authentication_manifest(namespace: &str, mode: &str, api_version: &str) -> String {
    format!(
        r#"apiVersion: security.istio.io/{api_version}
kind: PeerAuthentication
metadata:
  name: default
  namespace: {namespace}
spec:
  mtls:
    mode: {mode}
"#
    )
}

fn mtls_destination_rule_manifest(namespace: &str, api_version: &str) -> String {
    format!(
        r#"apiVersion: networking.istio.io/{api_version}
kind: DestinationRule
metadata:
  name: {namespace}-mtls
  namespace: {namespace}
spec:
  host: "*.{namespace}.svc.cluster.local"
  trafficPolicy:
    tls:
      mode: ISTIO_MUTUAL
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_authentication_manifest() {
        let yaml = peer_authentication_manifest("payments", "STRICT", "v1beta1");
        assert!(yaml.starts_with("apiVersion: security.istio.io/v1beta1\n"));
        assert!(yaml.contains("kind: PeerAuthentication"));
        assert!(yaml.contains("namespace: payments"));
        assert!(yaml.contains("mode: STRICT"));
    }

    #[test]
    fn test_destination_rule_targets_namespace_wildcard() {
        let yaml = mtls_destination_rule_manifest("payments", "v1beta1");
        assert!(yaml.contains("host: \"*.payments.svc.cluster.local\""));
        assert!(yaml.contains("mode: ISTIO_MUTUAL"));
    }

    #[test]
    fn test_skill_metadata() {
        let skill = ConfigureIstioMtls {
            istio_version: "v1".to_string(),
        };
        assert_eq!(skill.name(), "configure_istio_mtls");
        assert!(skill.parameters().iter().any(|p| p.name == "namespace" && p.required));
    }
}
