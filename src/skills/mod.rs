//! src/skills/mod.rs
//! Skills: multi-step, stateless playbooks composing diagnostic reads into
//! a manifest-generating workflow.
//!
//! Skills observe cluster state and assemble YAML strings; they never apply
//! anything. Registration follows the feature set through
//! [`SkillRegistry::sync_with_features`].

pub mod gateway;
pub mod istio_mtls;
pub mod network_policy;
pub mod traffic_split;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::discovery::FeatureSet;
use crate::error::McpError;
use crate::kube::Clients;
use crate::model::Finding;
use crate::utils::Args;

/// Cluster access a skill gets for its read-only checks.
pub struct SkillContext {
    pub clients: Clients,
    pub config: Arc<Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    Completed,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
}

/// Outcome of one step. Step ordering is a contract of the skill itself,
/// not a data attribute.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    #[serde(rename = "stepName")]
    pub step_name: String,
    pub status: StepStatus,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Outcome of a full skill run.
#[derive(Debug, Clone, Serialize)]
pub struct SkillResult {
    #[serde(rename = "skillName")]
    pub skill_name: String,
    pub status: SkillStatus,
    pub steps: Vec<StepResult>,
    pub manifests: Vec<String>,
    pub summary: String,
}

/// Declared parameter of a skill, surfaced through `list_skills`.
#[derive(Debug, Clone, Serialize)]
pub struct SkillParameter {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub param_type: &'static str,
    pub required: bool,
    pub description: &'static str,
}

impl SkillParameter {
    pub const fn new(
        name: &'static str,
        param_type: &'static str,
        required: bool,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            param_type,
            required,
            description,
        }
    }
}

/// A named, multi-step diagnostic-plus-generation workflow.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// CRDs the skill consults; informational only.
    fn required_crds(&self) -> &'static [&'static str];
    fn parameters(&self) -> Vec<SkillParameter>;
    async fn execute(&self, ctx: &SkillContext, args: &Args) -> Result<SkillResult, McpError>;
}

/// Accumulates steps and manifests while a skill runs, then settles the
/// final status: `failed` on short-circuit, `partial` when every step ran
/// but nothing was generated, `completed` otherwise.
#[derive(Default)]
pub struct SkillRun {
    steps: Vec<StepResult>,
    manifests: Vec<String>,
}

impl SkillRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(
        &mut self,
        name: &str,
        status: StepStatus,
        findings: Vec<Finding>,
        output: Option<String>,
    ) {
        self.steps.push(StepResult {
            step_name: name.to_string(),
            status,
            findings,
            output,
        });
    }

    pub fn passed(&mut self, name: &str, findings: Vec<Finding>) {
        self.step(name, StepStatus::Passed, findings, None);
    }

    pub fn warning(&mut self, name: &str, findings: Vec<Finding>) {
        self.step(name, StepStatus::Warning, findings, None);
    }

    pub fn skipped(&mut self, name: &str, findings: Vec<Finding>) {
        self.step(name, StepStatus::Skipped, findings, None);
    }

    pub fn manifest(&mut self, manifest: String) {
        self.manifests.push(manifest);
    }

    /// Short-circuit the skill: record the failing step and settle as failed.
    pub fn fail(
        mut self,
        skill_name: &str,
        step_name: &str,
        findings: Vec<Finding>,
        summary: impl Into<String>,
    ) -> SkillResult {
        self.step(step_name, StepStatus::Failed, findings, None);
        SkillResult {
            skill_name: skill_name.to_string(),
            status: SkillStatus::Failed,
            steps: self.steps,
            manifests: Vec::new(),
            summary: summary.into(),
        }
    }

    pub fn finish(self, skill_name: &str, summary: impl Into<String>) -> SkillResult {
        let status = if self.manifests.is_empty() {
            SkillStatus::Partial
        } else {
            SkillStatus::Completed
        };
        SkillResult {
            skill_name: skill_name.to_string(),
            status,
            steps: self.steps,
            manifests: self.manifests,
            summary: summary.into(),
        }
    }
}

/// Thread-safe store of skills keyed by name, reconciled against the
/// feature set exactly like the operation registry.
#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<BTreeMap<String, Arc<dyn Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        self.skills.write().await.insert(name.clone(), skill);
        debug!(skill = %name, "skill registered");
    }

    pub async fn unregister(&self, name: &str) {
        if self.skills.write().await.remove(name).is_some() {
            debug!(skill = name, "skill unregistered");
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().await.get(name).cloned()
    }

    /// Snapshot in name order.
    pub async fn list(&self) -> Vec<Arc<dyn Skill>> {
        self.skills.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.skills.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.skills.read().await.is_empty()
    }

    /// Apply the fixed gating table for the current feature set.
    pub async fn sync_with_features(&self, features: &FeatureSet) {
        if features.gateway_api {
            self.register(Arc::new(gateway::ExposeServiceGatewayApi::new(features)))
                .await;
        } else {
            self.unregister(gateway::SKILL_NAME).await;
        }

        if features.istio {
            self.register(Arc::new(istio_mtls::ConfigureIstioMtls::new(features)))
                .await;
        } else {
            self.unregister(istio_mtls::SKILL_NAME).await;
        }

        if features.istio || features.gateway_api {
            self.register(Arc::new(traffic_split::ConfigureTrafficSplit::new(features)))
                .await;
        } else {
            self.unregister(traffic_split::SKILL_NAME).await;
        }

        // Plain NetworkPolicy needs no provider.
        self.register(Arc::new(network_policy::CreateNetworkPolicy)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::compute_from_crds;

    fn features(groups: &[&str]) -> FeatureSet {
        compute_from_crds(
            groups
                .iter()
                .map(|g| (g.to_string(), vec![("v1".to_string(), true)])),
        )
    }

    #[tokio::test]
    async fn test_sync_with_empty_features_keeps_network_policy() {
        let registry = SkillRegistry::new();
        registry.sync_with_features(&FeatureSet::default()).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("create_network_policy").await.is_some());
    }

    #[tokio::test]
    async fn test_sync_gateway_api_enables_two_skills() {
        let registry = SkillRegistry::new();
        registry
            .sync_with_features(&features(&["gateway.networking.k8s.io"]))
            .await;
        assert!(registry.get("expose_service_gateway_api").await.is_some());
        assert!(registry.get("configure_traffic_split").await.is_some());
        assert!(registry.get("configure_istio_mtls").await.is_none());
    }

    #[tokio::test]
    async fn test_sync_transition_removes_skills() {
        let registry = SkillRegistry::new();
        registry
            .sync_with_features(&features(&["networking.istio.io"]))
            .await;
        assert!(registry.get("configure_istio_mtls").await.is_some());
        assert!(registry.get("configure_traffic_split").await.is_some());

        registry.sync_with_features(&FeatureSet::default()).await;
        assert!(registry.get("configure_istio_mtls").await.is_none());
        assert!(registry.get("configure_traffic_split").await.is_none());
        assert!(registry.get("create_network_policy").await.is_some());
    }

    #[test]
    fn test_skill_run_partial_without_manifests() {
        let mut run = SkillRun::new();
        run.passed("check", vec![]);
        let result = run.finish("demo", "done");
        assert_eq!(result.status, SkillStatus::Partial);
    }

    #[test]
    fn test_skill_run_completed_with_manifest() {
        let mut run = SkillRun::new();
        run.passed("check", vec![]);
        run.manifest("apiVersion: v1".to_string());
        let result = run.finish("demo", "done");
        assert_eq!(result.status, SkillStatus::Completed);
        assert_eq!(result.manifests.len(), 1);
    }

    #[test]
    fn test_skill_run_fail_drops_manifests() {
        let mut run = SkillRun::new();
        run.manifest("should not survive".to_string());
        let result = run.fail("demo", "validate", vec![], "bad input");
        assert_eq!(result.status, SkillStatus::Failed);
        assert!(result.manifests.is_empty());
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::Failed);
    }

    #[test]
    fn test_result_serialization_keys() {
        let mut run = SkillRun::new();
        run.passed("inspect", vec![]);
        run.manifest("x".to_string());
        let json = serde_json::to_value(run.finish("demo", "ok")).unwrap();
        assert_eq!(json["skillName"], "demo");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["steps"][0]["stepName"], "inspect");
        assert_eq!(json["steps"][0]["status"], "passed");
    }
}
