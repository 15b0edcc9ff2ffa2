//! src/model/mod.rs
//! Diagnostic finding model: the universal structured output contract.
//!
//! Every operation returns a [`ToolResult`] — a list of [`Finding`]s plus
//! response metadata. Findings are projected to a compact form (severity,
//! category, resource, summary) unless the caller asked for detail.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// How serious a finding is. `Ok` is an affirmative health signal,
/// not the absence of findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    Ok,
}

impl Severity {
    /// Stable wire form, used as a metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Ok => "ok",
        }
    }
}

/// Diagnostic domain a finding belongs to.
///
/// `Skill` is a documented extension beyond the seven base categories,
/// carried by findings describing the skills engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Routing,
    Dns,
    Tls,
    Policy,
    Mesh,
    Connectivity,
    Logs,
    Skill,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Routing => "routing",
            Category::Dns => "dns",
            Category::Tls => "tls",
            Category::Policy => "policy",
            Category::Mesh => "mesh",
            Category::Connectivity => "connectivity",
            Category::Logs => "logs",
            Category::Skill => "skill",
        }
    }
}

/// Reference to the cluster object a finding is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            name: name.into(),
            api_version: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }
}

/// The atomic unit of diagnostic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, category: Category, summary: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            resource: None,
            summary: summary.into(),
            detail: None,
            suggestion: None,
        }
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Compact copy: severity, category, resource and summary survive;
    /// detail and suggestion are stripped.
    fn compact(&self) -> Finding {
        Finding {
            severity: self.severity,
            category: self.category,
            resource: self.resource.clone(),
            summary: self.summary.clone(),
            detail: None,
            suggestion: None,
        }
    }
}

/// Compact/detail projection. With `detail=true` the input passes through
/// unchanged; otherwise a new list is returned with `detail` and
/// `suggestion` stripped. Never mutates in place.
pub fn filter_findings(findings: &[Finding], detail: bool) -> Vec<Finding> {
    if detail {
        findings.to_vec()
    } else {
        findings.iter().map(Finding::compact).collect()
    }
}

/// Metadata attached to every response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    #[serde(rename = "clusterName")]
    pub cluster_name: String,
    #[serde(rename = "timestampUTC")]
    pub timestamp_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ToolMetadata {
    /// Stamp metadata at response-assembly time (not operation entry).
    pub fn now(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            timestamp_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            namespace: None,
            provider: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// The response envelope every operation produces.
///
/// Operations report failure by returning an `McpError` instead of an
/// envelope; the protocol bridge marks that result error-flagged on the
/// wire, so the envelope itself carries no error bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub findings: Vec<Finding>,
    pub metadata: ToolMetadata,
}

impl ToolResult {
    pub fn new(findings: Vec<Finding>, metadata: ToolMetadata) -> Self {
        Self { findings, metadata }
    }

    /// Apply the compact/detail projection to the contained findings.
    pub fn project(mut self, detail: bool) -> Self {
        self.findings = filter_findings(&self.findings, detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Finding {
        Finding::new(Severity::Warning, Category::Routing, "no backends")
            .with_resource(ResourceRef::new("Service", "web").in_namespace("shop"))
            .with_detail("selector matches 0 pods")
            .with_suggestion("check labels")
    }

    #[test]
    fn test_severity_wire_form() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(serde_json::to_string(&Severity::Ok).unwrap(), "\"ok\"");
        assert_eq!(Severity::Warning.as_str(), "warning");
    }

    #[test]
    fn test_compact_projection_strips_detail_and_suggestion() {
        let projected = filter_findings(&[sample()], false);
        assert_eq!(projected.len(), 1);
        let f = &projected[0];
        assert!(f.detail.is_none());
        assert!(f.suggestion.is_none());
        assert_eq!(f.severity, Severity::Warning);
        assert_eq!(f.category, Category::Routing);
        assert_eq!(f.summary, "no backends");
        assert_eq!(f.resource.as_ref().unwrap().name, "web");
    }

    #[test]
    fn test_compact_fields_absent_from_json() {
        let projected = filter_findings(&[sample()], false);
        let json = serde_json::to_string(&projected[0]).unwrap();
        assert!(!json.contains("detail"));
        assert!(!json.contains("suggestion"));
        assert!(json.contains("\"summary\":\"no backends\""));
    }

    #[test]
    fn test_detail_projection_is_identity() {
        let input = vec![sample()];
        assert_eq!(filter_findings(&input, true), input);
    }

    #[test]
    fn test_projection_idempotent() {
        let input = vec![sample()];
        let once = filter_findings(&filter_findings(&input, true), false);
        assert_eq!(once, filter_findings(&input, false));
    }

    #[test]
    fn test_projection_does_not_mutate_input() {
        let input = vec![sample()];
        let _ = filter_findings(&input, false);
        assert!(input[0].detail.is_some());
        assert!(input[0].suggestion.is_some());
    }

    #[test]
    fn test_metadata_timestamp_is_rfc3339_utc() {
        let meta = ToolMetadata::now("test-cluster");
        assert!(meta.timestamp_utc.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&meta.timestamp_utc).is_ok());
    }

    #[test]
    fn test_result_envelope_serialization() {
        let result = ToolResult::new(
            vec![sample()],
            ToolMetadata::now("prod").with_provider("istio"),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["metadata"]["clusterName"], "prod");
        assert_eq!(json["metadata"]["provider"], "istio");
    }
}
