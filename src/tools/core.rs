//! src/tools/core.rs
//! Always-on catalog: core Kubernetes networking reads, pod logs, active
//! probes and the skill wrappers. These operations never depend on a
//! provider CRD and survive every feature-set transition.

use std::time::Duration;

use kube::api::{ListParams, LogParams};

use crate::error::McpError;
use crate::kube::Gvr;
use crate::model::{Category, Finding, ResourceRef, Severity, ToolMetadata, ToolResult};
use crate::probe::{ProbeRequest, ProbeResult, ProbeType};
use crate::skills::{SkillContext, SkillResult, SkillStatus, StepStatus};
use crate::utils::{arg_i64, arg_str, require_str, truncate, Args};

use super::factory::{get_operation, list_operation};
use super::{Operation, SchemaBuilder};

const NETWORK_POLICY: Gvr = Gvr::new("networking.k8s.io", "NetworkPolicy", "networkpolicies");

const LOG_TAIL_DEFAULT: i64 = 100;
const LOG_CAP_BYTES: i64 = 64 * 1024;
const PROBE_TIMEOUT_DEFAULT_SECS: i64 = 10;

/// The operations available regardless of installed providers.
pub fn operations() -> Vec<Operation> {
    vec![
        list_services(),
        get_service(),
        list_operation(
            "list_networkpolicies",
            "List core Kubernetes NetworkPolicies",
            NETWORK_POLICY,
            "v1",
            Category::Policy,
            None,
        ),
        get_operation(
            "get_networkpolicy",
            "Get one core Kubernetes NetworkPolicy",
            NETWORK_POLICY,
            "v1",
            Category::Policy,
            None,
        ),
        get_pod_logs(),
        probe_connectivity(),
        probe_dns(),
        probe_http(),
        list_skills(),
        run_skill(),
    ]
}

fn list_services() -> Operation {
    const NAME: &str = "list_services";
    let schema = SchemaBuilder::new()
        .string("namespace", "Namespace to query; all namespaces when omitted", false)
        .build();

    Operation::new(
        NAME,
        "List services with selector and port diagnostics",
        schema,
        move |ctx, args| async move {
            let namespace = ctx.namespace_scope(&args).map(String::from);
            let services = ctx
                .clients
                .services(namespace.as_deref())
                .list(&ListParams::default())
                .await
                .map_err(|e| McpError::internal(NAME, e))?;

            let mut findings = Vec::new();
            for svc in &services.items {
                let name = svc.metadata.name.clone().unwrap_or_default();
                let ns = svc.metadata.namespace.clone().unwrap_or_default();
                let resource = ResourceRef::new("Service", &name).in_namespace(&ns);
                let spec = svc.spec.as_ref();
                let selector_empty = spec
                    .and_then(|s| s.selector.as_ref())
                    .map(|sel| sel.is_empty())
                    .unwrap_or(true);
                let ports = spec
                    .and_then(|s| s.ports.as_ref())
                    .map(|p| p.len())
                    .unwrap_or(0);
                if selector_empty {
                    findings.push(
                        Finding::new(
                            Severity::Warning,
                            Category::Routing,
                            format!("service {ns}/{name} has no selector"),
                        )
                        .with_resource(resource)
                        .with_detail("headless or manually-endpointed services route nowhere unless endpoints are maintained"),
                    );
                } else {
                    findings.push(
                        Finding::new(
                            Severity::Ok,
                            Category::Routing,
                            format!("service {ns}/{name} with {ports} port(s)"),
                        )
                        .with_resource(resource),
                    );
                }
            }
            if findings.is_empty() {
                findings.push(Finding::new(
                    Severity::Info,
                    Category::Routing,
                    format!(
                        "no services in {}",
                        namespace.as_deref().unwrap_or("any namespace")
                    ),
                ));
            }

            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(ns) = namespace {
                meta = meta.in_namespace(ns);
            }
            Ok(ToolResult::new(findings, meta))
        },
    )
}

fn get_service() -> Operation {
    const NAME: &str = "get_service";
    let schema = SchemaBuilder::new()
        .string("name", "Service name", true)
        .string("namespace", "Service namespace", false)
        .build();

    Operation::new(
        NAME,
        "Get one service with its selector and port wiring",
        schema,
        move |ctx, args| async move {
            let target = require_str(&args, "name", NAME)?.to_string();
            let namespace = ctx
                .namespace_scope(&args)
                .unwrap_or("default")
                .to_string();
            let meta =
                ToolMetadata::now(&ctx.config.cluster_name).in_namespace(namespace.clone());

            match ctx.clients.services(Some(&namespace)).get(&target).await {
                Ok(svc) => {
                    let resource =
                        ResourceRef::new("Service", &target).in_namespace(&namespace);
                    let dump = serde_json::to_string_pretty(&svc.spec).unwrap_or_default();
                    let finding = Finding::new(
                        Severity::Info,
                        Category::Routing,
                        format!("service {namespace}/{target} found"),
                    )
                    .with_resource(resource)
                    .with_detail(truncate(&dump, 4096));
                    Ok(ToolResult::new(vec![finding], meta))
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    let finding = Finding::new(
                        Severity::Warning,
                        Category::Routing,
                        format!("service {namespace}/{target} not found"),
                    );
                    Ok(ToolResult::new(vec![finding], meta))
                }
                Err(e) => Err(McpError::internal(NAME, e)),
            }
        },
    )
}

fn get_pod_logs() -> Operation {
    const NAME: &str = "get_pod_logs";
    let schema = SchemaBuilder::new()
        .string("pod", "Pod name", true)
        .string("namespace", "Pod namespace", false)
        .string("container", "Container name; the pod's first container when omitted", false)
        .integer("tail_lines", "Number of trailing lines to return (default 100)")
        .build();

    Operation::new(
        NAME,
        "Fetch the tail of a pod's container logs",
        schema,
        move |ctx, args| async move {
            let pod = require_str(&args, "pod", NAME)?.to_string();
            let namespace = ctx
                .namespace_scope(&args)
                .unwrap_or("default")
                .to_string();
            let params = LogParams {
                container: arg_str(&args, "container").map(String::from),
                tail_lines: Some(arg_i64(&args, "tail_lines").unwrap_or(LOG_TAIL_DEFAULT)),
                limit_bytes: Some(LOG_CAP_BYTES),
                ..Default::default()
            };

            let meta =
                ToolMetadata::now(&ctx.config.cluster_name).in_namespace(namespace.clone());
            match ctx.clients.pods(&namespace).logs(&pod, &params).await {
                Ok(body) => {
                    let finding = Finding::new(
                        Severity::Info,
                        Category::Logs,
                        format!("logs for {namespace}/{pod}"),
                    )
                    .with_resource(ResourceRef::new("Pod", &pod).in_namespace(&namespace))
                    .with_detail(body);
                    Ok(ToolResult::new(vec![finding], meta))
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    let finding = Finding::new(
                        Severity::Warning,
                        Category::Logs,
                        format!("pod {namespace}/{pod} not found"),
                    );
                    Ok(ToolResult::new(vec![finding], meta))
                }
                Err(e) => Err(McpError::internal(NAME, e)),
            }
        },
    )
}

/// Reject values that could escape the probe's shell command line.
fn validate_shell_token(value: &str, tool: &str, what: &str) -> Result<(), McpError> {
    let forbidden = |c: char| {
        c.is_whitespace() || matches!(c, '\'' | '"' | ';' | '&' | '|' | '$' | '`' | '(' | ')' | '<' | '>')
    };
    if value.is_empty() || value.chars().any(forbidden) {
        return Err(McpError::invalid_input(
            tool,
            format!("{what} contains characters that are not allowed"),
        ));
    }
    Ok(())
}

fn connectivity_command(host: &str, port: i64, timeout_secs: i64) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("nc -z -v -w {timeout_secs} {host} {port}"),
    ]
}

fn dns_command(name: &str) -> Vec<String> {
    vec!["nslookup".to_string(), name.to_string()]
}

fn http_command(url: &str, timeout_secs: i64) -> Vec<String> {
    // /tmp is an emptyDir in the probe pod spec, so staging the body there
    // works despite the read-only root filesystem.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("wget -S -O /tmp/body -T {timeout_secs} {url} 2>&1 && head -c 1024 /tmp/body"),
    ]
}

fn probe_timeout(args: &Args) -> Duration {
    let secs = arg_i64(args, "timeout_seconds")
        .unwrap_or(PROBE_TIMEOUT_DEFAULT_SECS)
        .clamp(1, 30);
    Duration::from_secs(secs as u64)
}

/// Render a probe outcome as findings.
fn probe_findings(
    result: &ProbeResult,
    category: Category,
    target: &str,
    on_failure: &str,
) -> Vec<Finding> {
    let mut detail = result.output.clone();
    if result.truncated {
        detail.push_str("\n[output truncated at 64KiB]");
    }
    if let Some(error) = &result.error {
        detail.push_str(&format!("\nerror: {error}"));
    }
    detail.push_str(&format!(
        "\nexit code: {}, duration: {:.1}s",
        result.exit_code,
        result.duration.as_secs_f64()
    ));

    let finding = if result.success {
        Finding::new(Severity::Ok, category, format!("{target} succeeded"))
    } else {
        Finding::new(Severity::Critical, category, format!("{target} failed"))
            .with_suggestion(on_failure)
    };
    vec![finding.with_detail(detail)]
}

fn probe_connectivity() -> Operation {
    const NAME: &str = "probe_connectivity";
    let schema = SchemaBuilder::new()
        .string("host", "Host or service DNS name to reach", true)
        .integer("port", "TCP port to connect to")
        .string("namespace", "Namespace to run the probe pod in", false)
        .integer("timeout_seconds", "Probe timeout in seconds (default 10, max 30)")
        .build();

    Operation::new(
        NAME,
        "Run a TCP connectivity probe from inside the cluster",
        schema,
        move |ctx, args| async move {
            let host = require_str(&args, "host", NAME)?.to_string();
            validate_shell_token(&host, NAME, "host")?;
            let port = arg_i64(&args, "port")
                .ok_or_else(|| McpError::invalid_input(NAME, "missing required argument: port"))?;
            if !(1..=65535).contains(&port) {
                return Err(McpError::invalid_input(NAME, "port must be in 1..=65535"));
            }
            let timeout = probe_timeout(&args);
            let namespace = arg_str(&args, "namespace").map(String::from);

            let request = ProbeRequest::new(
                ProbeType::Connectivity,
                connectivity_command(&host, port, timeout.as_secs() as i64),
            )
            .in_namespace(namespace.clone())
            .with_timeout(timeout);
            let result = ctx.probes.execute(NAME, request).await?;

            let findings = probe_findings(
                &result,
                Category::Connectivity,
                &format!("TCP connect to {host}:{port}"),
                "check the target service, its endpoints, and NetworkPolicies in between",
            );
            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(ns) = namespace {
                meta = meta.in_namespace(ns);
            }
            Ok(ToolResult::new(findings, meta))
        },
    )
}

fn probe_dns() -> Operation {
    const NAME: &str = "probe_dns";
    let schema = SchemaBuilder::new()
        .string("name", "DNS name to resolve", true)
        .string("namespace", "Namespace to run the probe pod in", false)
        .integer("timeout_seconds", "Probe timeout in seconds (default 10, max 30)")
        .build();

    Operation::new(
        NAME,
        "Resolve a DNS name from inside the cluster",
        schema,
        move |ctx, args| async move {
            let name = require_str(&args, "name", NAME)?.to_string();
            validate_shell_token(&name, NAME, "name")?;
            let timeout = probe_timeout(&args);
            let namespace = arg_str(&args, "namespace").map(String::from);

            let request = ProbeRequest::new(ProbeType::Dns, dns_command(&name))
                .in_namespace(namespace.clone())
                .with_timeout(timeout);
            let result = ctx.probes.execute(NAME, request).await?;

            let findings = probe_findings(
                &result,
                Category::Dns,
                &format!("DNS resolution of {name}"),
                "check CoreDNS pods and the namespace's DNS policy",
            );
            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(ns) = namespace {
                meta = meta.in_namespace(ns);
            }
            Ok(ToolResult::new(findings, meta))
        },
    )
}

fn probe_http() -> Operation {
    const NAME: &str = "probe_http";
    let schema = SchemaBuilder::new()
        .string("url", "HTTP or HTTPS URL to fetch", true)
        .string("namespace", "Namespace to run the probe pod in", false)
        .integer("timeout_seconds", "Probe timeout in seconds (default 10, max 30)")
        .build();

    Operation::new(
        NAME,
        "Fetch a URL from inside the cluster, reporting status and headers",
        schema,
        move |ctx, args| async move {
            let url = require_str(&args, "url", NAME)?.to_string();
            validate_shell_token(&url, NAME, "url")?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(McpError::invalid_input(
                    NAME,
                    "url must start with http:// or https://",
                ));
            }
            let timeout = probe_timeout(&args);
            let namespace = arg_str(&args, "namespace").map(String::from);

            let request = ProbeRequest::new(
                ProbeType::Http,
                http_command(&url, timeout.as_secs() as i64),
            )
            .in_namespace(namespace.clone())
            .with_timeout(timeout);
            let result = ctx.probes.execute(NAME, request).await?;

            let findings = probe_findings(
                &result,
                Category::Connectivity,
                &format!("HTTP fetch of {url}"),
                "check the backing service, routes and any mesh policy on the path",
            );
            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(ns) = namespace {
                meta = meta.in_namespace(ns);
            }
            Ok(ToolResult::new(findings, meta))
        },
    )
}

fn list_skills() -> Operation {
    const NAME: &str = "list_skills";

    Operation::new(
        NAME,
        "List the registered skills and their parameters",
        SchemaBuilder::new().build(),
        move |ctx, _args| async move {
            let skills = ctx.skills.list().await;
            let mut findings = Vec::with_capacity(skills.len());
            for skill in &skills {
                let params = serde_json::to_string_pretty(&skill.parameters()).unwrap_or_default();
                findings.push(
                    Finding::new(
                        Severity::Info,
                        Category::Skill,
                        format!("{}: {}", skill.name(), skill.description()),
                    )
                    .with_detail(format!("parameters:\n{params}")),
                );
            }
            if findings.is_empty() {
                findings.push(Finding::new(
                    Severity::Info,
                    Category::Skill,
                    "no skills registered",
                ));
            }
            Ok(ToolResult::new(
                findings,
                ToolMetadata::now(&ctx.config.cluster_name),
            ))
        },
    )
}

/// Map a finished skill run onto the finding contract: the steps' findings
/// flattened, a status summary, and the manifests as a suggestion.
fn skill_result_findings(result: &SkillResult) -> Vec<Finding> {
    let mut findings = Vec::new();
    for step in &result.steps {
        findings.extend(step.findings.iter().cloned());
        if step.findings.is_empty() {
            let severity = match step.status {
                StepStatus::Passed => Severity::Ok,
                StepStatus::Failed => Severity::Critical,
                StepStatus::Warning => Severity::Warning,
                StepStatus::Skipped => Severity::Info,
            };
            findings.push(Finding::new(
                severity,
                Category::Skill,
                format!("step {} {:?}", step.step_name, step.status),
            ));
        }
    }

    let severity = match result.status {
        SkillStatus::Completed => Severity::Ok,
        SkillStatus::Partial => Severity::Info,
        SkillStatus::Failed => Severity::Critical,
    };
    let mut summary = Finding::new(severity, Category::Skill, result.summary.clone())
        .with_detail(serde_json::to_string_pretty(result).unwrap_or_default());
    if !result.manifests.is_empty() {
        summary = summary.with_suggestion(result.manifests.join("---\n"));
    }
    findings.push(summary);
    findings
}

fn run_skill() -> Operation {
    const NAME: &str = "run_skill";
    let schema = SchemaBuilder::new()
        .string("skill", "Skill name, as returned by list_skills", true)
        .string("service", "Service parameter, for skills that take one", false)
        .string("namespace", "Namespace parameter", false)
        .string("versions", "Comma-separated versions (configure_traffic_split)", false)
        .string("weights", "Comma-separated weights (configure_traffic_split)", false)
        .string("mode", "mTLS mode (configure_istio_mtls)", false)
        .string("allowed_sources", "Allowed source namespaces (create_network_policy)", false)
        .string("hostname", "Hostname (expose_service_gateway_api)", false)
        .string("protocol", "HTTP or GRPC (expose_service_gateway_api)", false)
        .integer("port", "Port parameter")
        .build();

    Operation::new(
        NAME,
        "Run a multi-step skill and return its findings and generated manifests",
        schema,
        move |ctx, args| async move {
            let skill_name = require_str(&args, "skill", NAME)?.to_string();
            let Some(skill) = ctx.skills.get(&skill_name).await else {
                let available: Vec<String> = ctx
                    .skills
                    .list()
                    .await
                    .iter()
                    .map(|s| s.name().to_string())
                    .collect();
                return Err(McpError::invalid_input(
                    NAME,
                    format!(
                        "unknown skill \"{skill_name}\"; available: {}",
                        available.join(", ")
                    ),
                ));
            };

            let skill_ctx = SkillContext {
                clients: ctx.clients.clone(),
                config: ctx.config.clone(),
            };
            let result = skill.execute(&skill_ctx, &args).await?;

            let findings = skill_result_findings(&result);
            let mut meta = ToolMetadata::now(&ctx.config.cluster_name);
            if let Some(ns) = arg_str(&args, "namespace") {
                meta = meta.in_namespace(ns);
            }
            Ok(ToolResult::new(findings, meta))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{SkillRun, StepStatus};

    #[test]
    fn test_operation_names_are_stable() {
        let names: Vec<String> = operations().iter().map(|op| op.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                "list_services",
                "get_service",
                "list_networkpolicies",
                "get_networkpolicy",
                "get_pod_logs",
                "probe_connectivity",
                "probe_dns",
                "probe_http",
                "list_skills",
                "run_skill",
            ]
        );
    }

    #[test]
    fn test_core_operations_are_unscoped() {
        assert!(operations().iter().all(|op| op.provider.is_none()));
    }

    #[test]
    fn test_connectivity_command_shape() {
        let cmd = connectivity_command("web.shop.svc", 8080, 5);
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[1], "-c");
        assert_eq!(cmd[2], "nc -z -v -w 5 web.shop.svc 8080");
    }

    #[test]
    fn test_dns_command_is_argv_not_shell() {
        assert_eq!(dns_command("web.shop"), vec!["nslookup", "web.shop"]);
    }

    #[test]
    fn test_http_command_stages_body_in_tmp() {
        let cmd = http_command("http://web.shop/healthz", 10);
        assert!(cmd[2].contains("-O /tmp/body"));
        assert!(cmd[2].contains("head -c 1024 /tmp/body"));
    }

    #[test]
    fn test_validate_shell_token_rejects_injection() {
        assert!(validate_shell_token("web.shop.svc", "probe_dns", "name").is_ok());
        for bad in ["a b", "x;rm", "$(boom)", "a|b", "a'b", "", "a>b"] {
            let err = validate_shell_token(bad, "probe_dns", "name").unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::InvalidInput, "{bad:?}");
        }
    }

    #[test]
    fn test_probe_findings_failure_is_critical() {
        let result = ProbeResult {
            success: false,
            output: "connect timed out".to_string(),
            exit_code: 1,
            duration: Duration::from_secs(3),
            truncated: true,
            error: None,
        };
        let findings = probe_findings(&result, Category::Connectivity, "TCP connect", "check");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        let detail = findings[0].detail.as_ref().unwrap();
        assert!(detail.contains("truncated at 64KiB"));
        assert!(detail.contains("exit code: 1"));
    }

    #[test]
    fn test_skill_result_findings_flatten_steps_and_manifests() {
        let mut run = SkillRun::new();
        run.passed(
            "check",
            vec![Finding::new(Severity::Ok, Category::Routing, "service exists")],
        );
        run.step("note", StepStatus::Skipped, vec![], None);
        run.manifest("apiVersion: v1\n".to_string());
        let result = run.finish("demo", "all done");

        let findings = skill_result_findings(&result);
        // one per step-finding, one synthesized for the empty step, one summary
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].summary, "service exists");
        let summary = findings.last().unwrap();
        assert_eq!(summary.severity, Severity::Ok);
        assert!(summary.suggestion.as_ref().unwrap().contains("apiVersion: v1"));
    }

    #[test]
    fn test_failed_skill_summary_is_critical() {
        let run = SkillRun::new();
        let result = run.fail("demo", "validate", vec![], "weights mismatch");
        let findings = skill_result_findings(&result);
        assert_eq!(findings.last().unwrap().severity, Severity::Critical);
        assert!(findings.last().unwrap().suggestion.is_none());
    }
}
