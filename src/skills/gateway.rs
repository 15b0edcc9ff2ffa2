//! src/skills/gateway.rs
//! Expose a service through the Gateway API: reuse the first Gateway found
//! in the cluster, or generate a placeholder one alongside the route.

use async_trait::async_trait;
use kube::api::ListParams;

use crate::discovery::FeatureSet;
use crate::error::McpError;
use crate::kube::Gvr;
use crate::model::{Category, Finding, ResourceRef, Severity};
use crate::utils::{arg_i64, arg_str, require_str, Args};

use super::{Skill, SkillContext, SkillParameter, SkillResult, SkillRun};

pub const SKILL_NAME: &str = "expose_service_gateway_api";

const GATEWAY: Gvr = Gvr::new("gateway.networking.k8s.io", "Gateway", "gateways");
/// ReferenceGrant has not graduated past beta.
const REFERENCE_GRANT_VERSION: &str = "v1beta1";
const PLACEHOLDER_GATEWAY_CLASS: &str = "replace-with-your-gateway-class";

pub struct ExposeServiceGatewayApi {
    gateway_version: String,
}

impl ExposeServiceGatewayApi {
    pub fn new(features: &FeatureSet) -> Self {
        Self {
            gateway_version: features
                .version_or("gateway.networking.k8s.io", "v1")
                .to_string(),
        }
    }
}

#[async_trait]
impl Skill for ExposeServiceGatewayApi {
    fn name(&self) -> &'static str {
        SKILL_NAME
    }

    fn description(&self) -> &'static str {
        "Expose a service via Gateway API: generate an HTTPRoute or GRPCRoute, \
         plus a Gateway and ReferenceGrant when needed"
    }

    fn required_crds(&self) -> &'static [&'static str] {
        &[
            "gateways.gateway.networking.k8s.io",
            "httproutes.gateway.networking.k8s.io",
        ]
    }

    fn parameters(&self) -> Vec<SkillParameter> {
        vec![
            SkillParameter::new("service", "string", true, "Service to expose"),
            SkillParameter::new("namespace", "string", false, "Service namespace"),
            SkillParameter::new("port", "integer", false, "Backend port; defaults to the first service port"),
            SkillParameter::new("hostname", "string", false, "Hostname to match on the route"),
            SkillParameter::new(
                "protocol",
                "string",
                false,
                "HTTP or GRPC (default HTTP); GRPC generates a GRPCRoute",
            ),
        ]
    }

    async fn execute(&self, ctx: &SkillContext, args: &Args) -> Result<SkillResult, McpError> {
        let service = require_str(args, "service", SKILL_NAME)?;
        let namespace = arg_str(args, "namespace")
            .or(ctx.config.default_namespace.as_deref())
            .unwrap_or("default");
        let hostname = arg_str(args, "hostname");
        let protocol = arg_str(args, "protocol").unwrap_or("HTTP").to_uppercase();
        let route_kind = match protocol.as_str() {
            "HTTP" => "HTTPRoute",
            "GRPC" => "GRPCRoute",
            other => {
                return Err(McpError::invalid_input(
                    SKILL_NAME,
                    format!("protocol must be HTTP or GRPC, got \"{other}\""),
                ))
            }
        };

        let mut run = SkillRun::new();

        // check_service
        let port = match ctx.clients.services(Some(namespace)).get(service).await {
            Ok(svc) => {
                let first_port = svc
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.ports.as_ref())
                    .and_then(|ports| ports.first())
                    .map(|p| i64::from(p.port));
                let port = arg_i64(args, "port").or(first_port).unwrap_or(80);
                run.passed(
                    "check_service",
                    vec![Finding::new(
                        Severity::Ok,
                        Category::Routing,
                        format!("service {namespace}/{service} exists, exposing port {port}"),
                    )
                    .with_resource(
                        ResourceRef::new("Service", service).in_namespace(namespace),
                    )],
                );
                port
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let summary = format!("service {namespace}/{service} not found");
                let finding = Finding::new(Severity::Critical, Category::Routing, &summary)
                    .with_suggestion("create the service before exposing it");
                return Ok(run.fail(SKILL_NAME, "check_service", vec![finding], summary));
            }
            Err(e) => return Err(McpError::internal(SKILL_NAME, e)),
        };

        // find_gateway: first existing Gateway, in (namespace, name) order so
        // repeated runs attach to the same one
        let gateways = ctx
            .clients
            .dynamic(&GATEWAY.api_resource(&self.gateway_version), None)
            .list(&ListParams::default())
            .await
            .map_err(|e| McpError::internal(SKILL_NAME, e))?;
        let mut candidates: Vec<(String, String)> = gateways
            .items
            .iter()
            .filter_map(|gw| {
                Some((
                    gw.metadata.namespace.clone()?,
                    gw.metadata.name.clone()?,
                ))
            })
            .collect();
        candidates.sort();
        let existing = candidates.into_iter().next();

        let (gateway_namespace, gateway_name) = match &existing {
            Some((ns, name)) => {
                run.passed(
                    "find_gateway",
                    vec![Finding::new(
                        Severity::Ok,
                        Category::Routing,
                        format!("reusing existing Gateway {ns}/{name}"),
                    )
                    .with_resource(ResourceRef::new("Gateway", name).in_namespace(ns))],
                );
                (ns.clone(), name.clone())
            }
            None => {
                run.warning(
                    "find_gateway",
                    vec![Finding::new(
                        Severity::Warning,
                        Category::Routing,
                        "no Gateway found, generating one with a placeholder class",
                    )
                    .with_suggestion("set gatewayClassName to a class served by your controller")],
                );
                (namespace.to_string(), format!("{service}-gateway"))
            }
        };

        // generate_route
        run.manifest(route_manifest(
            route_kind,
            service,
            namespace,
            port,
            hostname,
            &gateway_name,
            &gateway_namespace,
            &self.gateway_version,
        ));

        // generate_supporting
        if existing.is_none() {
            run.manifest(gateway_manifest(
                &gateway_name,
                &gateway_namespace,
                &self.gateway_version,
            ));
        }
        if gateway_namespace != namespace {
            run.manifest(reference_grant_manifest(
                service,
                namespace,
                &gateway_namespace,
                route_kind,
            ));
        }
        run.passed(
            "generate_manifests",
            vec![Finding::new(
                Severity::Info,
                Category::Routing,
                format!(
                    "generated {route_kind} binding {namespace}/{service}:{port} to Gateway {gateway_namespace}/{gateway_name}"
                ),
            )],
        );

        Ok(run.finish(
            SKILL_NAME,
            format!(
                "service {namespace}/{service} exposed through Gateway {gateway_namespace}/{gateway_name}"
            ),
        ))
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn route_manifest(
    kind: &str,
    service: &str,
    namespace: &str,
    port: i64,
    hostname: Option<&str>,
    gateway_name: &str,
    gateway_namespace: &str,
    api_version: &str,
) -> String {
    let hostnames = hostname
        .map(|h| format!("  hostnames:\n    - {h}\n"))
        .unwrap_or_default();
    format!(
        r#"apiVersion: gateway.networking.k8s.io/{api_version}
kind: {kind}
metadata:
  name: {service}-route
  namespace: {namespace}
spec:
  parentRefs:
    - name: {gateway_name}
      namespace: {gateway_namespace}
{hostnames}  rules:
    - backendRefs:
        - name: {service}
          port: {port}
"#
    )
}

pub(crate) fn gateway_manifest(name: &str, namespace: &str, api_version: &str) -> String {
    format!(
        r#"apiVersion: gateway.networking.k8s.io/{api_version}
kind: Gateway
metadata:
  name: {name}
  namespace: {namespace}
spec:
  gatewayClassName: {PLACEHOLDER_GATEWAY_CLASS}
  listeners:
    - name: http
      port: 80
      protocol: HTTP
      allowedRoutes:
        namespaces:
          from: All
"#
    )
}

fn reference_grant_manifest(
    service: &str,
    service_namespace: &str,
    gateway_namespace: &str,
    route_kind: &str,
) -> String {
    format!(
        r#"apiVersion: gateway.networking.k8s.io/{REFERENCE_GRANT_VERSION}
kind: ReferenceGrant
metadata:
  name: {service}-grant
  namespace: {service_namespace}
spec:
  from:
    - group: gateway.networking.k8s.io
      kind: {route_kind}
      namespace: {gateway_namespace}
  to:
    - group: ""
      kind: Service
      name: {service}
"#
    )
}
