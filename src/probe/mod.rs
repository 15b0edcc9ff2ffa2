//! src/probe/mod.rs
//! Ephemeral probe lifecycle manager.
//!
//! Runs single-shot diagnostic pods with bounded concurrency and guaranteed
//! cleanup: every created pod is deleted on success, failure, cancellation,
//! timeout or shutdown. Deletion never shares the caller's context - it runs
//! on a detached task with its own 10-second deadline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EmptyDirVolumeSource, Pod, ResourceRequirements, SeccompProfile,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ListParams, LogParams, ObjectMeta, PostParams};
use kube::runtime::watcher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ErrorCode, McpError};
use crate::kube::Clients;

/// Label identifying server-owned pods.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "mcp-k8s-networking";
/// Label identifying the probe kind.
pub const LABEL_PROBE_TYPE: &str = "mcp-probe-type";
/// Annotation carrying the creation timestamp the orphan reaper keys on.
pub const ANNOTATION_CREATED_AT: &str = "mcp-k8s-networking/created-at";

const PROBE_CONTAINER: &str = "probe";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);
const ORPHAN_TTL: Duration = Duration::from_secs(5 * 60);
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
/// Probe output cap; anything beyond is lost and flagged as truncated.
const OUTPUT_CAP_BYTES: i64 = 64 * 1024;

/// Kind of diagnostic a probe pod runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeType {
    Connectivity,
    Dns,
    Http,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Connectivity => "connectivity",
            ProbeType::Dns => "dns",
            ProbeType::Http => "http",
        }
    }
}

/// A request to run one probe pod to completion.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub probe_type: ProbeType,
    /// Namespace override; the configured probe namespace when `None`.
    pub namespace: Option<String>,
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn new(probe_type: ProbeType, command: Vec<String>) -> Self {
        Self {
            probe_type,
            namespace: None,
            command,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn in_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// User-supplied timeout, capped at 30 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(MAX_PROBE_TIMEOUT);
        self
    }
}

/// Outcome of a completed probe pod.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
    /// Output hit the 64 KiB cap; the tail is lost.
    pub truncated: bool,
    pub error: Option<String>,
}

/// Slot accounting for concurrent probes. The limit check and the increment
/// happen under one mutex; a bare atomic cannot keep them consistent.
pub struct SlotCounter {
    running: Mutex<usize>,
    max: usize,
}

impl SlotCounter {
    pub fn new(max: usize) -> Self {
        Self {
            running: Mutex::new(0),
            max,
        }
    }

    /// Claim a slot. Surplus callers are rejected, not queued.
    pub fn acquire(&self) -> Option<SlotPermit<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if *running >= self.max {
            return None;
        }
        *running += 1;
        Some(SlotPermit { counter: self })
    }

    pub fn in_use(&self) -> usize {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its slot exactly once on drop, flooring at zero.
pub struct SlotPermit<'a> {
    counter: &'a SlotCounter,
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        let mut running = self
            .counter
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
    }
}

/// Deletes the probe pod when dropped, on a detached task with a fresh
/// 10-second deadline. Dropping on cancellation, timeout and the normal
/// path all funnel through here, so deletion cannot be skipped.
struct CleanupGuard {
    pods: Api<Pod>,
    name: String,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let pods = self.pods.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match tokio::time::timeout(
                        CLEANUP_TIMEOUT,
                        pods.delete(&name, &DeleteParams::default()),
                    )
                    .await
                    {
                        Ok(Ok(_)) => debug!(pod = %name, "probe pod deleted"),
                        Ok(Err(kube::Error::Api(ae))) if ae.code == 404 => {
                            debug!(pod = %name, "probe pod already gone")
                        }
                        Ok(Err(e)) => warn!(pod = %name, error = %e, "probe pod deletion failed"),
                        Err(_) => warn!(pod = %name, "probe pod deletion timed out"),
                    }
                });
            }
            Err(_) => warn!(pod = %name, "no runtime for probe cleanup, pod left to the reaper"),
        }
    }
}

/// Runs short-lived diagnostic pods and reaps any it loses track of.
pub struct ProbeManager {
    clients: Clients,
    config: Arc<Config>,
    slots: SlotCounter,
    name_counter: AtomicU64,
}

impl ProbeManager {
    pub fn new(clients: Clients, config: Arc<Config>) -> Self {
        let slots = SlotCounter::new(config.max_concurrent_probes);
        Self {
            clients,
            config,
            slots,
            name_counter: AtomicU64::new(0),
        }
    }

    /// Number of probes currently holding a slot.
    pub fn running(&self) -> usize {
        self.slots.in_use()
    }

    /// Run one probe pod to completion. Blocks until the pod terminates or
    /// the probe timeout fires. `tool` attributes errors to the calling
    /// operation.
    pub async fn execute(&self, tool: &str, request: ProbeRequest) -> Result<ProbeResult, McpError> {
        let Some(_slot) = self.slots.acquire() else {
            return Err(McpError::new(
                ErrorCode::ProbeLimitReached,
                tool,
                format!(
                    "probe limit of {} concurrent probes reached, retry shortly",
                    self.config.max_concurrent_probes
                ),
            ));
        };

        let name = self.next_name(request.probe_type);
        let namespace = request
            .namespace
            .clone()
            .unwrap_or_else(|| self.config.probe_namespace.clone());
        let pods = self.clients.pods(&namespace);
        let pod = build_probe_pod(&name, &request, &self.config.probe_image);

        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| McpError::internal(tool, format!("probe pod creation failed: {e}")))?;
        debug!(pod = %name, namespace = %namespace, probe_type = request.probe_type.as_str(), "probe pod created");

        let _cleanup = CleanupGuard {
            pods: pods.clone(),
            name: name.clone(),
        };

        let started = Instant::now();
        match tokio::time::timeout(request.timeout, self.wait(&pods, &name, tool)).await {
            Ok(result) => result.map(|mut r| {
                r.duration = started.elapsed();
                r
            }),
            Err(_) => Err(McpError::new(
                ErrorCode::ProbeTimeout,
                tool,
                format!(
                    "probe did not complete within {}s",
                    request.timeout.as_secs()
                ),
            )
            .with_detail(format!("elapsed: {:.1}s", started.elapsed().as_secs_f64()))),
        }
    }

    /// Collision-free pod name: `mcp-probe-{type}-{unixSeconds}-{counter}`.
    fn next_name(&self, probe_type: ProbeType) -> String {
        let counter = self.name_counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "mcp-probe-{}-{}-{}",
            probe_type.as_str(),
            Utc::now().timestamp(),
            counter
        )
    }

    /// Watch the single pod by field selector until it terminates.
    async fn wait(&self, pods: &Api<Pod>, name: &str, tool: &str) -> Result<ProbeResult, McpError> {
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let stream = watcher(pods.clone(), config);
        futures::pin_mut!(stream);

        loop {
            match stream.next().await {
                Some(Ok(watcher::Event::Apply(pod)))
                | Some(Ok(watcher::Event::InitApply(pod))) => {
                    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
                        Some("Succeeded") => {
                            let (output, truncated) = self.collect_logs(pods, name).await;
                            return Ok(ProbeResult {
                                success: true,
                                output,
                                exit_code: 0,
                                duration: Duration::ZERO,
                                truncated,
                                error: None,
                            });
                        }
                        Some("Failed") => {
                            let (output, truncated) = self.collect_logs(pods, name).await;
                            return Ok(ProbeResult {
                                success: false,
                                output,
                                exit_code: terminated_exit_code(&pod),
                                duration: Duration::ZERO,
                                truncated,
                                error: Some("probe pod failed".to_string()),
                            });
                        }
                        _ => {}
                    }
                }
                Some(Ok(watcher::Event::Delete(_))) => {
                    return Ok(ProbeResult {
                        success: false,
                        output: String::new(),
                        exit_code: 1,
                        duration: Duration::ZERO,
                        truncated: false,
                        error: Some("pod was deleted unexpectedly".to_string()),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(pod = name, error = %e, "probe watch error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                None => {
                    return Err(McpError::internal(tool, "probe pod watch stream closed"));
                }
            }
        }
    }

    /// Logs from the probe container, capped at 64 KiB at the source.
    async fn collect_logs(&self, pods: &Api<Pod>, name: &str) -> (String, bool) {
        let params = LogParams {
            container: Some(PROBE_CONTAINER.to_string()),
            limit_bytes: Some(OUTPUT_CAP_BYTES),
            ..Default::default()
        };
        match pods.logs(name, &params).await {
            Ok(body) => {
                let truncated = body.len() as i64 >= OUTPUT_CAP_BYTES;
                if truncated {
                    warn!(pod = name, "probe output truncated at 64KiB");
                }
                (body, truncated)
            }
            Err(e) => {
                warn!(pod = name, error = %e, "probe log collection failed");
                (String::new(), false)
            }
        }
    }

    /// Background loop deleting labeled pods older than the TTL. Runs on
    /// startup and every 60 seconds until the root context is cancelled.
    pub async fn run_reaper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("probe orphan reaper stopped");
                    return;
                }
                _ = ticker.tick() => self.reap_orphans().await,
            }
        }
    }

    async fn reap_orphans(&self) {
        let pods = self.clients.pods(&self.config.probe_namespace);
        let selector = format!("{LABEL_MANAGED_BY}={MANAGED_BY_VALUE}");
        let list = match pods.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "orphan reaper list failed");
                return;
            }
        };

        for pod in list.items {
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            let created_at = pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_CREATED_AT));
            match created_at.map(|raw| pod_age(raw)) {
                Some(Some(age)) if age > ORPHAN_TTL => {
                    info!(pod = %name, age_secs = age.as_secs(), "reaping orphaned probe pod");
                    if let Err(e) = pods.delete(&name, &DeleteParams::default()).await {
                        warn!(pod = %name, error = %e, "orphan deletion failed");
                    }
                }
                Some(Some(_)) => {}
                // Unparseable or missing annotation: may belong to another
                // process sharing the label, leave it alone.
                Some(None) | None => {
                    warn!(pod = %name, "labeled pod without parseable created-at annotation, skipping");
                }
            }
        }
    }
}

/// Age of a pod per its created-at annotation; `None` when unparseable.
fn pod_age(created_at: &str) -> Option<Duration> {
    let created = chrono::DateTime::parse_from_rfc3339(created_at).ok()?;
    let age = Utc::now().signed_duration_since(created);
    age.to_std().ok()
}

fn terminated_exit_code(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|cs| cs.name == PROBE_CONTAINER))
        .and_then(|cs| cs.state.as_ref())
        .and_then(|state| state.terminated.as_ref())
        .map(|t| t.exit_code)
        .unwrap_or(1)
}

/// Assemble the locked-down single-container pod spec.
fn build_probe_pod(name: &str, request: &ProbeRequest, image: &str) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(
        LABEL_PROBE_TYPE.to_string(),
        request.probe_type.as_str().to_string(),
    );

    let mut annotations = BTreeMap::new();
    annotations.insert(
        ANNOTATION_CREATED_AT.to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    );

    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity("50m".to_string()));
    requests.insert("memory".to_string(), Quantity("32Mi".to_string()));
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity("100m".to_string()));
    limits.insert("memory".to_string(), Quantity("64Mi".to_string()));

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![Container {
                name: PROBE_CONTAINER.to_string(),
                image: Some(image.to_string()),
                command: Some(request.command.clone()),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    limits: Some(limits),
                    ..Default::default()
                }),
                security_context: Some(SecurityContext {
                    run_as_non_root: Some(true),
                    run_as_user: Some(1000),
                    allow_privilege_escalation: Some(false),
                    read_only_root_filesystem: Some(true),
                    capabilities: Some(Capabilities {
                        drop: Some(vec!["ALL".to_string()]),
                        ..Default::default()
                    }),
                    seccomp_profile: Some(SeccompProfile {
                        type_: "RuntimeDefault".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                // The read-only root needs a writable /tmp for probes that
                // stage response bodies.
                volume_mounts: Some(vec![VolumeMount {
                    name: "tmp".to_string(),
                    mount_path: "/tmp".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            volumes: Some(vec![Volume {
                name: "tmp".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_counter_bounds() {
        let slots = SlotCounter::new(2);
        let a = slots.acquire();
        let b = slots.acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(slots.acquire().is_none());
        assert_eq!(slots.in_use(), 2);
        drop(a);
        assert_eq!(slots.in_use(), 1);
        assert!(slots.acquire().is_some());
        drop(b);
        assert_eq!(slots.in_use(), 0);
    }

    #[test]
    fn test_slot_release_floors_at_zero() {
        let slots = SlotCounter::new(1);
        let permit = slots.acquire().unwrap();
        drop(permit);
        assert_eq!(slots.in_use(), 0);
        // another full cycle still behaves
        let permit = slots.acquire().unwrap();
        drop(permit);
        assert_eq!(slots.in_use(), 0);
    }

    #[test]
    fn test_probe_timeout_capped() {
        let req = ProbeRequest::new(ProbeType::Dns, vec!["nslookup".into(), "web".into()])
            .with_timeout(Duration::from_secs(120));
        assert_eq!(req.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_probe_pod_spec_lockdown() {
        let req = ProbeRequest::new(
            ProbeType::Connectivity,
            vec!["sh".into(), "-c".into(), "nc -z web 80".into()],
        );
        let pod = build_probe_pod("mcp-probe-connectivity-1700000000-0", &req, "busybox:1.36");

        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[LABEL_MANAGED_BY], MANAGED_BY_VALUE);
        assert_eq!(labels[LABEL_PROBE_TYPE], "connectivity");

        let created_at = &pod.metadata.annotations.as_ref().unwrap()[ANNOTATION_CREATED_AT];
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers.len(), 1);

        let container = &spec.containers[0];
        assert_eq!(container.name, "probe");
        assert_eq!(container.command.as_ref().unwrap().len(), 3);

        let sc = container.security_context.as_ref().unwrap();
        assert_eq!(sc.run_as_non_root, Some(true));
        assert_eq!(sc.run_as_user, Some(1000));
        assert_eq!(sc.allow_privilege_escalation, Some(false));
        assert_eq!(sc.read_only_root_filesystem, Some(true));
        assert_eq!(
            sc.capabilities.as_ref().unwrap().drop.as_ref().unwrap(),
            &vec!["ALL".to_string()]
        );
        assert_eq!(
            sc.seccomp_profile.as_ref().unwrap().type_,
            "RuntimeDefault"
        );

        // writable /tmp backs the http probe's body capture
        assert_eq!(spec.volumes.as_ref().unwrap()[0].name, "tmp");
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            "/tmp"
        );
    }

    #[test]
    fn test_pod_age_parsing() {
        let recent = Utc::now().to_rfc3339();
        assert!(pod_age(&recent).unwrap() < Duration::from_secs(5));

        let old = (Utc::now() - chrono::Duration::minutes(6)).to_rfc3339();
        assert!(pod_age(&old).unwrap() > ORPHAN_TTL);

        assert!(pod_age("yesterday-ish").is_none());
    }

    #[test]
    fn test_probe_type_wire_forms() {
        assert_eq!(ProbeType::Connectivity.as_str(), "connectivity");
        assert_eq!(ProbeType::Dns.as_str(), "dns");
        assert_eq!(ProbeType::Http.as_str(), "http");
    }
}
