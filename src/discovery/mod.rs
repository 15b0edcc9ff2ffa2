//! src/discovery/mod.rs
//! Watch-driven capability discovery.
//!
//! Computes a [`FeatureSet`] from the CRDs installed in the cluster and
//! invokes a consumer-supplied callback exactly once per observed
//! transition. The initial scan (API-group listing) runs synchronously and
//! gates readiness; afterwards a long-running CRD watch re-lists and
//! recomputes on every create/delete event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ListParams;
use kube::runtime::watcher;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::kube::Clients;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const FAILURE_ESCALATION: Duration = Duration::from_secs(60);

/// Networking providers the server can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GatewayApi,
    Istio,
    Cilium,
    Calico,
    Linkerd,
    Kuma,
    Kgateway,
    Flannel,
}

impl Provider {
    /// Key under which the preferred served version is tracked.
    /// Flannel is not CRD-backed and carries no version.
    pub fn version_key(&self) -> Option<&'static str> {
        match self {
            Provider::GatewayApi => Some("gateway.networking.k8s.io"),
            Provider::Istio => Some("networking.istio.io"),
            Provider::Cilium => Some("cilium.io"),
            Provider::Calico => Some("crd.projectcalico.org"),
            Provider::Linkerd => Some("linkerd.io"),
            Provider::Kuma => Some("kuma.io"),
            Provider::Kgateway => Some("kgateway.dev"),
            Provider::Flannel => None,
        }
    }
}

/// Map a CRD API group to the provider it signals.
/// `kgateway.dev` matches both the bare group and any subgroup.
pub fn classify_group(group: &str) -> Option<Provider> {
    match group {
        "gateway.networking.k8s.io" => Some(Provider::GatewayApi),
        "networking.istio.io" | "security.istio.io" => Some(Provider::Istio),
        "cilium.io" => Some(Provider::Cilium),
        "crd.projectcalico.org" => Some(Provider::Calico),
        "linkerd.io" => Some(Provider::Linkerd),
        "kuma.io" => Some(Provider::Kuma),
        g if g == "kgateway.dev" || g.ends_with(".kgateway.dev") => Some(Provider::Kgateway),
        _ => None,
    }
}

/// Booleans per supported provider plus the preferred served API version
/// detected for each. Equality is component-wise; the set is the sole input
/// to registry and skills reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    pub gateway_api: bool,
    pub istio: bool,
    pub cilium: bool,
    pub calico: bool,
    pub linkerd: bool,
    pub kuma: bool,
    pub kgateway: bool,
    pub flannel: bool,
    /// Provider version key -> preferred served version.
    pub versions: BTreeMap<String, String>,
}

impl FeatureSet {
    pub fn enabled(&self, provider: Provider) -> bool {
        match provider {
            Provider::GatewayApi => self.gateway_api,
            Provider::Istio => self.istio,
            Provider::Cilium => self.cilium,
            Provider::Calico => self.calico,
            Provider::Linkerd => self.linkerd,
            Provider::Kuma => self.kuma,
            Provider::Kgateway => self.kgateway,
            Provider::Flannel => self.flannel,
        }
    }

    fn enable(&mut self, provider: Provider, version: Option<&str>) {
        match provider {
            Provider::GatewayApi => self.gateway_api = true,
            Provider::Istio => self.istio = true,
            Provider::Cilium => self.cilium = true,
            Provider::Calico => self.calico = true,
            Provider::Linkerd => self.linkerd = true,
            Provider::Kuma => self.kuma = true,
            Provider::Kgateway => self.kgateway = true,
            Provider::Flannel => self.flannel = true,
        }
        if let (Some(key), Some(version)) = (provider.version_key(), version) {
            self.versions.insert(key.to_string(), version.to_string());
        }
    }

    /// Preferred served version for a provider key, falling back to the
    /// conventional stable version when the scan did not record one.
    pub fn version_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.versions.get(key).map(String::as_str).unwrap_or(fallback)
    }

    /// One-line rendering for transition logs.
    pub fn summary(&self) -> String {
        let mut enabled = Vec::new();
        for (flag, name) in [
            (self.gateway_api, "gateway-api"),
            (self.istio, "istio"),
            (self.cilium, "cilium"),
            (self.calico, "calico"),
            (self.linkerd, "linkerd"),
            (self.kuma, "kuma"),
            (self.kgateway, "kgateway"),
            (self.flannel, "flannel"),
        ] {
            if flag {
                enabled.push(name);
            }
        }
        if enabled.is_empty() {
            "none".to_string()
        } else {
            enabled.join(",")
        }
    }
}

/// (group, [(version, served)]) signature of one CRD, in manifest order.
pub type CrdSignature = (String, Vec<(String, bool)>);

fn crd_signature(crd: &CustomResourceDefinition) -> CrdSignature {
    (
        crd.spec.group.clone(),
        crd.spec
            .versions
            .iter()
            .map(|v| (v.name.clone(), v.served))
            .collect(),
    )
}

/// Compute a feature set from CRD signatures. Per CRD the first entry with
/// `served=true` wins; across CRDs sharing a provider key the last observed
/// served version wins. Flannel is never derived from CRDs.
pub fn compute_from_crds<I>(crds: I) -> FeatureSet
where
    I: IntoIterator<Item = CrdSignature>,
{
    let mut fs = FeatureSet::default();
    for (group, versions) in crds {
        let Some(provider) = classify_group(&group) else {
            continue;
        };
        let served = versions
            .iter()
            .find(|(_, served)| *served)
            .map(|(name, _)| name.as_str());
        fs.enable(provider, served);
    }
    fs
}

/// Async change callback invoked on every committed transition.
pub type ChangeCallback = Arc<dyn Fn(FeatureSet) -> BoxFuture<'static, ()> + Send + Sync>;

/// The discovery control loop. Owns the committed feature set and the CRD
/// watch; consumers receive transitions only through the callback.
pub struct Discovery {
    clients: Clients,
    committed: RwLock<FeatureSet>,
    ready: AtomicBool,
    on_change: ChangeCallback,
}

impl Discovery {
    pub fn new(clients: Clients, on_change: ChangeCallback) -> Self {
        Self {
            clients,
            committed: RwLock::new(FeatureSet::default()),
            ready: AtomicBool::new(false),
            on_change,
        }
    }

    /// True once the initial scan callback has returned. Health endpoints
    /// consume this predicate.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub async fn current(&self) -> FeatureSet {
        self.committed.read().await.clone()
    }

    /// Run the initial scan and invoke the callback once, synchronously
    /// with respect to the caller. Completion flips the readiness gate;
    /// callers serve traffic only after this returns.
    pub async fn bootstrap(&self) {
        let initial = match self.initial_scan().await {
            Ok(fs) => fs,
            Err(e) => {
                // Best-effort shortcut: the watch-driven rescans converge.
                warn!(error = %e, "initial feature scan failed, starting empty");
                FeatureSet::default()
            }
        };
        info!(features = %initial.summary(), "initial feature scan complete");
        self.commit_and_notify(initial, true).await;
        self.ready.store(true, Ordering::Release);
    }

    /// Watch CRDs until `shutdown` fires. Call after [`Self::bootstrap`].
    pub async fn watch(self: Arc<Self>, shutdown: CancellationToken) {
        self.watch_loop(shutdown).await;
        info!("discovery watch loop stopped");
    }

    /// Fast startup scan from the API-group listing.
    async fn initial_scan(&self) -> kube::Result<FeatureSet> {
        let groups = self.clients.api_groups().await?;
        let mut fs = FeatureSet::default();
        for group in &groups.groups {
            let Some(provider) = classify_group(&group.name) else {
                continue;
            };
            let version = group
                .preferred_version
                .as_ref()
                .map(|v| v.version.as_str())
                .or_else(|| group.versions.first().map(|v| v.version.as_str()));
            fs.enable(provider, version);
        }
        if self.detect_flannel().await {
            fs.enable(Provider::Flannel, None);
        }
        Ok(fs)
    }

    /// Flannel ships no CRDs; its presence is the well-known DaemonSet label.
    async fn detect_flannel(&self) -> bool {
        let params = ListParams::default().labels("app=flannel").limit(1);
        match self.clients.daemonsets().list(&params).await {
            Ok(list) => !list.items.is_empty(),
            Err(e) => {
                debug!(error = %e, "flannel DaemonSet lookup failed, assuming absent");
                false
            }
        }
    }

    /// Full re-list and recompute, committing only on change.
    async fn rescan(&self) {
        let crds = match self.clients.crds().list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "CRD re-list failed, keeping committed feature set");
                return;
            }
        };
        let mut fs = compute_from_crds(crds.iter().map(crd_signature));
        if self.detect_flannel().await {
            fs.enable(Provider::Flannel, None);
        }
        self.commit_and_notify(fs, false).await;
    }

    /// Commit a computed set and invoke the callback when it differs from
    /// the last committed one. The callback runs on the watch task and may
    /// block; feature-set transitions are single-threaded by construction.
    async fn commit_and_notify(&self, fs: FeatureSet, force: bool) {
        {
            let mut committed = self.committed.write().await;
            if !force && *committed == fs {
                return;
            }
            *committed = fs.clone();
        }
        info!(features = %fs.summary(), "feature set transition");
        (self.on_change)(fs).await;
    }

    async fn watch_loop(&self, shutdown: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;
        let mut failing_since: Option<Instant> = None;

        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let stream = watcher(self.clients.crds(), watcher::Config::default());
            futures::pin_mut!(stream);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = stream.next() => match event {
                        Some(Ok(event)) => {
                            backoff = INITIAL_BACKOFF;
                            failing_since = None;
                            if Self::triggers_rescan(&event) {
                                self.rescan().await;
                            }
                        }
                        Some(Err(e)) => {
                            let since = *failing_since.get_or_insert_with(Instant::now);
                            if since.elapsed() >= FAILURE_ESCALATION {
                                warn!(error = %e, "CRD watch failing for over a minute, still reconnecting");
                            } else {
                                debug!(error = %e, backoff_secs = backoff.as_secs(), "CRD watch error");
                            }
                            tokio::select! {
                                _ = shutdown.cancelled() => return,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                        // A closed channel is indistinguishable from a
                        // transient failure: rebuild the watcher.
                        None => break,
                    }
                }
            }
        }
    }

    /// Individual replay events during (re)list are folded into the single
    /// InitDone recompute; live Apply/Delete events each trigger one.
    fn triggers_rescan(event: &watcher::Event<CustomResourceDefinition>) -> bool {
        matches!(
            event,
            watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitDone
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crd(group: &str, versions: &[(&str, bool)]) -> CrdSignature {
        (
            group.to_string(),
            versions
                .iter()
                .map(|(n, s)| (n.to_string(), *s))
                .collect(),
        )
    }

    #[test]
    fn test_classify_known_groups() {
        assert_eq!(
            classify_group("gateway.networking.k8s.io"),
            Some(Provider::GatewayApi)
        );
        assert_eq!(classify_group("networking.istio.io"), Some(Provider::Istio));
        assert_eq!(classify_group("security.istio.io"), Some(Provider::Istio));
        assert_eq!(classify_group("cilium.io"), Some(Provider::Cilium));
        assert_eq!(
            classify_group("crd.projectcalico.org"),
            Some(Provider::Calico)
        );
        assert_eq!(classify_group("linkerd.io"), Some(Provider::Linkerd));
        assert_eq!(classify_group("kuma.io"), Some(Provider::Kuma));
        assert_eq!(classify_group("apps"), None);
    }

    #[test]
    fn test_classify_kgateway_prefix_match() {
        assert_eq!(classify_group("kgateway.dev"), Some(Provider::Kgateway));
        assert_eq!(
            classify_group("gateway.kgateway.dev"),
            Some(Provider::Kgateway)
        );
        assert_eq!(classify_group("kgateway.dev.evil.example"), None);
    }

    #[test]
    fn test_compute_selects_first_served_version() {
        let fs = compute_from_crds(vec![crd(
            "gateway.networking.k8s.io",
            &[("v1alpha2", false), ("v1beta1", true), ("v1", true)],
        )]);
        assert!(fs.gateway_api);
        assert_eq!(
            fs.versions.get("gateway.networking.k8s.io").map(String::as_str),
            Some("v1beta1")
        );
    }

    #[test]
    fn test_compute_last_crd_wins_per_provider_key() {
        let fs = compute_from_crds(vec![
            crd("networking.istio.io", &[("v1alpha3", true)]),
            crd("security.istio.io", &[("v1", true)]),
        ]);
        assert!(fs.istio);
        assert_eq!(
            fs.versions.get("networking.istio.io").map(String::as_str),
            Some("v1")
        );
    }

    #[test]
    fn test_compute_no_served_version_still_enables() {
        let fs = compute_from_crds(vec![crd("cilium.io", &[("v2alpha1", false)])]);
        assert!(fs.cilium);
        assert!(fs.versions.get("cilium.io").is_none());
    }

    #[test]
    fn test_feature_set_equality_is_component_wise() {
        let a = compute_from_crds(vec![crd("cilium.io", &[("v2", true)])]);
        let b = compute_from_crds(vec![crd("cilium.io", &[("v2", true)])]);
        let c = compute_from_crds(vec![crd("cilium.io", &[("v1", true)])]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unknown_groups_ignored() {
        let fs = compute_from_crds(vec![
            crd("monitoring.coreos.com", &[("v1", true)]),
            crd("cert-manager.io", &[("v1", true)]),
        ]);
        assert_eq!(fs, FeatureSet::default());
    }

    #[test]
    fn test_version_or_fallback() {
        let fs = FeatureSet::default();
        assert_eq!(fs.version_or("cilium.io", "v2"), "v2");
    }

    #[test]
    fn test_summary_lists_enabled_providers() {
        let fs = compute_from_crds(vec![
            crd("gateway.networking.k8s.io", &[("v1", true)]),
            crd("kuma.io", &[("v1alpha1", true)]),
        ]);
        assert_eq!(fs.summary(), "gateway-api,kuma");
        assert_eq!(FeatureSet::default().summary(), "none");
    }
}
