// src/kube.rs
// Injected cluster client handles
//
// The core never constructs clients itself: one `kube::Client` is built at
// assembly time and handed in here. This wrapper exposes the three surfaces
// the core consumes - dynamic GVR reads, typed core-object reads, and the
// API-group discovery listing.

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroupList;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;

/// A group/kind/plural triple identifying a watched resource type.
/// The served version is supplied at registration time by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gvr {
    pub group: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl Gvr {
    pub const fn new(group: &'static str, kind: &'static str, plural: &'static str) -> Self {
        Self { group, kind, plural }
    }

    /// Bind this triple to a concrete served version.
    pub fn api_resource(&self, version: &str) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(self.group, version, self.kind),
            self.plural,
        )
    }
}

/// Cluster access handles shared by operations, discovery, skills and probes.
#[derive(Clone)]
pub struct Clients {
    client: Client,
}

impl Clients {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Dynamic API scoped to a namespace, or cluster-wide when `None`.
    pub fn dynamic(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    pub fn crds(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    pub fn services(&self, namespace: Option<&str>) -> Api<Service> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn daemonsets(&self) -> Api<DaemonSet> {
        Api::all(self.client.clone())
    }

    /// API-group discovery listing used by the initial feature scan.
    pub async fn api_groups(&self) -> kube::Result<APIGroupList> {
        self.client.list_api_groups().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvr_binds_version() {
        let gvr = Gvr::new("gateway.networking.k8s.io", "HTTPRoute", "httproutes");
        let ar = gvr.api_resource("v1");
        assert_eq!(ar.group, "gateway.networking.k8s.io");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.kind, "HTTPRoute");
        assert_eq!(ar.plural, "httproutes");
        assert_eq!(ar.api_version, "gateway.networking.k8s.io/v1");
    }

    #[test]
    fn test_core_group_gvr() {
        let gvr = Gvr::new("", "Service", "services");
        let ar = gvr.api_resource("v1");
        assert_eq!(ar.api_version, "v1");
    }
}
