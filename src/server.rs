// src/server.rs
// Assembly: wire clients, probes, skills, registry, bridge and discovery
// together, serve until a shutdown signal, then unwind in order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::{ChangeCallback, Discovery, FeatureSet};
use crate::kube::Clients;
use crate::mcp::http::{create_mcp_service, create_router};
use crate::mcp::NetworkMcpServer;
use crate::probe::ProbeManager;
use crate::registry::ToolRegistry;
use crate::skills::SkillRegistry;
use crate::telemetry::Telemetry;
use crate::tools::{self, ToolContext};

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive the registry to exactly the operation set the feature set gates.
pub(crate) async fn reconcile_operations(registry: &ToolRegistry, features: &FeatureSet) {
    let desired = tools::catalog_for(features);
    let desired_names: HashSet<String> = desired.iter().map(|op| op.name.clone()).collect();

    for op in desired {
        registry.register(op).await;
    }
    for existing in registry.snapshot().await {
        if !desired_names.contains(&existing.name) {
            registry.unregister(&existing.name).await;
        }
    }
}

/// Run the server until SIGTERM/ctrl-c.
pub async fn run(config: Config, telemetry: Telemetry) -> Result<()> {
    let config = Arc::new(config);
    let client = kube::Client::try_default()
        .await
        .context("building the cluster client")?;
    let clients = Clients::new(client);

    let probes = Arc::new(ProbeManager::new(clients.clone(), config.clone()));
    let skills = Arc::new(SkillRegistry::new());
    let registry = Arc::new(ToolRegistry::new());
    let ctx = Arc::new(ToolContext {
        config: config.clone(),
        clients: clients.clone(),
        probes: probes.clone(),
        skills: skills.clone(),
    });
    let bridge = NetworkMcpServer::new(registry.clone(), ctx, telemetry.instruments.clone());

    // Discovery's single coupling to the rest of the process: one
    // registry reconciliation and one bridge sync per transition, with the
    // sync observing the fully reconciled registry.
    let callback: ChangeCallback = {
        let registry = registry.clone();
        let skills = skills.clone();
        let bridge = bridge.clone();
        Arc::new(move |features: FeatureSet| {
            let registry = registry.clone();
            let skills = skills.clone();
            let bridge = bridge.clone();
            Box::pin(async move {
                reconcile_operations(&registry, &features).await;
                skills.sync_with_features(&features).await;
                bridge.sync_tools().await;
            })
        })
    };
    let discovery = Arc::new(Discovery::new(clients.clone(), callback));

    // Readiness gate: the initial scan callback runs to completion (and
    // with it the first sync_tools) before the listener opens.
    discovery.bootstrap().await;

    let watch_token = CancellationToken::new();
    let watch_handle = tokio::spawn(discovery.clone().watch(watch_token.clone()));

    let reaper_token = CancellationToken::new();
    let reaper_handle = tokio::spawn(probes.clone().run_reaper(reaper_token.clone()));

    let session_token = CancellationToken::new();
    let router = create_router(
        create_mcp_service(bridge.clone(), session_token.clone()),
        discovery.clone(),
    );
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port))
        .await
        .with_context(|| format!("binding port {}", config.server_port))?;
    info!(
        port = config.server_port,
        cluster = %config.cluster_name,
        tools = bridge.tool_count().await,
        "MCP endpoint serving at /mcp"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Strict unwind: the HTTP server has stopped accepting connections and
    // drained in-flight tool calls; now stop the control loops, then the
    // reaper, then flush telemetry.
    info!("HTTP server stopped, shutting down");
    session_token.cancel();
    watch_token.cancel();
    if tokio::time::timeout(TASK_DRAIN_TIMEOUT, watch_handle).await.is_err() {
        warn!("discovery watch did not stop in time");
    }
    reaper_token.cancel();
    if tokio::time::timeout(TASK_DRAIN_TIMEOUT, reaper_handle).await.is_err() {
        warn!("orphan reaper did not stop in time");
    }
    if let Err(e) = telemetry.shutdown() {
        warn!(error = %e, "telemetry flush incomplete");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler failed"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
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

    async fn registry_names(registry: &ToolRegistry) -> HashSet<String> {
        registry
            .snapshot()
            .await
            .iter()
            .map(|op| op.name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_matches_gated_catalog_exactly() {
        let registry = ToolRegistry::new();

        let f1 = features(&["gateway.networking.k8s.io"]);
        reconcile_operations(&registry, &f1).await;
        let expected: HashSet<String> = tools::catalog_for(&f1)
            .iter()
            .map(|op| op.name.clone())
            .collect();
        assert_eq!(registry_names(&registry).await, expected);
        assert!(registry.contains("list_gateways").await);

        // transition: gateway api out, istio in
        let f2 = features(&["networking.istio.io"]);
        reconcile_operations(&registry, &f2).await;
        let expected: HashSet<String> = tools::catalog_for(&f2)
            .iter()
            .map(|op| op.name.clone())
            .collect();
        assert_eq!(registry_names(&registry).await, expected);
        assert!(!registry.contains("list_gateways").await);
        assert!(registry.contains("check_istio_mtls").await);
        // always-on survives every transition
        assert!(registry.contains("probe_connectivity").await);
    }

    #[tokio::test]
    async fn test_reconcile_to_empty_keeps_core_only() {
        let registry = ToolRegistry::new();
        reconcile_operations(&registry, &features(&["cilium.io", "kuma.io"])).await;
        reconcile_operations(&registry, &FeatureSet::default()).await;
        let expected: HashSet<String> = tools::catalog_for(&FeatureSet::default())
            .iter()
            .map(|op| op.name.clone())
            .collect();
        assert_eq!(registry_names(&registry).await, expected);
    }
}
