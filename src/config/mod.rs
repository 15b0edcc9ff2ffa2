// src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

/// Probe concurrency bounds enforced at load time.
const MAX_CONCURRENT_PROBES_CEILING: usize = 20;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster display name, stamped into every response envelope (CLUSTER_NAME, required).
    pub cluster_name: String,
    /// Port the MCP HTTP endpoint listens on (SERVER_PORT, default 8080).
    pub server_port: u16,
    /// Log level for the fmt subscriber (LOG_LEVEL, default "info").
    pub log_level: String,
    /// Namespace filter applied when a call omits one (DEFAULT_NAMESPACE, optional).
    pub default_namespace: Option<String>,
    /// TTL for discovery-adjacent caches (CACHE_TTL_SECONDS, default 60s).
    pub cache_ttl: Duration,
    /// Per-call deadline for tool dispatch (TOOL_TIMEOUT_SECONDS, default 10s).
    pub tool_timeout: Duration,
    /// Namespace probe pods are created in (PROBE_NAMESPACE, default "default").
    pub probe_namespace: String,
    /// Image reference for probe pods (PROBE_IMAGE, default busybox).
    pub probe_image: String,
    /// Probe slot limit, clamped to [1, 20] (MAX_CONCURRENT_PROBES, default 5).
    pub max_concurrent_probes: usize,
    /// OTLP collector endpoint; presence enables all three signals
    /// (OTEL_EXPORTER_OTLP_ENDPOINT, optional).
    pub otlp_endpoint: Option<String>,
    /// Skip TLS for the OTLP exporter (OTEL_EXPORTER_OTLP_INSECURE).
    pub otlp_insecure: bool,
    /// Service name override for the telemetry resource (OTEL_SERVICE_NAME).
    pub service_name: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Invalid values log a warning and fall back to the default;
    /// only a missing `CLUSTER_NAME` is fatal.
    pub fn from_env() -> Result<Self> {
        let cluster_name = std::env::var("CLUSTER_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("CLUSTER_NAME is required")?;

        let max_concurrent_probes = parse_env("MAX_CONCURRENT_PROBES", 5usize);
        let max_concurrent_probes = if !(1..=MAX_CONCURRENT_PROBES_CEILING).contains(&max_concurrent_probes) {
            warn!(
                value = max_concurrent_probes,
                "MAX_CONCURRENT_PROBES outside [1, 20], using 5"
            );
            5
        } else {
            max_concurrent_probes
        };

        Ok(Self {
            cluster_name,
            server_port: parse_env("SERVER_PORT", 8080u16),
            log_level: read_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            default_namespace: read_var("DEFAULT_NAMESPACE"),
            cache_ttl: Duration::from_secs(parse_env("CACHE_TTL_SECONDS", 60u64)),
            tool_timeout: Duration::from_secs(parse_env("TOOL_TIMEOUT_SECONDS", 10u64)),
            probe_namespace: read_var("PROBE_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            probe_image: read_var("PROBE_IMAGE")
                .unwrap_or_else(|| "busybox:1.36".to_string()),
            max_concurrent_probes,
            otlp_endpoint: read_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            otlp_insecure: read_var("OTEL_EXPORTER_OTLP_INSECURE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            service_name: read_var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| "mcp-k8s-networking".to_string()),
        })
    }
}

/// Read a variable, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a variable, warning and falling back to the default on garbage.
fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match read_var(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "unparseable value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global; these tests only exercise the
    // pure parse helper to stay parallel-safe.

    #[test]
    fn test_parse_env_missing_uses_default() {
        assert_eq!(parse_env("NETMCP_TEST_UNSET_VAR", 42u64), 42);
    }

    #[test]
    fn test_probe_ceiling_constant() {
        assert_eq!(MAX_CONCURRENT_PROBES_CEILING, 20);
    }
}
