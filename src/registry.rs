// src/registry.rs
// Thread-safe store of operations keyed by name
//
// The registry knows nothing about feature sets. Consumers (the discovery
// change callback) encode desired state by registering every enabled
// operation and unregistering every disabled one; both calls are idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::tools::Operation;

#[derive(Default)]
pub struct ToolRegistry {
    ops: RwLock<HashMap<String, Arc<Operation>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation, overwriting any prior one of the same name.
    pub async fn register(&self, op: Operation) {
        let name = op.name.clone();
        let replaced = self
            .ops
            .write()
            .await
            .insert(name.clone(), Arc::new(op))
            .is_some();
        debug!(tool = %name, replaced, "operation registered");
    }

    /// Remove an operation. No-op when absent.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.ops.write().await.remove(name).is_some();
        if removed {
            debug!(tool = name, "operation unregistered");
        }
        removed
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Operation>> {
        self.ops.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.ops.read().await.contains_key(name)
    }

    /// Owned snapshot, safe to iterate while mutations proceed.
    pub async fn snapshot(&self) -> Vec<Arc<Operation>> {
        self.ops.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.ops.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ops.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ToolMetadata, ToolResult};
    use crate::tools::SchemaBuilder;

    fn op(name: &str) -> Operation {
        Operation::new(name, "test operation", SchemaBuilder::new().build(), |ctx, _| async move {
            Ok(ToolResult::new(vec![], ToolMetadata::now(&ctx.config.cluster_name)))
        })
    }

    #[tokio::test]
    async fn test_register_overwrites_same_name() {
        let registry = ToolRegistry::new();
        registry.register(op("list_gateways")).await;
        registry.register(op("list_gateways")).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let registry = ToolRegistry::new();
        assert!(!registry.unregister("never_registered").await);
    }

    #[tokio::test]
    async fn test_snapshot_is_independent_of_mutations() {
        let registry = ToolRegistry::new();
        registry.register(op("a")).await;
        registry.register(op("b")).await;
        let snapshot = registry.snapshot().await;
        registry.unregister("a").await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_names_unique_across_registry() {
        let registry = ToolRegistry::new();
        for name in ["x", "y", "x", "z", "y"] {
            registry.register(op(name)).await;
        }
        let mut names: Vec<String> = registry
            .snapshot()
            .await
            .iter()
            .map(|o| o.name.clone())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), registry.len().await);
    }
}
