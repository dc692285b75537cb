//! Namespace key → registry, created on first use.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use gateway_core::backend::{BackendConnector, Bootstrapper, TargetResolver};
use gateway_core::{GatewayError, NamespaceKey};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::registry::NamespaceRegistry;

type Slot = Arc<OnceCell<Arc<NamespaceRegistry>>>;

/// Owns every namespace registry of the gateway.
///
/// Resolution and bootstrap run once per key; concurrent first callers wait
/// on the same cell. A failed attempt leaves the cell empty so the next
/// caller retries.
pub struct NamespaceDirectory {
    resolver: Arc<dyn TargetResolver>,
    bootstrapper: Arc<dyn Bootstrapper>,
    connector: Arc<dyn BackendConnector>,
    slots: DashMap<NamespaceKey, Slot>,
}

impl NamespaceDirectory {
    pub fn new(
        resolver: Arc<dyn TargetResolver>,
        bootstrapper: Arc<dyn Bootstrapper>,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        Self {
            resolver,
            bootstrapper,
            connector,
            slots: DashMap::new(),
        }
    }

    /// Registry for `key`, resolving and bootstrapping it on first use.
    #[instrument(skip(self), fields(ns = %key))]
    pub async fn registry(&self, key: &NamespaceKey) -> Result<Arc<NamespaceRegistry>, GatewayError> {
        let slot = self.slots.entry(key.clone()).or_default().clone();
        let registry = slot
            .get_or_try_init(|| async {
                let target = self.resolver.resolve(key).await?;
                if !target.is_executable() {
                    return Err(GatewayError::TargetUnresolved(format!(
                        "Server '{}' not defined.",
                        target.server()
                    )));
                }
                self.bootstrapper.ensure_support(&target).await?;
                info!("namespace ready");
                Ok(Arc::new(NamespaceRegistry::new(target, self.connector.clone())))
            })
            .await
            .inspect_err(|e| warn!(error = %e, "namespace resolution failed"))?;
        Ok(registry.clone())
    }

    /// Registry for `key` if one has already been created.
    pub fn get(&self, key: &NamespaceKey) -> Option<Arc<NamespaceRegistry>> {
        self.slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Drop the registry for `key`, shutting down its kernels.
    pub async fn invalidate(&self, key: &NamespaceKey) -> bool {
        let Some((_, slot)) = self.slots.remove(key) else {
            return false;
        };
        match slot.get() {
            Some(registry) => {
                registry.dispose().await;
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<NamespaceKey> {
        let mut keys: Vec<NamespaceKey> = self
            .slots
            .iter()
            .filter(|slot| slot.value().initialized())
            .map(|slot| slot.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn dispose_all(&self) {
        let keys: Vec<NamespaceKey> = self.slots.iter().map(|s| s.key().clone()).collect();
        let registries: Vec<Arc<NamespaceRegistry>> = keys
            .iter()
            .filter_map(|key| self.slots.remove(key))
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();
        join_all(registries.iter().map(|r| r.dispose())).await;
        info!(namespaces = registries.len(), "all namespaces disposed");
    }
}
