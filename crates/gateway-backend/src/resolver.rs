use std::collections::BTreeMap;

use async_trait::async_trait;
use gateway_core::backend::TargetResolver;
use gateway_core::{GatewayError, NamespaceKey, ServerSpec, Target};

/// Resolves namespaces against the server table from settings.
///
/// Unknown servers resolve to a target without connection parameters.
pub struct SettingsResolver {
    servers: BTreeMap<String, ServerSpec>,
}

impl SettingsResolver {
    pub fn new(servers: BTreeMap<String, ServerSpec>) -> Self {
        let servers = servers
            .into_iter()
            .map(|(name, spec)| (name.to_lowercase(), spec))
            .collect();
        Self { servers }
    }
}

#[async_trait]
impl TargetResolver for SettingsResolver {
    async fn resolve(&self, key: &NamespaceKey) -> Result<Target, GatewayError> {
        Ok(Target {
            key: key.clone(),
            connection: self.servers.get(key.server()).cloned(),
        })
    }
}
