//! Settings types. Every struct deserializes from camelCase JSON and falls
//! back to its `Default` for missing fields.

mod backend;
mod server;

use std::collections::BTreeMap;

use gateway_core::ServerSpec;
use serde::{Deserialize, Serialize};

pub use backend::BackendSettings;
pub use server::{LoggingSettings, ServerSettings};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub logging: LoggingSettings,
    /// Known backend servers, keyed by lower-cased server name.
    pub servers: BTreeMap<String, ServerSpec>,
}

impl GatewaySettings {
    pub fn server(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.get(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = GatewaySettings::default();
        assert_eq!(s.server.port, 50773);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.backend.connect_timeout_ms, 2000);
        assert_eq!(s.backend.stub_class, "PolyglotKernel.CodeExecutor");
        assert_eq!(s.logging.level, "info");
        assert!(s.servers.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(GatewaySettings::default()).unwrap();
        assert!(json["server"]["maxSendQueue"].is_number());
        assert!(json["backend"]["connectTimeoutMs"].is_number());
    }
}
