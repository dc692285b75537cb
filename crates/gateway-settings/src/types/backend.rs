use serde::{Deserialize, Serialize};

/// How the gateway reaches and prepares backend servers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Timeout for opening an execution connection.
    pub connect_timeout_ms: u64,
    /// Timeout for a single REST call.
    pub request_timeout_ms: u64,
    /// Class that evaluates code on the backend.
    pub stub_class: String,
    /// Source of the stub class, uploaded when the backend lacks it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stub_source_path: Option<String>,
    /// Check for (and install) the stub class before first use.
    pub install_stub: bool,
    /// Atelier REST API version used for document and compile calls.
    pub api_version: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            request_timeout_ms: 30_000,
            stub_class: "PolyglotKernel.CodeExecutor".to_string(),
            stub_source_path: None,
            install_stub: true,
            api_version: 1,
        }
    }
}
