//! Kernel, session and kernelspec model exposed over the Jupyter REST API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{KernelId, SessionId};
use crate::namespace::NamespaceKey;

/// Kernel name that denotes a disabled or unsupported kernelspec.
pub const DISABLED_KERNEL: &str = "none";

/// Language token understood by the backend's code executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendLanguage {
    ObjectScript,
    Python,
    Sql,
}

impl BackendLanguage {
    pub fn token(self) -> &'static str {
        match self {
            Self::ObjectScript => "cos",
            Self::Python => "python",
            Self::Sql => "sql",
        }
    }
}

/// The kernel flavors offered for every namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelFlavor {
    Polyglot,
    ObjectScript,
    Python,
    Sql,
}

impl KernelFlavor {
    pub const ALL: [Self; 4] = [Self::Polyglot, Self::ObjectScript, Self::Python, Self::Sql];

    pub fn name(self) -> &'static str {
        match self {
            Self::Polyglot => "iris-polyglot",
            Self::ObjectScript => "iris-objectscript",
            Self::Python => "iris-python",
            Self::Sql => "iris-sql",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Language reported in the kernelspec.
    pub fn spec_language(self) -> &'static str {
        match self {
            Self::Polyglot => "iris-polyglot",
            Self::ObjectScript => "objectscript-int",
            Self::Python => "python",
            Self::Sql => "sql",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Polyglot => "Polyglot IRIS",
            Self::ObjectScript => "IRIS ObjectScript INT",
            Self::Python => "IRIS Python",
            Self::Sql => "IRIS SQL",
        }
    }

    /// Language used when code carries no selecting magic line.
    pub fn native_language(self) -> BackendLanguage {
        match self {
            Self::Polyglot | Self::ObjectScript => BackendLanguage::ObjectScript,
            Self::Python => BackendLanguage::Python,
            Self::Sql => BackendLanguage::Sql,
        }
    }

    /// Whether a first-line magic may switch the execution language.
    pub fn accepts_magics(self) -> bool {
        matches!(self, Self::Polyglot)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Starting,
    #[default]
    Idle,
    Busy,
}

/// Jupyter REST kernel model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub id: KernelId,
    pub name: String,
    pub last_activity: DateTime<Utc>,
    pub connections: u32,
    pub execution_state: ExecutionState,
}

impl Kernel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: KernelId::new(),
            name: name.into(),
            last_activity: Utc::now(),
            connections: 1,
            execution_state: ExecutionState::Idle,
        }
    }

    pub fn flavor(&self) -> Option<KernelFlavor> {
        KernelFlavor::from_name(&self.name)
    }
}

/// Jupyter REST session model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub kernel: Kernel,
}

/// Kernel reference carried by a session-create request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRef {
    pub name: String,
}

/// Body of `POST /{ns}/api/sessions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default = "default_session_kind")]
    pub kind: String,
    pub kernel: KernelRef,
}

fn default_session_kind() -> String {
    "notebook".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub language: String,
    pub display_name: String,
    pub argv: Vec<String>,
    pub interrupt_mode: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpecEntry {
    pub name: String,
    pub resources: serde_json::Map<String, serde_json::Value>,
    pub spec: KernelSpec,
}

/// Body of `GET /{ns}/api/kernelspecs`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpecs {
    pub default: String,
    pub kernelspecs: BTreeMap<String, KernelSpecEntry>,
}

impl KernelSpecs {
    /// Every flavor, each launched against `key`.
    pub fn for_namespace(key: &NamespaceKey) -> Self {
        let kernelspecs = KernelFlavor::ALL
            .into_iter()
            .map(|flavor| {
                let entry = KernelSpecEntry {
                    name: flavor.name().to_string(),
                    resources: serde_json::Map::new(),
                    spec: KernelSpec {
                        language: flavor.spec_language().to_string(),
                        display_name: flavor.display_name().to_string(),
                        argv: vec![key.to_string()],
                        interrupt_mode: "message".to_string(),
                    },
                };
                (entry.name.clone(), entry)
            })
            .collect();
        Self {
            default: KernelFlavor::Polyglot.name().to_string(),
            kernelspecs,
        }
    }

    /// Single synthetic `none` spec describing why no kernels are available.
    pub fn unavailable(error: &str) -> Self {
        let entry = KernelSpecEntry {
            name: DISABLED_KERNEL.to_string(),
            resources: serde_json::Map::new(),
            spec: KernelSpec {
                language: DISABLED_KERNEL.to_string(),
                display_name: format!("(unavailable: {error})"),
                argv: vec![error.to_string()],
                interrupt_mode: "message".to_string(),
            },
        };
        Self {
            default: DISABLED_KERNEL.to_string(),
            kernelspecs: BTreeMap::from([(DISABLED_KERNEL.to_string(), entry)]),
        }
    }
}
