//! Namespace keys, server definitions and resolved targets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// `server:NAMESPACE`, with the server lower-cased and the namespace upper-cased.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NamespaceKey {
    server: String,
    namespace: String,
}

impl NamespaceKey {
    pub fn new(server: &str, namespace: &str) -> Self {
        Self {
            server: server.to_lowercase(),
            namespace: namespace.to_uppercase(),
        }
    }

    /// Parse and case-normalize a `server:namespace` string.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let mut parts = raw.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(server), Some(namespace), None)
                if !server.trim().is_empty() && !namespace.trim().is_empty() =>
            {
                Ok(Self::new(server.trim(), namespace.trim()))
            }
            _ => Err(GatewayError::TargetUnresolved(format!(
                "'{raw}' is not of the form server:namespace"
            ))),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.namespace)
    }
}

impl FromStr for NamespaceKey {
    type Err = GatewayError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Web server coordinates, used for the REST API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebServerSpec {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Superserver coordinates, used for the execution channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: u16,
}

/// A named backend server definition.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Filled from the settings map key when omitted.
    #[serde(default)]
    pub name: String,
    pub web_server: WebServerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_server: Option<SuperServerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ServerSpec {
    /// `scheme://host:port[prefix]` without a trailing slash.
    pub fn base_url(&self) -> String {
        let web = &self.web_server;
        let mut url = format!("{}://{}:{}", web.scheme, web.host, web.port);
        if let Some(prefix) = web.path_prefix.as_deref().filter(|p| !p.is_empty()) {
            if !prefix.starts_with('/') {
                url.push('/');
            }
            url.push_str(prefix.trim_end_matches('/'));
        }
        url
    }

    /// Host and port of the superserver, if one is defined.
    pub fn superserver_addr(&self) -> Option<(String, u16)> {
        self.super_server.as_ref().map(|s| {
            let host = s.host.clone().unwrap_or_else(|| self.web_server.host.clone());
            (host, s.port)
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl fmt::Debug for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSpec")
            .field("name", &self.name)
            .field("web_server", &self.web_server)
            .field("super_server", &self.super_server)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A namespace resolved against the known servers.
///
/// `connection == None` means the namespace is not a valid execution target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub key: NamespaceKey,
    pub connection: Option<ServerSpec>,
}

impl Target {
    pub fn server(&self) -> &str {
        self.key.server()
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace()
    }

    pub fn is_executable(&self) -> bool {
        self.connection.is_some()
    }
}
