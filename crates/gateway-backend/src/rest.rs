//! Atelier REST helper: cookie reuse per server with a Basic-auth retry.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use gateway_core::ServerSpec;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BackendError;

/// `v{api_version}/{namespace}{path}` below `/api/atelier/`.
#[derive(Clone, Debug)]
pub struct AtelierEndpoint {
    pub api_version: u32,
    pub namespace: String,
    pub path: String,
}

impl AtelierEndpoint {
    pub fn new(api_version: u32, namespace: &str, path: impl Into<String>) -> Self {
        Self {
            api_version,
            namespace: namespace.to_string(),
            path: path.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RestResponse {
    pub status: u16,
    /// `Null` when the body is empty or not JSON.
    pub body: Value,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Session cookies per server name, stored as `name=value` pairs.
#[derive(Default)]
pub struct CookieJar {
    sessions: DashMap<String, Vec<String>>,
}

impl CookieJar {
    pub fn get(&self, server: &str) -> Vec<String> {
        self.sessions
            .get(server)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    /// Replace cookies with the same name, append new ones.
    pub fn merge<'a>(&self, server: &str, set_cookies: impl IntoIterator<Item = &'a str>) {
        let mut entry = self.sessions.entry(server.to_string()).or_default();
        for raw in set_cookies {
            let Some(pair) = raw.split(';').next().map(str::trim).filter(|p| p.contains('='))
            else {
                continue;
            };
            let name = pair.split('=').next().unwrap_or_default();
            let prefix = format!("{name}=");
            match entry.iter_mut().find(|c| c.starts_with(&prefix)) {
                Some(existing) => *existing = pair.to_string(),
                None => entry.push(pair.to_string()),
            }
        }
    }

    pub fn forget(&self, server: &str) -> bool {
        self.sessions.remove(server).is_some()
    }
}

pub struct RestClient {
    http: reqwest::Client,
    jar: CookieJar,
}

impl RestClient {
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            jar: CookieJar::default(),
        })
    }

    pub fn cookies(&self, server: &str) -> Vec<String> {
        self.jar.get(server)
    }

    pub fn url(server: &ServerSpec, endpoint: Option<&AtelierEndpoint>) -> String {
        let mut url = format!("{}/api/atelier/", server.base_url());
        if let Some(ep) = endpoint {
            url.push_str(&format!(
                "v{}/{}{}",
                ep.api_version,
                escape_percent(&ep.namespace),
                escape_percent(&ep.path)
            ));
        }
        url
    }

    /// Send a request, reusing stored cookies. A 401 is retried once with
    /// Basic credentials when the server has them. Statuses of 500 and above
    /// are errors; anything lower is returned to the caller.
    pub async fn request(
        &self,
        method: Method,
        server: &ServerSpec,
        endpoint: Option<&AtelierEndpoint>,
        body: Option<&Value>,
    ) -> Result<RestResponse, BackendError> {
        let url = Self::url(server, endpoint);
        let cookies = self.jar.get(&server.name);

        let mut response = self
            .send(method.clone(), &url, body, Auth::Cookies(&cookies))
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let (Some(user), Some(password)) = (&server.username, &server.password) {
                debug!(server = %server.name, %url, "cookie session rejected, retrying with basic auth");
                response = self
                    .send(method, &url, body, Auth::Basic(user, password))
                    .await?;
            }
        }

        let status = response.status().as_u16();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        self.jar.merge(&server.name, set_cookies.iter().map(String::as_str));

        if status >= 500 {
            return Err(BackendError::Status { status, url });
        }
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(RestResponse { status, body })
    }

    /// End the server-side session and drop our cookies. Failures are logged.
    pub async fn logout(&self, server: &ServerSpec) {
        let cookies = self.jar.get(&server.name);
        if !self.jar.forget(&server.name) {
            return;
        }
        let url = format!("{}/api/atelier/?CacheLogout=end", server.base_url());
        if let Err(e) = self.send(Method::HEAD, &url, None, Auth::Cookies(&cookies)).await {
            warn!(server = %server.name, error = %e, "logout request failed");
        }
    }

    /// Namespaces visible to the configured user.
    pub async fn namespaces(&self, server: &ServerSpec) -> Result<Vec<String>, BackendError> {
        let response = self.request(Method::GET, server, None, None).await?;
        if response.status != 200 {
            return Err(BackendError::Status {
                status: response.status,
                url: Self::url(server, None),
            });
        }
        let namespaces = response
            .body
            .pointer("/result/content/namespaces")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::Protocol("version response has no namespace list".into()))?;
        Ok(namespaces
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        auth: Auth<'_>,
    ) -> Result<reqwest::Response, BackendError> {
        let mut req = self.http.request(method, url);
        match auth {
            Auth::Cookies(cookies) if !cookies.is_empty() => {
                req = req.header(COOKIE, cookies.join("; "));
            }
            Auth::Cookies(_) => {}
            Auth::Basic(user, password) => {
                let token = STANDARD.encode(format!("{user}:{password}"));
                req = req.header(AUTHORIZATION, format!("Basic {token}"));
            }
        }
        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }
        Ok(req.send().await?)
    }
}

enum Auth<'a> {
    Cookies(&'a [String]),
    Basic(&'a str, &'a str),
}

// `%SYS` and friends must survive URL parsing.
fn escape_percent(segment: &str) -> String {
    segment.replace('%', "%25")
}
