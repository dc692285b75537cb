//! Installs the code-executor class on a backend namespace when missing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::backend::Bootstrapper;
use gateway_core::{GatewayError, ServerSpec, Target};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::rest::{AtelierEndpoint, RestClient};

/// Checks the server answers, that the namespace is visible, and that the
/// stub class exists; uploads and compiles it from `source` otherwise.
pub struct AtelierBootstrapper {
    rest: Arc<RestClient>,
    stub_class: String,
    source: Option<PathBuf>,
    api_version: u32,
}

impl AtelierBootstrapper {
    pub fn new(rest: Arc<RestClient>, stub_class: impl Into<String>, api_version: u32) -> Self {
        Self {
            rest,
            stub_class: stub_class.into(),
            source: None,
            api_version,
        }
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    fn doc_name(&self) -> String {
        format!("{}.cls", self.stub_class)
    }

    async fn check_namespace(&self, spec: &ServerSpec, namespace: &str) -> Result<(), GatewayError> {
        let namespaces = self.rest.namespaces(spec).await.map_err(|e| {
            GatewayError::backend(format!("Server '{}' is not available: {e}", spec.name))
        })?;
        if namespaces.iter().any(|n| n.eq_ignore_ascii_case(namespace)) {
            Ok(())
        } else {
            Err(GatewayError::no_kernels(format!(
                "Namespace '{namespace}' is not available to you on '{}'",
                spec.name
            )))
        }
    }

    async fn stub_present(&self, spec: &ServerSpec, namespace: &str) -> Result<bool, GatewayError> {
        let ep = AtelierEndpoint::new(self.api_version, namespace, format!("/doc/{}", self.doc_name()));
        let response = self.rest.request(Method::HEAD, spec, Some(&ep), None).await?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            other => Err(GatewayError::backend(format!(
                "checking for {} answered HTTP {other}",
                self.doc_name()
            ))),
        }
    }

    async fn install(&self, spec: &ServerSpec, namespace: &str) -> Result<(), GatewayError> {
        let Some(source) = &self.source else {
            return Err(GatewayError::no_kernels(format!(
                "Namespace '{namespace}' on server '{}' cannot run kernels: class {} is not installed",
                spec.name, self.stub_class
            )));
        };
        let text = tokio::fs::read_to_string(source).await.map_err(|e| {
            GatewayError::backend(format!("cannot read {}: {e}", source.display()))
        })?;
        let lines: Vec<&str> = text.lines().collect();

        let doc = AtelierEndpoint::new(self.api_version, namespace, format!("/doc/{}", self.doc_name()));
        let put = self
            .rest
            .request(Method::PUT, spec, Some(&doc), Some(&json!({ "enc": false, "content": lines })))
            .await?;
        ensure_clean(&put, "upload")?;

        let compile = AtelierEndpoint::new(self.api_version, namespace, "/action/compile");
        let response = self
            .rest
            .request(Method::POST, spec, Some(&compile), Some(&json!([self.doc_name()])))
            .await?;
        ensure_clean(&response, "compile")?;
        info!(server = %spec.name, namespace, class = %self.stub_class, "installed code executor");
        Ok(())
    }
}

/// Atelier reports failures in `status.errors` even on HTTP 200.
fn ensure_clean(response: &crate::rest::RestResponse, step: &str) -> Result<(), GatewayError> {
    if !response.is_success() {
        return Err(GatewayError::no_kernels(format!(
            "{step} of code executor answered HTTP {}",
            response.status
        )));
    }
    let errors = response
        .body
        .pointer("/status/errors")
        .and_then(Value::as_array)
        .filter(|e| !e.is_empty());
    match errors {
        Some(errors) => Err(GatewayError::no_kernels(format!(
            "{step} of code executor failed: {}",
            Value::Array(errors.clone())
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl Bootstrapper for AtelierBootstrapper {
    #[instrument(skip(self, target), fields(target = %target.key))]
    async fn ensure_support(&self, target: &Target) -> Result<(), GatewayError> {
        let Some(spec) = &target.connection else {
            return Err(GatewayError::TargetUnresolved(format!(
                "Server '{}' not defined.",
                target.server()
            )));
        };
        self.check_namespace(spec, target.namespace()).await?;
        if self.stub_present(spec, target.namespace()).await? {
            debug!("code executor already present");
            return Ok(());
        }
        self.install(spec, target.namespace()).await
    }
}
