//! Execution adapter speaking newline-delimited JSON to a bridge listening
//! on the server's superserver address.
//!
//! ```text
//! > {"op":"connect","namespace":"USER","username":"_SYSTEM","password":"SYS"}
//! < {"ok":true}
//! > {"op":"invoke","class":"PolyglotKernel.CodeExecutor","method":"CodeResult","args":["w 1","cos"]}
//! < {"ok":true,"value":"{\"status\":1,\"out\":\"1\"}"}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::backend::{BackendConnector, ExecutionBackend};
use gateway_core::kernel::BackendLanguage;
use gateway_core::{GatewayError, Target};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::BackendError;

const EVALUATE_METHOD: &str = "CodeResult";

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Connect {
        namespace: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<&'a str>,
    },
    Invoke {
        class: &'a str,
        method: &'a str,
        args: [&'a str; 2],
    },
    Interrupt,
    Close,
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// What the executor class returns: `status` 1 on success, 0 on failure.
#[derive(Debug, Deserialize)]
struct CodeResult {
    status: i64,
    #[serde(default)]
    out: String,
}

#[derive(Clone)]
struct Login {
    addr: (String, u16),
    namespace: String,
    username: Option<String>,
    password: Option<String>,
}

pub struct NativeConnector {
    connect_timeout: Duration,
    stub_class: String,
}

impl NativeConnector {
    pub fn new(connect_timeout: Duration, stub_class: impl Into<String>) -> Self {
        Self {
            connect_timeout,
            stub_class: stub_class.into(),
        }
    }
}

#[async_trait]
impl BackendConnector for NativeConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn ExecutionBackend>, GatewayError> {
        let spec = target.connection.as_ref().ok_or_else(|| {
            GatewayError::TargetUnresolved(format!("Server '{}' not defined.", target.server()))
        })?;
        let addr = spec.superserver_addr().ok_or_else(|| {
            GatewayError::backend(format!("server '{}' defines no superServer port", spec.name))
        })?;
        let login = Login {
            addr,
            namespace: target.namespace().to_string(),
            username: spec.username.clone(),
            password: spec.password.clone(),
        };
        let stream = Stream::open(&login, self.connect_timeout).await?;
        debug!(target = %target.key, addr = ?login.addr, "native backend connected");
        Ok(Box::new(NativeBackend {
            stream: Some(stream),
            pending: false,
            login,
            stub_class: self.stub_class.clone(),
            connect_timeout: self.connect_timeout,
        }))
    }
}

struct Stream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Stream {
    async fn open(login: &Login, timeout: Duration) -> Result<Self, BackendError> {
        let tcp = tokio::time::timeout(timeout, TcpStream::connect((login.addr.0.as_str(), login.addr.1)))
            .await
            .map_err(|_| BackendError::Timeout(timeout))??;
        let (read, writer) = tcp.into_split();
        let mut stream = Self {
            lines: BufReader::new(read).lines(),
            writer,
        };
        let response = tokio::time::timeout(
            timeout,
            stream.call(&Request::Connect {
                namespace: &login.namespace,
                username: login.username.as_deref(),
                password: login.password.as_deref(),
            }),
        )
        .await
        .map_err(|_| BackendError::Timeout(timeout))??;
        if !response.ok {
            return Err(BackendError::Protocol(
                response.error.unwrap_or_else(|| "login rejected".into()),
            ));
        }
        Ok(stream)
    }

    async fn send(&mut self, request: &Request<'_>) -> Result<(), BackendError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn call(&mut self, request: &Request<'_>) -> Result<Response, BackendError> {
        self.send(request).await?;
        let line = self.lines.next_line().await?.ok_or(BackendError::Closed)?;
        Ok(serde_json::from_str(&line)?)
    }
}

/// One bridge connection. Interrupt replaces the stream so a response to
/// the abandoned call can never be read as the answer to the next one.
pub struct NativeBackend {
    stream: Option<Stream>,
    /// Set while a call is on the wire. Still set on entry means the last
    /// call was dropped unanswered and the stream must be replaced.
    pending: bool,
    login: Login,
    stub_class: String,
    connect_timeout: Duration,
}

fn parse_result(value: Value) -> Result<CodeResult, BackendError> {
    match value {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

#[async_trait]
impl ExecutionBackend for NativeBackend {
    async fn evaluate(&mut self, code: &str, language: BackendLanguage) -> Result<String, GatewayError> {
        if self.pending && self.stream.is_some() {
            debug!("previous call abandoned, reconnecting");
            self.stream = None;
            self.stream = Some(Stream::open(&self.login, self.connect_timeout).await?);
            self.pending = false;
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GatewayError::backend("connection is closed"))?;
        self.pending = true;
        let response = stream
            .call(&Request::Invoke {
                class: &self.stub_class,
                method: EVALUATE_METHOD,
                args: [code, language.token()],
            })
            .await;
        self.pending = false;
        let response = response?;
        if !response.ok {
            return Err(GatewayError::ExecutionFailure(
                response.error.unwrap_or_else(|| "invocation failed".into()),
            ));
        }
        let result = parse_result(response.value)?;
        if result.status == 0 {
            Err(GatewayError::ExecutionFailure(result.out))
        } else {
            Ok(result.out)
        }
    }

    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn interrupt(&mut self) -> Result<(), GatewayError> {
        if let Some(mut old) = self.stream.take() {
            if let Err(e) = old.send(&Request::Interrupt).await {
                debug!(error = %e, "interrupt signal not delivered");
            }
        }
        self.stream = Some(Stream::open(&self.login, self.connect_timeout).await?);
        self.pending = false;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.send(&Request::Close).await {
                warn!(error = %e, "close request failed");
            }
            let _ = stream.writer.shutdown().await;
        }
    }
}
