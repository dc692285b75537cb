//! Typed Jupyter message content, keyed by `header.msg_type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::kernel::ExecutionState;
use crate::wire::FormatError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    #[default]
    Ok,
    Error,
    Abort,
}

fn yes() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub mimetype: String,
    pub file_extension: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoReply {
    pub status: ReplyStatus,
    pub protocol_version: String,
    pub implementation: String,
    pub implementation_version: String,
    pub language_info: LanguageInfo,
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub help_links: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "yes")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
    #[serde(default)]
    pub allow_stdin: bool,
    #[serde(default = "yes")]
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    pub execution_count: u64,
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
    #[serde(default)]
    pub payload: Vec<Value>,
}

impl ExecuteReply {
    pub fn new(status: ReplyStatus, execution_count: u64) -> Self {
        Self {
            status,
            execution_count,
            user_expressions: Map::new(),
            payload: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: u64,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: ExecutionState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompleteReply {
    pub status: ReplyStatus,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub status: ReplyStatus,
    pub restart: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptReply {
    pub status: ReplyStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputReply {
    #[serde(default)]
    pub value: String,
}

/// Message content as a tagged union over the msg_types the gateway knows.
///
/// Anything else is carried through untouched as [`Content::Other`].
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    KernelInfoRequest,
    KernelInfoReply(KernelInfoReply),
    ExecuteRequest(ExecuteRequest),
    ExecuteInput(ExecuteInput),
    ExecuteReply(ExecuteReply),
    ExecuteResult(ExecuteResult),
    Error(ErrorContent),
    Status(Status),
    Stream(Stream),
    CompleteRequest(CompleteRequest),
    CompleteReply(CompleteReply),
    ShutdownRequest(ShutdownRequest),
    ShutdownReply(ShutdownReply),
    InterruptRequest,
    InterruptReply(InterruptReply),
    InputReply(InputReply),
    Other { msg_type: String, content: Value },
}

impl Content {
    pub fn msg_type(&self) -> &str {
        match self {
            Self::KernelInfoRequest => "kernel_info_request",
            Self::KernelInfoReply(_) => "kernel_info_reply",
            Self::ExecuteRequest(_) => "execute_request",
            Self::ExecuteInput(_) => "execute_input",
            Self::ExecuteReply(_) => "execute_reply",
            Self::ExecuteResult(_) => "execute_result",
            Self::Error(_) => "error",
            Self::Status(_) => "status",
            Self::Stream(_) => "stream",
            Self::CompleteRequest(_) => "complete_request",
            Self::CompleteReply(_) => "complete_reply",
            Self::ShutdownRequest(_) => "shutdown_request",
            Self::ShutdownReply(_) => "shutdown_reply",
            Self::InterruptRequest => "interrupt_request",
            Self::InterruptReply(_) => "interrupt_reply",
            Self::InputReply(_) => "input_reply",
            Self::Other { msg_type, .. } => msg_type,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::KernelInfoRequest | Self::InterruptRequest => Value::Object(Map::new()),
            Self::KernelInfoReply(c) => to_json(c),
            Self::ExecuteRequest(c) => to_json(c),
            Self::ExecuteInput(c) => to_json(c),
            Self::ExecuteReply(c) => to_json(c),
            Self::ExecuteResult(c) => to_json(c),
            Self::Error(c) => to_json(c),
            Self::Status(c) => to_json(c),
            Self::Stream(c) => to_json(c),
            Self::CompleteRequest(c) => to_json(c),
            Self::CompleteReply(c) => to_json(c),
            Self::ShutdownRequest(c) => to_json(c),
            Self::ShutdownReply(c) => to_json(c),
            Self::InterruptReply(c) => to_json(c),
            Self::InputReply(c) => to_json(c),
            Self::Other { content, .. } => content.clone(),
        }
    }

    /// Interpret `value` as the content of a `msg_type` message.
    pub fn from_value(msg_type: &str, value: Value) -> Result<Self, FormatError> {
        Ok(match msg_type {
            "kernel_info_request" => Self::KernelInfoRequest,
            "kernel_info_reply" => Self::KernelInfoReply(typed(msg_type, value)?),
            "execute_request" => Self::ExecuteRequest(typed(msg_type, value)?),
            "execute_input" => Self::ExecuteInput(typed(msg_type, value)?),
            "execute_reply" => Self::ExecuteReply(typed(msg_type, value)?),
            "execute_result" => Self::ExecuteResult(typed(msg_type, value)?),
            "error" => Self::Error(typed(msg_type, value)?),
            "status" => Self::Status(typed(msg_type, value)?),
            "stream" => Self::Stream(typed(msg_type, value)?),
            "complete_request" => Self::CompleteRequest(typed(msg_type, value)?),
            "complete_reply" => Self::CompleteReply(typed(msg_type, value)?),
            "shutdown_request" => Self::ShutdownRequest(typed(msg_type, value)?),
            "shutdown_reply" => Self::ShutdownReply(typed(msg_type, value)?),
            "interrupt_request" => Self::InterruptRequest,
            "interrupt_reply" => Self::InterruptReply(typed(msg_type, value)?),
            "input_reply" => Self::InputReply(typed(msg_type, value)?),
            other => Self::Other {
                msg_type: other.to_string(),
                content: value,
            },
        })
    }
}

fn to_json<T: Serialize>(content: &T) -> Value {
    serde_json::to_value(content).unwrap_or_default()
}

fn typed<T: DeserializeOwned>(msg_type: &str, value: Value) -> Result<T, FormatError> {
    serde_json::from_value(value).map_err(|e| FormatError::InvalidContent {
        msg_type: msg_type.to_string(),
        reason: e.to_string(),
    })
}
