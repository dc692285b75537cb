//! Logical Jupyter message: channel, headers, metadata, content and buffers.

use std::fmt;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::Content;
use crate::ids::new_msg_id;

/// Wire protocol version stamped on every outbound header.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Username stamped on every outbound header.
pub const GATEWAY_USERNAME: &str = "iris-jupyter-server";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Shell,
    Control,
    Iopub,
    Stdin,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Control => "control",
            Self::Iopub => "iopub",
            Self::Stdin => "stdin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shell" => Some(Self::Shell),
            "control" => Some(Self::Control),
            "iopub" => Some(Self::Iopub),
            "stdin" => Some(Self::Stdin),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message header. Fields the gateway does not model are kept in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    /// Fresh gateway-originated header for `msg_type` in `session`.
    pub fn new(msg_type: &str, session: &str) -> Self {
        Self {
            msg_id: new_msg_id(),
            session: session.to_string(),
            username: GATEWAY_USERNAME.to_string(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            msg_type: msg_type.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub channel: Channel,
    pub header: Header,
    /// `None` is written as `{}` on the wire.
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Content,
    pub buffers: Vec<Bytes>,
}

impl Envelope {
    pub fn new(channel: Channel, session: &str, content: Content) -> Self {
        Self {
            channel,
            header: Header::new(content.msg_type(), session),
            parent_header: None,
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
        }
    }

    /// A message answering `self`: parent header copied from the request,
    /// session forced to `session`.
    pub fn reply(&self, channel: Channel, session: &str, content: Content) -> Self {
        Self {
            parent_header: Some(self.header.clone()),
            ..Self::new(channel, session, content)
        }
    }

    pub fn msg_type(&self) -> &str {
        self.content.msg_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ExecuteRequest, InterruptReply, ReplyStatus};

    #[test]
    fn channel_parse_roundtrip() {
        for ch in [Channel::Shell, Channel::Control, Channel::Iopub, Channel::Stdin] {
            assert_eq!(Channel::parse(ch.as_str()), Some(ch));
        }
        assert_eq!(Channel::parse("hb"), None);
        assert_eq!(Channel::parse("Shell"), None);
    }

    #[test]
    fn new_envelope_stamps_identity() {
        let env = Envelope::new(Channel::Shell, "k-1", Content::KernelInfoRequest);
        assert_eq!(env.header.msg_type, "kernel_info_request");
        assert_eq!(env.header.session, "k-1");
        assert_eq!(env.header.username, GATEWAY_USERNAME);
        assert_eq!(env.header.version, "5.3");
        assert!(env.header.date.ends_with('Z'));
        assert!(env.parent_header.is_none());
    }

    #[test]
    fn reply_copies_request_header_and_forces_session() {
        let mut request = Envelope::new(
            Channel::Control,
            "client-session",
            Content::InterruptRequest,
        );
        request.header.username = "alice".into();
        let reply = request.reply(
            Channel::Control,
            "kernel-id",
            Content::InterruptReply(InterruptReply {
                status: ReplyStatus::Ok,
            }),
        );
        assert_eq!(reply.parent_header.as_ref(), Some(&request.header));
        assert_eq!(reply.header.session, "kernel-id");
        assert_eq!(reply.header.username, GATEWAY_USERNAME);
        assert_ne!(reply.header.msg_id, request.header.msg_id);
    }

    #[test]
    fn header_keeps_unknown_fields() {
        let json = serde_json::json!({
            "msg_id": "m", "session": "s", "username": "u", "date": "d",
            "msg_type": "execute_request", "version": "5.3", "subshell_id": null
        });
        let header: Header = serde_json::from_value(json.clone()).unwrap();
        assert!(header.extra.contains_key("subshell_id"));
        assert_eq!(serde_json::to_value(&header).unwrap(), json);
    }

    #[test]
    fn msg_type_follows_content() {
        let env = Envelope::new(
            Channel::Shell,
            "s",
            Content::ExecuteRequest(ExecuteRequest::new("1+1")),
        );
        assert_eq!(env.msg_type(), "execute_request");
    }
}
