//! Binary multipart frame codec for the kernel `channels` WebSocket.
//!
//! ```text
//! u32 LE  count
//! u32 LE  end[0] .. end[count-1]     cumulative, relative to payload start
//! payload channel | header | parent_header | metadata | content | buffers...
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::content::Content;
use crate::message::{Channel, Envelope, Header};

/// Channel, header, parent header, metadata, content.
pub const MIN_SEGMENTS: usize = 5;

const WORD: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("frame truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("frame has {0} segments, at least 5 required")]
    TooFewSegments(usize),

    #[error("segment {index} ends at {offset}, outside payload of {len} bytes")]
    BadOffset { index: usize, offset: usize, len: usize },

    #[error("{0} bytes after the last segment")]
    TrailingBytes(usize),

    #[error("segment {index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },

    #[error("segment {index} is not valid JSON: {reason}")]
    InvalidJson { index: usize, reason: String },

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("invalid {msg_type} content: {reason}")]
    InvalidContent { msg_type: String, reason: String },
}

pub fn decode(frame: &[u8]) -> Result<Envelope, FormatError> {
    let count = read_u32(frame, 0)? as usize;
    if count < MIN_SEGMENTS {
        return Err(FormatError::TooFewSegments(count));
    }
    let table_len = count
        .checked_add(1)
        .and_then(|n| n.checked_mul(WORD))
        .unwrap_or(usize::MAX);
    if frame.len() < table_len {
        return Err(FormatError::Truncated {
            needed: table_len,
            actual: frame.len(),
        });
    }

    let payload = &frame[table_len..];
    let mut segments = Vec::with_capacity(count);
    let mut start = 0;
    for index in 0..count {
        let end = read_u32(frame, WORD * (index + 1))? as usize;
        if end < start || end > payload.len() {
            return Err(FormatError::BadOffset {
                index,
                offset: end,
                len: payload.len(),
            });
        }
        segments.push(&payload[start..end]);
        start = end;
    }
    if start != payload.len() {
        return Err(FormatError::TrailingBytes(payload.len() - start));
    }

    let channel_name = utf8(segments[0], 0)?;
    let channel = Channel::parse(channel_name)
        .ok_or_else(|| FormatError::UnknownChannel(channel_name.to_string()))?;
    let header: Header = json(segments[1], 1)?;
    let parent: Value = json(segments[2], 2)?;
    let parent_header = match parent {
        Value::Null => None,
        Value::Object(ref map) if map.is_empty() => None,
        other => Some(serde_json::from_value(other).map_err(|e| FormatError::InvalidJson {
            index: 2,
            reason: e.to_string(),
        })?),
    };
    let metadata: Map<String, Value> = json(segments[3], 3)?;
    let content_value: Value = json(segments[4], 4)?;
    let content = Content::from_value(&header.msg_type, content_value)?;
    let buffers = segments[MIN_SEGMENTS..]
        .iter()
        .map(|s| Bytes::copy_from_slice(s))
        .collect();

    Ok(Envelope {
        channel,
        header,
        parent_header,
        metadata,
        content,
        buffers,
    })
}

pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let parent = match &envelope.parent_header {
        Some(header) => to_bytes(header),
        None => b"{}".to_vec(),
    };
    let fixed = [
        envelope.channel.as_str().as_bytes().to_vec(),
        to_bytes(&envelope.header),
        parent,
        to_bytes(&envelope.metadata),
        to_bytes(&envelope.content.to_value()),
    ];
    let segments: Vec<&[u8]> = fixed
        .iter()
        .map(Vec::as_slice)
        .chain(envelope.buffers.iter().map(|b| b.as_ref()))
        .collect();

    let payload_len: usize = segments.iter().map(|s| s.len()).sum();
    let mut out = Vec::with_capacity(WORD * (segments.len() + 1) + payload_len);
    out.extend_from_slice(&(segments.len() as u32).to_le_bytes());
    let mut end = 0usize;
    for segment in &segments {
        end += segment.len();
        out.extend_from_slice(&(end as u32).to_le_bytes());
    }
    for segment in &segments {
        out.extend_from_slice(segment);
    }
    out
}

fn read_u32(frame: &[u8], at: usize) -> Result<u32, FormatError> {
    frame
        .get(at..at + WORD)
        .and_then(|b| <[u8; WORD]>::try_from(b).ok())
        .map(u32::from_le_bytes)
        .ok_or(FormatError::Truncated {
            needed: at + WORD,
            actual: frame.len(),
        })
}

fn utf8(segment: &[u8], index: usize) -> Result<&str, FormatError> {
    std::str::from_utf8(segment).map_err(|_| FormatError::InvalidUtf8 { index })
}

fn json<T: DeserializeOwned>(segment: &[u8], index: usize) -> Result<T, FormatError> {
    serde_json::from_str(utf8(segment, index)?).map_err(|e| FormatError::InvalidJson {
        index,
        reason: e.to_string(),
    })
}

fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec())
}
