//! Turns raw backend output into `execute_result` mime data.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// A Python dict repr keyed by a single `+json` media type, as printed by
/// figure objects that have no JSON serialisation of their own.
static TAGGED_REPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{'([^'\n]+\+json)':(.+)\}").unwrap());

/// Mime bundle for `raw`: always `text/plain`, plus any `+json` payloads
/// that can be recovered from it.
pub fn result_data(raw: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("text/plain".into(), Value::String(raw.to_string()));

    if let Some(caps) = TAGGED_REPR.captures(raw) {
        let media_type = &caps[1];
        let body = caps[2]
            .replace("': True", "': true")
            .replace("': False", "': false");
        match requote(&body).and_then(|json| serde_json::from_str::<Value>(&json).map_err(|e| e.to_string())) {
            Ok(value) => {
                data.insert(media_type.to_string(), Value::String(value.to_string()));
            }
            Err(reason) => debug!(media_type, %reason, "tagged output is not a parsable literal"),
        }
    } else if raw.starts_with("{\"") {
        match serde_json::from_str::<Map<String, Value>>(raw) {
            Ok(object) => {
                for (key, value) in object {
                    if key.ends_with("+json") {
                        data.insert(key, value);
                    }
                }
            }
            Err(e) => debug!(error = %e, "output looked like JSON but did not parse"),
        }
    }
    data
}

/// Rewrite single-quoted string literals as JSON double-quoted ones.
/// Double-quoted literals pass through untouched.
fn requote(literal: &str) -> Result<String, String> {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push('"');
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some('\\') => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => return Err("dangling escape".into()),
                        },
                        Some('"') => out.push_str("\\\""),
                        Some(ch) => out.push(ch),
                        None => return Err("unterminated string".into()),
                    }
                }
                out.push('"');
            }
            '"' => {
                out.push('"');
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            out.push('\\');
                            out.push(chars.next().ok_or("dangling escape")?);
                        }
                        Some(ch) => out.push(ch),
                        None => return Err("unterminated string".into()),
                    }
                }
                out.push('"');
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const PLOTLY: &str = "application/vnd.plotly.v1+json";

    #[test]
    fn plain_text_only() {
        let data = result_data("hello");
        assert_eq!(Value::Object(data), json!({"text/plain": "hello"}));
    }

    #[test]
    fn plotly_repr_is_normalised() {
        let raw = "{'application/vnd.plotly.v1+json': {'data': [{'type': 'bar', 'visible': True}], 'layout': {'showlegend': False, 'title': \"Bob's chart\"}}}";
        let data = result_data(raw);
        assert_eq!(data["text/plain"], raw);
        assert_eq!(
            data[PLOTLY],
            r#"{"data":[{"type":"bar","visible":true}],"layout":{"showlegend":false,"title":"Bob's chart"}}"#
        );
    }

    #[test]
    fn other_tagged_media_types_are_recognised() {
        let data = result_data("{'application/vnd.vegalite.v5+json': {'mark': 'bar'}}");
        assert_eq!(data["application/vnd.vegalite.v5+json"], r#"{"mark":"bar"}"#);
    }

    #[test]
    fn unparsable_repr_keeps_text_only() {
        let data = result_data("{'application/vnd.plotly.v1+json': {'x': <object at 0x1>}}");
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn json_output_copies_json_keys() {
        let raw = r#"{"application/geo+json": {"type": "Point"}, "text/html": "<b>x</b>", "other": 1}"#;
        let data = result_data(raw);
        assert_eq!(
            Value::Object(data),
            json!({
                "text/plain": raw,
                "application/geo+json": {"type": "Point"}
            })
        );
    }

    #[test]
    fn broken_json_is_swallowed() {
        let data = result_data(r#"{"a+json": "#);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn requote_escapes() {
        assert_eq!(requote(r#"{'a': 'say "hi"', 'b': 'it\'s'}"#).unwrap(), r#"{"a": "say \"hi\"", "b": "it's"}"#);
        assert!(requote("{'open").is_err());
    }
}
