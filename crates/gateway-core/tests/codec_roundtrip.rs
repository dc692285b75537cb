use bytes::Bytes;
use gateway_core::content::{Content, ErrorContent, ExecuteRequest, ExecuteResult, Stream};
use gateway_core::message::{Channel, Envelope};
use gateway_core::wire::{decode, encode};
use proptest::prelude::*;
use serde_json::{json, Map};

fn channel() -> impl Strategy<Value = Channel> {
    prop_oneof![
        Just(Channel::Shell),
        Just(Channel::Control),
        Just(Channel::Iopub),
        Just(Channel::Stdin),
    ]
}

// Printable ASCII mixed with multi-byte characters of every UTF-8 width.
fn text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[ -~]",
            Just("é".to_string()),
            Just("世".to_string()),
            Just("🦀".to_string()),
            Just("\n".to_string()),
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

fn content() -> impl Strategy<Value = Content> {
    prop_oneof![
        text().prop_map(|code| Content::ExecuteRequest(ExecuteRequest::new(code))),
        (text(), text()).prop_map(|(name, text)| Content::Stream(Stream { name, text })),
        (0u64..10_000, text()).prop_map(|(n, out)| {
            Content::ExecuteResult(ExecuteResult {
                execution_count: n,
                data: Map::from_iter([("text/plain".to_string(), json!(out))]),
                metadata: Map::new(),
            })
        }),
        (text(), prop::collection::vec(text(), 0..3)).prop_map(|(evalue, traceback)| {
            Content::Error(ErrorContent {
                ename: "IRIS".into(),
                evalue,
                traceback,
            })
        }),
        text().prop_map(|s| Content::Other {
            msg_type: "comm_msg".into(),
            content: json!({ "data": s }),
        }),
    ]
}

fn envelope() -> impl Strategy<Value = Envelope> {
    (
        channel(),
        text(),
        content(),
        any::<bool>(),
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..4),
        text(),
    )
        .prop_map(|(channel, session, content, with_parent, buffers, note)| {
            let request = Envelope::new(Channel::Shell, "client", Content::KernelInfoRequest);
            let mut env = if with_parent {
                request.reply(channel, &session, content)
            } else {
                Envelope::new(channel, &session, content)
            };
            env.metadata.insert("note".into(), json!(note));
            env.buffers = buffers.into_iter().map(Bytes::from).collect();
            env
        })
}

proptest! {
    #[test]
    fn decode_inverts_encode(env in envelope()) {
        let bytes = encode(&env);
        prop_assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn segment_count_matches_buffers(env in envelope()) {
        let bytes = encode(&env);
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        prop_assert_eq!(count, 5 + env.buffers.len());
    }

    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
    }
}
