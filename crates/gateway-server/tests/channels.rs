use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gateway_backend::mock::{MockConnector, MockResponse};
use gateway_backend::SettingsResolver;
use gateway_core::backend::NoBootstrap;
use gateway_core::content::{Content, ExecuteRequest, ReplyStatus};
use gateway_core::namespace::WebServerSpec;
use gateway_core::{wire, Channel, Envelope, ServerSpec};
use gateway_kernel::NamespaceDirectory;
use gateway_server::{start, ServerConfig, ServerHandle};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn gateway(responses: Vec<MockResponse>) -> (ServerHandle, MockConnector) {
    gateway_with(
        ServerConfig {
            port: 0,
            ..Default::default()
        },
        responses,
    )
    .await
}

async fn gateway_with(config: ServerConfig, responses: Vec<MockResponse>) -> (ServerHandle, MockConnector) {
    let spec = ServerSpec {
        name: "iris".into(),
        web_server: WebServerSpec {
            scheme: "http".into(),
            host: "localhost".into(),
            port: 52773,
            path_prefix: None,
        },
        super_server: None,
        username: None,
        password: None,
    };
    let connector = MockConnector::with_responses(responses);
    let directory = Arc::new(NamespaceDirectory::new(
        Arc::new(SettingsResolver::new(BTreeMap::from([("iris".to_string(), spec)]))),
        Arc::new(NoBootstrap),
        Arc::new(connector.clone()),
    ));
    (start(config, directory).await.unwrap(), connector)
}

async fn open_kernel(handle: &ServerHandle, kernel: &str) -> String {
    let session: Value = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/iris:USER/api/sessions", handle.port))
        .json(&json!({"name": "nb.ipynb", "path": "nb.ipynb", "type": "notebook", "kernel": {"name": kernel}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    session["kernel"]["id"].as_str().unwrap().to_string()
}

async fn connect(handle: &ServerHandle, kernel_id: &str) -> Socket {
    let url = format!(
        "ws://127.0.0.1:{}/iris:USER/api/kernels/{kernel_id}/channels?session_id=client-1",
        handle.port
    );
    connect_async(url).await.unwrap().0
}

async fn send(ws: &mut Socket, envelope: &Envelope) {
    ws.send(Message::Binary(wire::encode(envelope).into())).await.unwrap();
}

async fn next_envelope(ws: &mut Socket) -> Envelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .unwrap();
        if let Message::Binary(data) = message {
            return wire::decode(&data).unwrap();
        }
    }
}

async fn collect_until_idle(ws: &mut Socket) -> Vec<Envelope> {
    let mut messages = Vec::new();
    loop {
        let message = next_envelope(ws).await;
        let idle = matches!(&message.content, Content::Status(s) if s.execution_state == gateway_core::kernel::ExecutionState::Idle);
        messages.push(message);
        if idle {
            return messages;
        }
    }
}

fn types(messages: &[Envelope]) -> Vec<&str> {
    messages.iter().map(|m| m.msg_type()).collect()
}

fn execute(code: &str) -> Envelope {
    Envelope::new(Channel::Shell, "client-1", Content::ExecuteRequest(ExecuteRequest::new(code)))
}

#[tokio::test]
async fn kernel_info_over_websocket() {
    let (handle, _) = gateway(vec![]).await;
    let kernel_id = open_kernel(&handle, "iris-python").await;
    let mut ws = connect(&handle, &kernel_id).await;

    let request = Envelope::new(Channel::Shell, "client-1", Content::KernelInfoRequest);
    send(&mut ws, &request).await;
    let reply = next_envelope(&mut ws).await;
    assert_eq!(reply.msg_type(), "kernel_info_reply");
    assert_eq!(reply.channel, Channel::Shell);
    assert_eq!(reply.parent_header, Some(request.header));
    assert_eq!(reply.header.session, kernel_id);
}

#[tokio::test]
async fn zero_heartbeat_still_answers() {
    let config = ServerConfig {
        port: 0,
        heartbeat_interval: Duration::ZERO,
        ..Default::default()
    };
    let (handle, _) = gateway_with(config, vec![MockResponse::output("7")]).await;
    let kernel_id = open_kernel(&handle, "iris-objectscript").await;
    let mut ws = connect(&handle, &kernel_id).await;

    send(&mut ws, &Envelope::new(Channel::Shell, "client-1", Content::KernelInfoRequest)).await;
    assert_eq!(next_envelope(&mut ws).await.msg_type(), "kernel_info_reply");
    send(&mut ws, &execute("w 7")).await;
    let messages = collect_until_idle(&mut ws).await;
    assert!(types(&messages).contains(&"execute_reply"));
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (handle, _) = gateway(vec![]).await;
    let kernel_id = open_kernel(&handle, "iris-sql").await;
    let mut ws = connect(&handle, &kernel_id).await;

    ws.send(Message::Binary(vec![0, 0, 0, 1].into())).await.unwrap();
    ws.send(Message::Text("{}".into())).await.unwrap();
    send(&mut ws, &Envelope::new(Channel::Shell, "client-1", Content::KernelInfoRequest)).await;

    // the first reply is the one to the valid request
    assert_eq!(next_envelope(&mut ws).await.msg_type(), "kernel_info_reply");
    assert_eq!(handle.stats().dropped_frames(), 2);
}

#[tokio::test]
async fn execute_sequence_over_websocket() {
    let (handle, _) = gateway(vec![MockResponse::output("42")]).await;
    let kernel_id = open_kernel(&handle, "iris-objectscript").await;
    let mut ws = connect(&handle, &kernel_id).await;

    send(&mut ws, &execute("w 42")).await;
    let messages = collect_until_idle(&mut ws).await;
    assert_eq!(
        types(&messages),
        vec!["status", "execute_input", "execute_result", "execute_reply", "status"]
    );
    match &messages[3].content {
        Content::ExecuteReply(r) => assert_eq!((r.status, r.execution_count), (ReplyStatus::Ok, 1)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn other_viewers_see_iopub_only() {
    let (handle, _) = gateway(vec![MockResponse::output("1")]).await;
    let kernel_id = open_kernel(&handle, "iris-objectscript").await;
    let mut ws = connect(&handle, &kernel_id).await;
    let mut viewer = connect(&handle, &kernel_id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send(&mut ws, &execute("w 1")).await;
    let seen = collect_until_idle(&mut viewer).await;
    assert_eq!(types(&seen), vec!["status", "execute_input", "execute_result", "status"]);
    assert!(seen.iter().all(|m| m.channel == Channel::Iopub));
}

#[tokio::test]
async fn control_interrupt_reaches_a_busy_kernel() {
    let (handle, connector) = gateway(vec![MockResponse::Hang]).await;
    let kernel_id = open_kernel(&handle, "iris-objectscript").await;
    let mut ws = connect(&handle, &kernel_id).await;

    send(&mut ws, &execute("for {}")).await;
    assert_eq!(next_envelope(&mut ws).await.msg_type(), "status");
    assert_eq!(next_envelope(&mut ws).await.msg_type(), "execute_input");

    send(
        &mut ws,
        &Envelope::new(Channel::Control, "client-1", Content::InterruptRequest),
    )
    .await;

    let mut seen = Vec::new();
    while !(seen.contains(&"interrupt_reply".to_string()) && seen.contains(&"execute_reply".to_string())) {
        let message = next_envelope(&mut ws).await;
        if let Content::ExecuteReply(r) = &message.content {
            assert_eq!(r.status, ReplyStatus::Error);
        }
        seen.push(message.msg_type().to_string());
    }
    assert!(seen.contains(&"error".to_string()));
    assert_eq!(connector.interrupt_count(), 1);
}
