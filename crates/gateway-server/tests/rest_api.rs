use std::collections::BTreeMap;
use std::sync::Arc;

use gateway_backend::mock::{MockBootstrapper, MockConnector};
use gateway_backend::SettingsResolver;
use gateway_core::namespace::WebServerSpec;
use gateway_core::ServerSpec;
use gateway_kernel::NamespaceDirectory;
use gateway_server::{start, ServerConfig, ServerHandle};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

struct Gateway {
    handle: ServerHandle,
    client: reqwest::Client,
    connector: MockConnector,
    bootstrapper: Arc<MockBootstrapper>,
}

impl Gateway {
    async fn start() -> Self {
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
        let connector = MockConnector::new();
        let bootstrapper = Arc::new(MockBootstrapper::new());
        let directory = Arc::new(NamespaceDirectory::new(
            Arc::new(SettingsResolver::new(BTreeMap::from([("iris".to_string(), spec)]))),
            bootstrapper.clone(),
            Arc::new(connector.clone()),
        ));
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        Self {
            handle: start(config, directory).await.unwrap(),
            client: reqwest::Client::new(),
            connector,
            bootstrapper,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.handle.port)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> u16 {
        self.client.delete(self.url(path)).send().await.unwrap().status().as_u16()
    }

    async fn create_session(&self, name: &str, kernel: &str) -> (u16, Value) {
        self.post(
            "/iris:USER/api/sessions",
            json!({"name": name, "path": name, "type": "notebook", "kernel": {"name": kernel}}),
        )
        .await
    }
}

#[tokio::test]
async fn kernelspecs_list_every_flavor() {
    let gw = Gateway::start().await;
    let (status, body) = gw.get("/iris:user/api/kernelspecs").await;
    assert_eq!(status, 200);
    assert_eq!(body["default"], "iris-polyglot");
    let specs = body["kernelspecs"].as_object().unwrap();
    assert_eq!(specs.len(), 4);
    assert_eq!(specs["iris-python"]["spec"]["argv"], json!(["iris:USER"]));
    assert_eq!(specs["iris-python"]["spec"]["language"], "python");
    assert_eq!(gw.bootstrapper.call_count(), 1);
}

#[tokio::test]
async fn kernelspecs_for_unknown_server_describe_the_problem() {
    let gw = Gateway::start().await;
    let (status, body) = gw.get("/nowhere:USER/api/kernelspecs").await;
    assert_eq!(status, 200);
    assert_eq!(body["default"], "none");
    assert_eq!(
        body["kernelspecs"]["none"]["spec"]["display_name"],
        "(unavailable: Server 'nowhere' not defined.)"
    );

    let (_, body) = gw.get("/garbage/api/kernelspecs").await;
    assert_eq!(body["default"], "none");
}

#[tokio::test]
async fn session_lifecycle() {
    let gw = Gateway::start().await;
    let (status, sessions) = gw.get("/iris:USER/api/sessions").await;
    assert_eq!((status, sessions), (200, json!([])));

    let (status, session) = gw.create_session("a.ipynb", "iris-python").await;
    assert_eq!(status, 201);
    assert_eq!(session["type"], "notebook");
    assert_eq!(session["kernel"]["name"], "iris-python");
    assert_eq!(session["kernel"]["execution_state"], "idle");

    let (status, again) = gw.create_session("a.ipynb", "iris-sql").await;
    assert_eq!(status, 201);
    assert_eq!(again["id"], session["id"]);
    assert_eq!(gw.connector.connect_count(), 1);

    let (_, kernels) = gw.get("/iris:USER/api/kernels").await;
    assert_eq!(kernels.as_array().unwrap().len(), 1);
    let (_, sessions) = gw.get("/iris:USER/api/sessions").await;
    assert_eq!(sessions[0]["name"], "a.ipynb");

    let id = session["id"].as_str().unwrap();
    assert_eq!(gw.delete(&format!("/iris:USER/api/sessions/{id}")).await, 204);
    assert_eq!(gw.delete(&format!("/iris:USER/api/sessions/{id}")).await, 204);
    let (_, sessions) = gw.get("/iris:USER/api/sessions").await;
    assert_eq!(sessions, json!([]));
    assert_eq!(gw.connector.terminate_count(), 1);
}

#[tokio::test]
async fn session_errors() {
    let gw = Gateway::start().await;

    let (status, body) = gw.create_session("x", "none").await;
    assert_eq!(status, 500);
    assert_eq!(body["short_message"], "NOKERNELS");

    gw.connector.fail_connect(true);
    let (status, body) = gw.create_session("y", "iris-sql").await;
    assert_eq!(status, 500);
    assert_eq!(body["short_message"], "KERNELSTART");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to start kernel process on iris:USER"));

    let (status, body) = gw
        .post("/nowhere:USER/api/sessions", json!({"kernel": {"name": "iris-sql"}}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Server 'nowhere' not defined.");

    let resp = gw
        .client
        .post(gw.url("/iris:USER/api/sessions"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn kernel_routes() {
    let gw = Gateway::start().await;
    let (_, session) = gw.create_session("k.ipynb", "iris-objectscript").await;
    let id = session["kernel"]["id"].as_str().unwrap().to_string();

    let (status, kernel) = gw.get(&format!("/iris:USER/api/kernels/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(kernel["name"], "iris-objectscript");

    let (status, _) = gw.post(&format!("/iris:USER/api/kernels/{id}/interrupt"), json!({})).await;
    assert_eq!(status, 204);
    let (status, restarted) = gw.post(&format!("/iris:USER/api/kernels/{id}/restart"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(restarted["id"], id.as_str());
    assert_eq!(gw.connector.connect_count(), 2);

    assert_eq!(gw.delete(&format!("/iris:USER/api/kernels/{id}")).await, 204);
    let (status, body) = gw.get(&format!("/iris:USER/api/kernels/{id}")).await;
    assert_eq!(status, 404);
    assert_eq!(body["short_message"], "NOTFOUND");
    assert_eq!(gw.delete(&format!("/iris:USER/api/kernels/{id}")).await, 404);
    let (status, _) = gw.post(&format!("/iris:USER/api/kernels/{id}/restart"), json!({})).await;
    assert_eq!(status, 404);
    let (status, _) = gw.post("/iris:USER/api/kernels/nope/interrupt", json!({})).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn starting_a_bare_kernel_is_not_implemented() {
    let gw = Gateway::start().await;
    let (status, body) = gw.post("/iris:USER/api/kernels", json!({"name": "iris-sql"})).await;
    assert_eq!(status, 501);
    assert_eq!(body["short_message"], "TODO");
    assert_eq!(body["message"], "In 'USER' on 'iris' start a 'iris-sql' kernel");
}

#[tokio::test]
async fn auxiliary_routes() {
    let gw = Gateway::start().await;
    assert_eq!(gw.get("/iris:USER/tree").await, (200, json!({})));
    assert_eq!(gw.get("/iris:USER/hub/api").await, (404, json!({})));
    let (status, body) = gw.get("/iris:USER/login").await;
    assert_eq!(status, 501);
    assert_eq!(body["message"], "TODO: /iris:USER/login");
    let (status, _) = gw.post("/iris:USER/hub/login", json!({})).await;
    assert_eq!(status, 501);
    let (status, body) = gw.get("/iris:USER/logout").await;
    assert_eq!(status, 200);
    assert_eq!(body["info"], "Successfully logged out of iris:USER.");
}
