use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use gateway_kernel::{MessageRouter, NamespaceDirectory};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::channels::{ChannelOptions, ChannelStats};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50773,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<NamespaceDirectory>,
    pub router: Arc<MessageRouter>,
    pub stats: Arc<ChannelStats>,
    pub channel_options: ChannelOptions,
}

impl AppState {
    pub fn new(directory: Arc<NamespaceDirectory>, config: &ServerConfig) -> Self {
        Self {
            router: Arc::new(MessageRouter::new(directory.clone())),
            directory,
            stats: Arc::new(ChannelStats::default()),
            channel_options: ChannelOptions {
                max_send_queue: config.max_send_queue,
                heartbeat_interval: config.heartbeat_interval,
            },
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/{ns}/api/kernelspecs", get(api::kernelspecs))
        .route("/{ns}/api/kernels", get(api::list_kernels).post(api::start_kernel))
        .route(
            "/{ns}/api/kernels/{kernel_id}",
            get(api::get_kernel).delete(api::delete_kernel),
        )
        .route("/{ns}/api/kernels/{kernel_id}/interrupt", post(api::interrupt_kernel))
        .route("/{ns}/api/kernels/{kernel_id}/restart", post(api::restart_kernel))
        .route("/{ns}/api/kernels/{kernel_id}/channels", get(api::channels))
        .route("/{ns}/api/sessions", get(api::list_sessions).post(api::create_session))
        .route("/{ns}/api/sessions/{session_id}", delete(api::delete_session))
        .route("/{ns}/tree", get(api::tree))
        .route("/{ns}/hub/api", get(api::hub_api))
        .route("/{ns}/hub/login", post(api::hub_login))
        .route("/{ns}/login", get(api::login))
        .route("/{ns}/logout", get(api::logout))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, directory: Arc<NamespaceDirectory>) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(directory, &config);
    let router = build_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "gateway listening");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "server terminated");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        state,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn stats(&self) -> &ChannelStats {
        &self.state.stats
    }

    /// Stop accepting requests, then shut down every kernel.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        // Open channel sockets keep graceful shutdown waiting; kernels are
        // disposed regardless once the deadline passes.
        if tokio::time::timeout(Duration::from_secs(5), self.server).await.is_err() {
            tracing::warn!("server did not drain in time");
        }
        self.state.directory.dispose_all().await;
        tracing::info!("gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use gateway_core::backend::NoBootstrap;
    use gateway_backend::mock::MockConnector;
    use gateway_backend::SettingsResolver;

    use super::*;

    fn directory() -> Arc<NamespaceDirectory> {
        Arc::new(NamespaceDirectory::new(
            Arc::new(SettingsResolver::new(BTreeMap::new())),
            Arc::new(NoBootstrap),
            Arc::new(MockConnector::new()),
        ))
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, directory()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["dropped_frames"], 0);

        handle.shutdown().await;
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState::new(directory(), &ServerConfig::default());
        assert_eq!(state.channel_options.max_send_queue, 256);
        let _router = build_router(state);
    }
}
