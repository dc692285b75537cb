use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gateway_backend::{AtelierBootstrapper, NativeConnector, RestClient, SettingsResolver};
use gateway_core::backend::{Bootstrapper, NoBootstrap};
use gateway_kernel::NamespaceDirectory;
use gateway_settings::GatewaySettings;
use gateway_telemetry::{init_telemetry, TelemetryConfig};
use tracing::Level;

/// Jupyter server that runs notebook kernels inside InterSystems IRIS namespaces.
#[derive(Debug, Parser)]
#[command(name = "iris-gateway", version)]
struct Args {
    /// Settings file (defaults to ~/.iris-gateway/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

fn telemetry_config(settings: &GatewaySettings) -> TelemetryConfig {
    let log_level = settings.logging.level.parse().unwrap_or(Level::INFO);
    let module_levels = settings
        .logging
        .modules
        .iter()
        .filter_map(|(module, level)| level.parse().ok().map(|level| (module.clone(), level)))
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        json: settings.logging.json,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let path = args.config.unwrap_or_else(gateway_settings::settings_path);
    let mut settings = gateway_settings::load_settings_from_path(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let _telemetry = init_telemetry(telemetry_config(&settings));
    tracing::info!(servers = settings.servers.len(), "starting iris-gateway");

    let backend = &settings.backend;
    let rest = Arc::new(RestClient::new(Duration::from_millis(backend.request_timeout_ms))?);
    let bootstrapper: Arc<dyn Bootstrapper> = if backend.install_stub {
        let mut atelier = AtelierBootstrapper::new(rest, backend.stub_class.clone(), backend.api_version);
        if let Some(source) = &backend.stub_source_path {
            atelier = atelier.with_source(source);
        }
        Arc::new(atelier)
    } else {
        Arc::new(NoBootstrap)
    };
    let connector = NativeConnector::new(
        Duration::from_millis(backend.connect_timeout_ms),
        backend.stub_class.clone(),
    );
    let directory = Arc::new(NamespaceDirectory::new(
        Arc::new(SettingsResolver::new(settings.servers.clone())),
        bootstrapper,
        Arc::new(connector),
    ));

    let config = gateway_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_send_queue: settings.server.max_send_queue,
        heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms),
    };
    let handle = gateway_server::start(config, directory)
        .await
        .context("starting server")?;
    tracing::info!(addr = %handle.addr, "iris-gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
