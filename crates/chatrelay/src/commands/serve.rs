//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use chatrelay::client::{BridgeConnector, ClientConnector};
use chatrelay::config::{self, Config};
use chatrelay::hosting::{ContentHost, HttpContentHost};
use chatrelay::notify::{NotificationClient, WebhookNotifier};
use chatrelay::pipeline::{DownstreamRequestBuilder, HttpBackend, MessageAggregator, ReplyPipeline};
use chatrelay::server::{self, AppState};
use chatrelay::session::{ControllerDeps, SessionController, SessionRegistry};
use chatrelay::store::{FileSessionStore, SessionStore};

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
    sessions_dir_override: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config from {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(dir) = sessions_dir_override {
        config.sessions.path = dir.to_path_buf();
    }

    let sessions_path = config::resolve_path(Path::new(config_path), &config.sessions.path);
    tokio::fs::create_dir_all(&sessions_path)
        .await
        .with_context(|| format!("failed to create sessions directory {}", sessions_path.display()))?;
    info!(path = %sessions_path.display(), "Using sessions directory");

    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&sessions_path));
    let connector: Arc<dyn ClientConnector> = Arc::new(BridgeConnector::new(config.bridge.clone()));
    let notifier: Arc<dyn NotificationClient> =
        Arc::new(WebhookNotifier::new(&config.notifications));

    let content_host: Option<Arc<dyn ContentHost>> = match &config.content_host.url {
        Some(url) => Some(Arc::new(HttpContentHost::new(url.clone()))),
        None => {
            warn!("No content host configured, inbound images will be dropped");
            None
        }
    };

    let builder = match &config.backend.url {
        Some(url) => {
            let backend = HttpBackend::new(
                url.clone(),
                Duration::from_secs(config.backend.timeout_seconds),
            );
            Some(DownstreamRequestBuilder::new(
                Arc::new(backend),
                content_host,
                config.content_host.path_hint.clone(),
            ))
        }
        None => {
            warn!("No backend configured, inbound messages will not be answered");
            None
        }
    };

    let registry = SessionRegistry::new();
    let pipeline = ReplyPipeline::new(registry.clone(), builder);
    let aggregator = MessageAggregator::new(config.pipeline.debounce(), Arc::new(pipeline));

    let controller = SessionController::new(ControllerDeps {
        registry,
        store,
        connector,
        notifier,
        aggregator,
        pairing_timeout: config.sessions.pairing_timeout(),
    });

    if config.sessions.restore_on_start {
        let report = controller
            .restore_all()
            .await
            .context("failed to restore sessions")?;
        if !report.restored.is_empty() {
            info!(sessions = ?report.restored, "Restored sessions from disk");
        }
    }

    let state = AppState::new(controller.clone(), config.server.max_connections);
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close every client; credentials stay on disk for the next start
    controller.shutdown().await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
