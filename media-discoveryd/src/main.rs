mod api;
mod config;
mod mdns;
mod netif;
mod reachability;
mod registry;
mod registry_manager;
mod scheduler;
mod server_manager;
mod service_browser;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::mdns::advertise::MdnsDevicePublisher;
use crate::mdns::browser::MdnsTransport;
use crate::netif::SystemInterfaces;
use crate::reachability::HttpProbe;
use crate::registry_manager::RegistryHandle;
use crate::scheduler::TimerHandle;
use crate::server_manager::{BroadcastServerManager, DisabledCloudDirectory, ServerUpdate};
use crate::service_browser::{BrowserSettings, Collaborators, ServiceBrowser};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("media_discoveryd=info"))
        )
        .init();

    tracing::info!("Starting media-discoveryd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/media-discovery/discoveryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Registry thread publishes its hash as soon as it starts
    let (hash_tx, hash_rx) = watch::channel(String::new());
    let registry = RegistryHandle::spawn(hash_tx);

    let probe = Arc::new(HttpProbe::new(&config.probe)?);

    let mdns_daemon = ServiceDaemon::new()
        .context("Failed to create mDNS daemon")?;
    if let Some(interface) = &config.discovery.interface {
        mdns_daemon
            .disable_interface(mdns_sd::IfKind::All)
            .context("Failed to disable default interfaces")?;
        mdns_daemon
            .enable_interface(interface.as_str())
            .with_context(|| format!("Failed to enable interface {}", interface))?;
    }

    let publisher = Arc::new(MdnsDevicePublisher::new(mdns_daemon.clone(), config.device.clone()));
    if let Err(e) = publisher.publish().await {
        // Discovery still works without our own advertisement
        tracing::warn!("Device advertisement unavailable: {:#}", e);
    }

    let server_manager = Arc::new(BroadcastServerManager::new(registry.clone(), probe.clone(), 64));
    let updates = server_manager.subscribe();

    let cancel = CancellationToken::new();

    let updates_handle = tokio::spawn(log_updates(updates, cancel.clone()));

    let (timer, timer_rx) = TimerHandle::channel();
    let browser = Arc::new(ServiceBrowser::new(
        registry.clone(),
        Collaborators {
            server_manager,
            cloud_directory: Arc::new(DisabledCloudDirectory),
            device_publisher: publisher.clone(),
            interfaces: Arc::new(SystemInterfaces),
            transport: Arc::new(MdnsTransport::new(
                mdns_daemon.clone(),
                config.discovery.interface.clone(),
            )),
            probe,
        },
        timer.clone(),
        BrowserSettings::from(&config.discovery),
        cancel.clone(),
    ));

    // Spawn mDNS browser task
    let (event_tx, event_rx) = mpsc::channel(256);
    let browser_cancel = cancel.clone();
    let browser_daemon = mdns_daemon.clone();
    let browser_tx = event_tx.clone();
    let service_type = config.discovery.service_type.clone();
    let mdns_handle = tokio::spawn(async move {
        if let Err(e) = mdns::browser::run_browser(browser_daemon, service_type, browser_tx, browser_cancel).await {
            tracing::error!("mDNS browser error: {}", e);
        }
    });

    let netif_handle = tokio::spawn(netif::watch_for_changes(
        event_tx,
        config.discovery.interface_poll(),
        cancel.clone(),
    ));

    let events_handle = tokio::spawn(service_browser::run(browser.clone(), event_rx, cancel.clone()));

    let timer_handle = tokio::spawn(scheduler::run(timer_rx, browser, cancel.clone()));
    timer.set_timeout(config.discovery.debounce());

    let app = api::routes::router(api::routes::AppState {
        registry: registry.clone(),
        hash_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    timer.remove_timeout();
    cancel.cancel();

    let _ = tokio::join!(
        mdns_handle,
        netif_handle,
        events_handle,
        timer_handle,
        updates_handle,
        server_handle
    );

    if let Err(e) = publisher.unpublish().await {
        tracing::error!("Failed to unpublish device: {:#}", e);
    }

    if let Err(e) = registry.clear().await {
        tracing::error!("Failed to clear registry: {}", e);
    }
    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to shutdown registry: {}", e);
    }

    if let Err(e) = mdns_daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn log_updates(mut updates: broadcast::Receiver<ServerUpdate>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(ServerUpdate::Discovered(server)) => {
                    let via = server.active_candidate().map(|c| c.url()).unwrap_or_default();
                    tracing::info!("Discovered {} ({}) {}", server.display_name, server.identity, via);
                }
                Ok(ServerUpdate::Replaced { origin, servers }) => {
                    tracing::info!("{} {} servers", servers.len(), origin);
                }
                Ok(ServerUpdate::ReachabilityChecked(servers)) => {
                    let reachable = servers.iter().filter(|s| s.active_candidate().is_some()).count();
                    tracing::info!("{}/{} servers reachable", reachable, servers.len());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} server updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}
