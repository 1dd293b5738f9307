use std::collections::HashMap;
use std::net::IpAddr;
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use tokio::sync::Mutex;
use shared::protocol::{PARAM_NAME, PARAM_PORT, PARAM_RESOURCE_IDENTIFIER};
use crate::config::DeviceConfig;
use crate::netif::SystemInterfaces;
use crate::server_manager::DevicePublisher;

/// Advertises this device so servers and other clients can find it.
pub struct MdnsDevicePublisher {
    daemon: ServiceDaemon,
    config: DeviceConfig,
    registered: Mutex<Option<String>>,
}

impl MdnsDevicePublisher {
    pub fn new(daemon: ServiceDaemon, config: DeviceConfig) -> Self {
        Self {
            daemon,
            config,
            registered: Mutex::new(None),
        }
    }

    fn build_service_info(&self) -> Result<ServiceInfo> {
        let hostname = hostname::get()
            .context("Failed to get system hostname")?
            .to_string_lossy()
            .to_string();

        let name = self.config.name.clone().unwrap_or_else(|| hostname.clone());
        let instance_name = format!("media-discoveryd-{}", name);
        let host = format!("{}.local.", hostname.trim_end_matches('.'));

        let addresses: Vec<IpAddr> = match &self.config.address {
            Some(address) => vec![address
                .parse()
                .with_context(|| format!("Invalid device address: {}", address))?],
            None => SystemInterfaces::list()
                .into_iter()
                .filter(|iface| iface.is_valid())
                .filter_map(|iface| iface.address.parse().ok())
                .collect(),
        };

        if addresses.is_empty() {
            anyhow::bail!("No usable address to advertise");
        }

        let properties = HashMap::from([
            (PARAM_RESOURCE_IDENTIFIER.to_string(), instance_name.clone()),
            (PARAM_NAME.to_string(), name),
            (PARAM_PORT.to_string(), self.config.port.to_string()),
        ]);

        ServiceInfo::new(
            &self.config.service_type,
            &instance_name,
            &host,
            &addresses[..],
            self.config.port,
            properties,
        )
        .context("Failed to create ServiceInfo")
    }

    /// Register (or re-register) the advertisement
    pub async fn publish(&self) -> Result<()> {
        let service_info = self.build_service_info()?;
        let mut registered = self.registered.lock().await;

        if let Some(previous) = registered.take() {
            let _ = self.daemon.unregister(&previous);
        }

        let fullname = service_info.get_fullname().to_string();
        self.daemon
            .register(service_info)
            .context("Failed to register mDNS service")?;

        tracing::info!("Registered {} on port {}", fullname, self.config.port);
        *registered = Some(fullname);
        Ok(())
    }

    pub async fn unpublish(&self) -> Result<()> {
        let Some(fullname) = self.registered.lock().await.take() else {
            return Ok(());
        };

        self.daemon
            .unregister(&fullname)
            .context("Failed to unregister mDNS service")?;

        tracing::info!("Unregistered {}", fullname);
        Ok(())
    }
}

#[async_trait]
impl DevicePublisher for MdnsDevicePublisher {
    async fn publish_device(&self) {
        if let Err(e) = self.publish().await {
            tracing::error!("Failed to publish device: {:#}", e);
        }
    }
}
