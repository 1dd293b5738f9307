use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use shared::protocol::LINK_LOCAL_PREFIX;
use crate::mdns::browser::TransportEvent;

/// One local network interface as seen at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NetworkInterface {
    pub name: String,
    pub address: String,
    pub loopback: bool,
}

impl NetworkInterface {
    /// Usable for discovery: not loopback and not link-local.
    pub fn is_valid(&self) -> bool {
        !self.loopback && !self.address.starts_with(LINK_LOCAL_PREFIX)
    }
}

pub fn has_valid_interface(interfaces: &[NetworkInterface]) -> bool {
    interfaces.iter().any(NetworkInterface::is_valid)
}

/// Questions the browser asks about the host's own network.
pub trait NetworkInterfaces: Send + Sync {
    fn is_local_address(&self, address: &str) -> bool;
}

/// Interfaces of the machine we run on
pub struct SystemInterfaces;

impl SystemInterfaces {
    pub fn list() -> Vec<NetworkInterface> {
        match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces
                .into_iter()
                .map(|iface| NetworkInterface {
                    address: iface.ip().to_string(),
                    loopback: iface.is_loopback(),
                    name: iface.name,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list network interfaces: {}", e);
                Vec::new()
            }
        }
    }
}

impl NetworkInterfaces for SystemInterfaces {
    fn is_local_address(&self, address: &str) -> bool {
        Self::list().iter().any(|iface| iface.address == address)
    }
}

/// Poll the interface list and emit a network change whenever it differs
/// from the previous poll.
pub async fn watch_for_changes(
    tx: mpsc::Sender<TransportEvent>,
    poll: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Watching network interfaces every {:?}", poll);

    let mut ticker = tokio::time::interval(poll);
    let mut last: Option<BTreeSet<NetworkInterface>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = SystemInterfaces::list();
                let current_set: BTreeSet<NetworkInterface> = current.iter().cloned().collect();

                // The first poll only records the baseline.
                let changed = last.as_ref().is_some_and(|prev| *prev != current_set);
                last = Some(current_set);

                if changed {
                    tracing::info!("Network interfaces changed ({} present)", current.len());
                    if tx.send(TransportEvent::NetworkChange(current)).await.is_err() {
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Interface watcher shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(address: &str, loopback: bool) -> NetworkInterface {
        NetworkInterface {
            name: "test0".to_string(),
            address: address.to_string(),
            loopback,
        }
    }

    #[test]
    fn test_interface_validity() {
        assert!(iface("192.168.1.20", false).is_valid());
        assert!(!iface("127.0.0.1", true).is_valid());
        assert!(!iface("169.254.10.1", false).is_valid());
    }

    #[test]
    fn test_has_valid_interface() {
        assert!(!has_valid_interface(&[]));
        assert!(!has_valid_interface(&[iface("127.0.0.1", true), iface("169.254.3.3", false)]));
        assert!(has_valid_interface(&[iface("169.254.3.3", false), iface("10.0.0.4", false)]));
    }

    #[test]
    fn test_system_interfaces_include_loopback() {
        let interfaces = SystemInterfaces::list();
        if interfaces.iter().any(|i| i.address == "127.0.0.1") {
            assert!(SystemInterfaces.is_local_address("127.0.0.1"));
        }
        assert!(!SystemInterfaces.is_local_address("203.0.113.77"));
    }
}
