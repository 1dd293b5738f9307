/// mDNS service type advertised by media servers
pub const SERVER_SERVICE_TYPE: &str = "_plexmediasvr._tcp.local.";

/// mDNS service type for this device's own advertisement
pub const CLIENT_SERVICE_TYPE: &str = "_plexclient._tcp.local.";

/// Port assumed when an advertisement carries no usable port
pub const DEFAULT_SERVER_PORT: u16 = 32400;

/// Advertisement parameter keys
pub const PARAM_RESOURCE_IDENTIFIER: &str = "Resource-Identifier";
pub const PARAM_NAME: &str = "Name";
pub const PARAM_PORT: &str = "Port";
pub const PARAM_HOST: &str = "Host";
pub const PARAM_VERSION: &str = "Version";

/// Address exempt from the self-address filter
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Interfaces whose address starts with this are not usable for discovery
pub const LINK_LOCAL_PREFIX: &str = "169.254.";

/// Debounce window for publishing the discovered set
pub const DEBOUNCE_MS: u64 = 5000;

/// Republish interval when nothing changes
pub const HEARTBEAT_MS: u64 = 5 * 60 * 1000;

/// API path prefix
pub const API_PREFIX: &str = "/v1";
