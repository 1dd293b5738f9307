use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::protocol::{DEFAULT_SERVER_PORT, PARAM_HOST, PARAM_PORT, PARAM_VERSION};
use crate::version::{ServerVersion, VersionError};

/// Why an advertisement parameter could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("parameter {key} is missing")]
    Missing { key: &'static str },

    #[error("parameter {key} has invalid value {value:?}: {source}")]
    Invalid {
        key: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Outcome of resolving the advertised port. `error` is set when the
/// default port was substituted.
#[derive(Debug)]
pub struct PortResolution {
    pub port: u16,
    pub error: Option<ParamError>,
}

/// One discovery broadcast as delivered by the transport.
/// Immutable once built; a re-announcement produces a new record.
#[derive(Debug, Clone)]
pub struct AdvertisementRecord {
    /// Stable unique id of the advertising server
    pub identity: String,

    /// Human readable label
    pub declared_name: String,

    /// Address the advertisement came from
    pub source_address: String,

    /// Raw key/value parameters carried by the advertisement
    pub params: HashMap<String, String>,

    /// When the advertisement was received
    pub last_seen: Instant,
}

impl AdvertisementRecord {
    pub fn new(
        identity: impl Into<String>,
        declared_name: impl Into<String>,
        source_address: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            declared_name: declared_name.into(),
            source_address: source_address.into(),
            params,
            last_seen: Instant::now(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parse the `Port` parameter.
    pub fn parse_port(&self) -> Result<u16, ParamError> {
        let value = self
            .param(PARAM_PORT)
            .ok_or(ParamError::Missing { key: PARAM_PORT })?;

        value.trim().parse::<u16>().map_err(|source| ParamError::Invalid {
            key: PARAM_PORT,
            value: value.to_string(),
            source,
        })
    }

    /// Parse the `Port` parameter, substituting [`DEFAULT_SERVER_PORT`] on failure.
    pub fn resolve_port(&self) -> PortResolution {
        self.resolve_port_or(DEFAULT_SERVER_PORT)
    }

    pub fn resolve_port_or(&self, default: u16) -> PortResolution {
        match self.parse_port() {
            Ok(port) => PortResolution { port, error: None },
            Err(e) => PortResolution {
                port: default,
                error: Some(e),
            },
        }
    }

    /// The `Host` parameter, if present and non-empty. Its presence means the
    /// server can be reached over TLS through a synthesized hostname.
    pub fn host_header(&self) -> Option<&str> {
        self.param(PARAM_HOST).filter(|h| !h.is_empty())
    }

    /// Parse the `Version` parameter, if the advertisement carries one.
    pub fn version(&self) -> Option<Result<ServerVersion, VersionError>> {
        self.param(PARAM_VERSION).map(str::parse)
    }

    pub fn time_since_last_seen(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

/// How a connection was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionOrigin {
    Discovered,
    Manual,
    CloudDirectory,
}

impl fmt::Display for ConnectionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionOrigin::Discovered => write!(f, "discovered"),
            ConnectionOrigin::Manual => write!(f, "manual"),
            ConnectionOrigin::CloudDirectory => write!(f, "cloud_directory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityState {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Builds the per-server TLS hostname: every `.` of the address becomes `-`,
/// followed by `.` and the advertised host header.
pub fn secure_hostname(address: &str, host_header: &str) -> String {
    format!("{}.{}", address.replace('.', "-"), host_header)
}

/// A single network path to a server.
///
/// The reachability state only changes through
/// [`ConnectionCandidate::test_reachability`](crate::probe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCandidate {
    host: String,
    port: u16,
    scheme: Scheme,
    origin: ConnectionOrigin,
    #[serde(default)]
    pub(crate) state: ReachabilityState,
    /// Order of the test that produced `state`; 0 when never tested
    #[serde(skip)]
    pub(crate) tested_seq: u64,
}

impl ConnectionCandidate {
    /// Plain HTTP candidate pointing straight at `host`.
    pub fn plain(host: impl Into<String>, port: u16, origin: ConnectionOrigin) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: Scheme::Http,
            origin,
            state: ReachabilityState::Unknown,
            tested_seq: 0,
        }
    }

    /// TLS candidate. The host is always synthesized from the source address
    /// and host header, never a bare IP.
    pub fn secure(
        source_address: &str,
        host_header: &str,
        port: u16,
        origin: ConnectionOrigin,
    ) -> Self {
        Self {
            host: secure_hostname(source_address, host_header),
            port,
            scheme: Scheme::Https,
            origin,
            state: ReachabilityState::Unknown,
            tested_seq: 0,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn origin(&self) -> ConnectionOrigin {
        self.origin
    }

    pub fn state(&self) -> ReachabilityState {
        self.state
    }

    pub fn is_reachable(&self) -> bool {
        self.state == ReachabilityState::Reachable
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Same host, port and scheme.
    pub fn same_endpoint(&self, other: &ConnectionCandidate) -> bool {
        self.host == other.host && self.port == other.port && self.scheme == other.scheme
    }
}

/// One logical server and every known path to it.
#[derive(Debug, Clone, Serialize)]
pub struct ServerRecord {
    pub identity: String,

    pub display_name: String,

    /// Parsed server version, when the advertisement carried a valid one
    pub version: Option<ServerVersion>,

    /// In discovery order
    candidates: Vec<ConnectionCandidate>,

    /// Index into `candidates`; always points at a reachable candidate
    active: Option<usize>,

    pub updated_at: DateTime<Utc>,
}

impl ServerRecord {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            version: None,
            candidates: Vec::new(),
            active: None,
            updated_at: Utc::now(),
        }
    }

    pub fn candidates(&self) -> &[ConnectionCandidate] {
        &self.candidates
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_candidate(&self) -> Option<&ConnectionCandidate> {
        self.active.and_then(|i| self.candidates.get(i))
    }

    /// Add a candidate and return its index. A candidate for an endpoint that
    /// is already known replaces the old one in place.
    pub fn add_candidate(&mut self, candidate: ConnectionCandidate) -> usize {
        match self.candidates.iter().position(|c| c.same_endpoint(&candidate)) {
            Some(idx) => {
                self.candidates[idx] = candidate;
                if self.active == Some(idx) && !self.candidates[idx].is_reachable() {
                    self.active = None;
                }
                idx
            }
            None => {
                self.candidates.push(candidate);
                self.candidates.len() - 1
            }
        }
    }

    /// Make the candidate at `index` active. Refused unless it is reachable.
    pub fn set_active(&mut self, index: usize) -> bool {
        match self.candidates.get(index) {
            Some(c) if c.is_reachable() => {
                self.active = Some(index);
                true
            }
            _ => false,
        }
    }

    /// Fold a newer record for the same identity into this one.
    pub fn merge(&mut self, incoming: ServerRecord) {
        let incoming_active = incoming.active_candidate().cloned();

        self.display_name = incoming.display_name;
        if incoming.version.is_some() {
            self.version = incoming.version;
        }
        self.updated_at = incoming.updated_at;

        for candidate in incoming.candidates {
            self.add_candidate(candidate);
        }

        if let Some(active) = incoming_active {
            if let Some(idx) = self.candidates.iter().position(|c| c.same_endpoint(&active)) {
                self.set_active(idx);
            }
        }
    }

    /// Copy the outcome of a reachability test run on a detached copy of one
    /// of this record's candidates. A result older than the one already held
    /// is dropped. Returns false when the endpoint is no longer known.
    pub fn apply_reachability(&mut self, tested: &ConnectionCandidate) -> bool {
        let Some(idx) = self.candidates.iter().position(|c| c.same_endpoint(tested)) else {
            return false;
        };
        if tested.tested_seq < self.candidates[idx].tested_seq {
            return true;
        }

        self.candidates[idx].state = tested.state;
        self.candidates[idx].tested_seq = tested.tested_seq;
        match tested.state {
            ReachabilityState::Reachable => {
                if self.active.is_none() {
                    self.active = Some(idx);
                }
            }
            _ => {
                if self.active == Some(idx) {
                    self.active = None;
                }
            }
        }
        true
    }
}
