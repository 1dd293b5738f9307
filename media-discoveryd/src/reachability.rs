use async_trait::async_trait;
use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use shared::probe::{ProbeError, ReachabilityProbe};
use shared::types::{ConnectionCandidate, ServerRecord};
use crate::config::ProbeConfig;

/// Probes a candidate by fetching the server's identity document.
pub struct HttpProbe {
    client: Client,
    path: String,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            path: config.path.clone(),
        })
    }

    fn identity_url(&self, candidate: &ConnectionCandidate) -> String {
        format!("{}{}", candidate.url(), self.path)
    }

    async fn check_identity(&self, url: &str, owner: &ServerRecord) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        match machine_identifier(&body)? {
            Some(found) if found != owner.identity => Err(ProbeError::IdentityMismatch {
                expected: owner.identity.clone(),
                found,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(
        &self,
        candidate: &ConnectionCandidate,
        owner: &ServerRecord,
    ) -> Result<(), ProbeError> {
        let url = self.identity_url(candidate);

        let result = self.check_identity(&url, owner).await;

        match &result {
            Ok(()) => tracing::debug!("{} is reachable", url),
            Err(e) => tracing::debug!("{} is unreachable: {}", url, e),
        }
        result
    }
}

/// Pull `machineIdentifier` off the root `MediaContainer` element.
/// Bodies that are not such a document yield `None`.
fn machine_identifier(body: &str) -> Result<Option<String>, ProbeError> {
    let mut reader = Reader::from_str(body);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() != b"MediaContainer" {
                    return Ok(None);
                }
                let attr = e
                    .try_get_attribute("machineIdentifier")
                    .map_err(|err| ProbeError::InvalidResponse(err.to_string()))?;
                return match attr {
                    Some(attr) => {
                        let value = attr
                            .unescape_value()
                            .map_err(|err| ProbeError::InvalidResponse(err.to_string()))?;
                        Ok(Some(value.into_owned()))
                    }
                    None => Ok(None),
                };
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(ProbeError::InvalidResponse(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::ConnectionOrigin;

    #[test]
    fn test_reads_machine_identifier() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaContainer size="0" claimed="1" machineIdentifier="abc123" version="1.2.3.4"> </MediaContainer>"#;
        assert_eq!(machine_identifier(body).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_self_closing_container() {
        let body = r#"<MediaContainer machineIdentifier="xyz"/>"#;
        assert_eq!(machine_identifier(body).unwrap().as_deref(), Some("xyz"));
    }

    #[test]
    fn test_other_documents_have_no_identifier() {
        assert_eq!(machine_identifier("<html><body>ok</body></html>").unwrap(), None);
        assert_eq!(machine_identifier("").unwrap(), None);
        assert_eq!(machine_identifier("<MediaContainer size=\"1\"/>").unwrap(), None);
    }

    #[test]
    fn test_identity_url() {
        let probe = HttpProbe::new(&ProbeConfig::default()).unwrap();
        let candidate = ConnectionCandidate::secure(
            "10.0.0.2",
            "abc.plex.direct",
            32400,
            ConnectionOrigin::Discovered,
        );
        assert_eq!(
            probe.identity_url(&candidate),
            "https://10-0-0-2.abc.plex.direct:32400/identity"
        );
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let config = ProbeConfig {
            timeout_ms: 500,
            ..Default::default()
        };
        let probe = HttpProbe::new(&config).unwrap();

        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let owner = ServerRecord::new("srv1", "Server");
        let mut candidate = ConnectionCandidate::plain("127.0.0.1", port, ConnectionOrigin::Discovered);
        let state = candidate.test_reachability(&owner, &probe).await;
        assert_eq!(state, shared::types::ReachabilityState::Unreachable);
    }
}
