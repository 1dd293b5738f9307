use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{ReachabilityState, Scheme, ServerRecord};

#[derive(Serialize)]
struct CandidateView<'a> {
    host: &'a str,
    port: u16,
    scheme: Scheme,
    state: ReachabilityState,
}

/// Only stable fields are hashed; `updated_at` moves on every re-announcement
/// without the server actually changing.
#[derive(Serialize)]
struct HashView<'a> {
    identity: &'a str,
    display_name: &'a str,
    version: Option<String>,
    candidates: Vec<CandidateView<'a>>,
    active: Option<usize>,
}

/// Computes a SHA-256 hash of the server list.
/// Servers are sorted by identity so the hash does not depend on input order.
pub fn compute_hash(servers: &[ServerRecord]) -> String {
    let mut indices: Vec<usize> = (0..servers.len()).collect();
    indices.sort_by(|&a, &b| servers[a].identity.cmp(&servers[b].identity));

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let s = &servers[i];
            HashView {
                identity: &s.identity,
                display_name: &s.display_name,
                version: s.version.as_ref().map(ToString::to_string),
                candidates: s
                    .candidates()
                    .iter()
                    .map(|c| CandidateView {
                        host: c.host(),
                        port: c.port(),
                        scheme: c.scheme(),
                        state: c.state(),
                    })
                    .collect(),
                active: s.active_index(),
            }
        })
        .collect();

    // Plain strings, enums and integers only; this cannot fail.
    let json = serde_json::to_string(&views).unwrap_or_default();

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
