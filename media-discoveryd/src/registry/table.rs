use std::collections::HashMap;
use shared::types::{ConnectionCandidate, ServerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Records without any candidate are never stored
    Rejected,
}

/// Known servers keyed by identity, remembering first-insertion order so
/// snapshots come out the same way every time.
#[derive(Debug, Default)]
pub struct ServerTable {
    order: Vec<String>,
    servers: HashMap<String, ServerRecord>,
}

impl ServerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new server or merge into the existing entry for its identity.
    pub fn upsert(&mut self, record: ServerRecord) -> UpsertOutcome {
        if record.candidates().is_empty() {
            return UpsertOutcome::Rejected;
        }

        match self.servers.get_mut(&record.identity) {
            Some(existing) => {
                existing.merge(record);
                UpsertOutcome::Updated
            }
            None => {
                self.order.push(record.identity.clone());
                self.servers.insert(record.identity.clone(), record);
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn remove(&mut self, identity: &str) -> Option<ServerRecord> {
        let removed = self.servers.remove(identity)?;
        self.order.retain(|id| id != identity);
        Some(removed)
    }

    pub fn get(&self, identity: &str) -> Option<&ServerRecord> {
        self.servers.get(identity)
    }

    /// All servers in insertion order
    pub fn snapshot(&self) -> Vec<ServerRecord> {
        self.order
            .iter()
            .filter_map(|id| self.servers.get(id))
            .cloned()
            .collect()
    }

    /// Write back probe results for one server. Returns false when the
    /// server left while it was being probed.
    pub fn apply_reachability(&mut self, identity: &str, tested: &[ConnectionCandidate]) -> bool {
        let Some(server) = self.servers.get_mut(identity) else {
            return false;
        };
        for candidate in tested {
            server.apply_reachability(candidate);
        }
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.servers.clear();
    }
}
