use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use shared::types::{ConnectionCandidate, ServerRecord};
use crate::registry::{hash, table::{ServerTable, UpsertOutcome}};

/// Commands sent to the registry thread
pub enum RegistryCommand {
    Upsert(ServerRecord, oneshot::Sender<UpsertOutcome>),
    RemoveAndSnapshot(String, oneshot::Sender<(bool, Vec<ServerRecord>)>),
    Snapshot(oneshot::Sender<Vec<ServerRecord>>),
    Get(String, oneshot::Sender<Option<ServerRecord>>),
    ApplyProbe {
        identity: String,
        tested: Vec<ConnectionCandidate>,
        reply: oneshot::Sender<bool>,
    },
    Clear(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the discovered-server registry.
///
/// The table lives on its own thread and every command runs to completion
/// before the next one is read, so each command is one critical section and
/// no caller ever sees a half-applied change.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn the registry thread with an empty table
    pub fn spawn(hash_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);

        let publish_hash = |table: &ServerTable, hash_tx: &watch::Sender<String>| {
            let new_hash = hash::compute_hash(&table.snapshot());
            hash_tx.send_if_modified(|current| {
                if *current == new_hash {
                    false
                } else {
                    *current = new_hash;
                    true
                }
            });
        };

        thread::spawn(move || {
            let mut table = ServerTable::new();
            publish_hash(&table, &hash_tx);

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::Upsert(record, reply) => {
                        let outcome = table.upsert(record);
                        if outcome != UpsertOutcome::Rejected {
                            publish_hash(&table, &hash_tx);
                        }
                        let _ = reply.send(outcome);
                    }
                    RegistryCommand::RemoveAndSnapshot(identity, reply) => {
                        let removed = table.remove(&identity).is_some();
                        if removed {
                            publish_hash(&table, &hash_tx);
                        }
                        let _ = reply.send((removed, table.snapshot()));
                    }
                    RegistryCommand::Snapshot(reply) => {
                        let _ = reply.send(table.snapshot());
                    }
                    RegistryCommand::Get(identity, reply) => {
                        let _ = reply.send(table.get(&identity).cloned());
                    }
                    RegistryCommand::ApplyProbe { identity, tested, reply } => {
                        let applied = table.apply_reachability(&identity, &tested);
                        if applied {
                            publish_hash(&table, &hash_tx);
                        }
                        let _ = reply.send(applied);
                    }
                    RegistryCommand::Clear(reply) => {
                        table.clear();
                        publish_hash(&table, &hash_tx);
                        let _ = reply.send(());
                    }
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Insert or merge a server
    pub async fn upsert(&self, record: ServerRecord) -> Result<UpsertOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Upsert(record, reply)).await?;
        Ok(rx.await?)
    }

    /// Remove a server, then snapshot what is left, in one step.
    /// Returns whether anything was removed.
    pub async fn remove_and_snapshot(&self, identity: String) -> Result<(bool, Vec<ServerRecord>)> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::RemoveAndSnapshot(identity, reply)).await?;
        Ok(rx.await?)
    }

    /// All servers in insertion order
    pub async fn snapshot(&self) -> Result<Vec<ServerRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Snapshot(reply)).await?;
        Ok(rx.await?)
    }

    pub async fn get(&self, identity: String) -> Result<Option<ServerRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Get(identity, reply)).await?;
        Ok(rx.await?)
    }

    /// Write back candidates that were probed outside the registry
    pub async fn apply_probe(&self, identity: String, tested: Vec<ConnectionCandidate>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::ApplyProbe { identity, tested, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn clear(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Clear(reply)).await?;
        Ok(rx.await?)
    }

    /// Stop the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::ConnectionOrigin;

    fn server(identity: &str) -> ServerRecord {
        let mut record = ServerRecord::new(identity, "Server");
        record.add_candidate(ConnectionCandidate::plain("10.0.0.2", 32400, ConnectionOrigin::Discovered));
        record
    }

    #[tokio::test]
    async fn test_upsert_remove_snapshot() {
        let (hash_tx, _hash_rx) = watch::channel(String::new());
        let registry = RegistryHandle::spawn(hash_tx);

        registry.upsert(server("srv1")).await.unwrap();
        registry.upsert(server("srv2")).await.unwrap();

        let (removed, remaining) = registry.remove_and_snapshot("srv1".into()).await.unwrap();
        assert!(removed);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].identity, "srv2");

        let (removed, remaining) = registry.remove_and_snapshot("srv1".into()).await.unwrap();
        assert!(!removed);
        assert_eq!(remaining.len(), 1);

        assert!(registry.get("srv2".into()).await.unwrap().is_some());
        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_hash_follows_mutations() {
        let (hash_tx, hash_rx) = watch::channel(String::new());
        let registry = RegistryHandle::spawn(hash_tx);

        // snapshot is a round-trip, so the initial hash has been published
        registry.snapshot().await.unwrap();
        let empty = hash_rx.borrow().clone();
        assert_eq!(empty, hash::compute_hash(&[]));

        registry.upsert(server("srv1")).await.unwrap();
        let one = hash_rx.borrow().clone();
        assert_ne!(empty, one);

        registry.clear().await.unwrap();
        assert_eq!(*hash_rx.borrow(), empty);
        assert!(registry.snapshot().await.unwrap().is_empty());
    }
}
