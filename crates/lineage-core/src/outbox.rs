//! # Outbox
//!
//! Registrations made while the registry store is unavailable are saved
//! locally under a UUID ticket and replayed later by [`Registry::reconcile`].
//!
//! A queued registration never carries an identifier: identifiers are only
//! minted by the registry store at replay time, so a queued person cannot
//! collide with one registered in the meantime. The ticket doubles as the
//! idempotency key, so replaying an entry twice registers it once.

use crate::registry::{Registry, RegistrationReceipt, RegistrationRequest};
use crate::storage::RegistryStore;
use crate::{DisplayId, LineageError};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Queue entries: enqueue order -> postcard-encoded `PendingRegistration`
const OUTBOX: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// A registration waiting for the registry store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub ticket: Uuid,
    pub queued_at: DateTime<Utc>,
    pub request: RegistrationRequest,
}

/// Outcome of [`Registry::register_or_queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Registered(RegistrationReceipt),
    /// Saved locally, will sync.
    Queued { ticket: Uuid },
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub registered: Vec<(Uuid, DisplayId)>,
    /// Permanently refused entries, with the reason. They are dropped.
    pub rejected: Vec<(Uuid, String)>,
    /// Entries left for a later run.
    pub pending: usize,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    next: u64,
    entries: BTreeMap<u64, PendingRegistration>,
}

enum OutboxBackend {
    Memory(Mutex<MemoryQueue>),
    Redb(Database),
}

/// Durable local queue of registrations.
pub struct Outbox {
    backend: OutboxBackend,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backend {
            OutboxBackend::Memory(_) => "memory",
            OutboxBackend::Redb(_) => "redb",
        };
        f.debug_struct("Outbox").field("backend", &kind).finish()
    }
}

fn io_err(e: impl std::fmt::Display) -> LineageError {
    LineageError::PersistenceUnavailable(format!("outbox: {}", e))
}

fn poisoned() -> LineageError {
    LineageError::PersistenceUnavailable("outbox lock poisoned".to_string())
}

impl Outbox {
    /// A queue that lives as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: OutboxBackend::Memory(Mutex::new(MemoryQueue::default())),
        }
    }

    /// Open or create a queue file. Keep it apart from the registry database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LineageError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(OUTBOX).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }
        Ok(Self {
            backend: OutboxBackend::Redb(db),
        })
    }

    /// Queue a request and return its ticket.
    ///
    /// A request without an idempotency key gets the ticket as its key.
    pub fn enqueue(&self, mut request: RegistrationRequest) -> Result<Uuid, LineageError> {
        let ticket = Uuid::new_v4();
        if request.idempotency_key.is_none() {
            request.idempotency_key = Some(ticket.to_string());
        }
        let entry = PendingRegistration {
            ticket,
            queued_at: Utc::now(),
            request,
        };

        match &self.backend {
            OutboxBackend::Memory(queue) => {
                let mut queue = queue.lock().map_err(|_| poisoned())?;
                queue.next += 1;
                let slot = queue.next;
                queue.entries.insert(slot, entry);
            }
            OutboxBackend::Redb(db) => {
                let bytes = postcard::to_allocvec(&entry)
                    .map_err(|e| LineageError::Serialization(e.to_string()))?;
                let write_txn = db.begin_write().map_err(io_err)?;
                {
                    let mut metadata = write_txn.open_table(METADATA).map_err(io_err)?;
                    let slot = metadata
                        .get("next_slot")
                        .map_err(io_err)?
                        .map(|v| v.value())
                        .unwrap_or(0)
                        + 1;
                    metadata.insert("next_slot", slot).map_err(io_err)?;
                    let mut table = write_txn.open_table(OUTBOX).map_err(io_err)?;
                    table.insert(slot, bytes.as_slice()).map_err(io_err)?;
                }
                write_txn.commit().map_err(io_err)?;
            }
        }
        Ok(ticket)
    }

    /// Queued entries in enqueue order.
    pub fn pending(&self) -> Result<Vec<PendingRegistration>, LineageError> {
        match &self.backend {
            OutboxBackend::Memory(queue) => {
                let queue = queue.lock().map_err(|_| poisoned())?;
                Ok(queue.entries.values().cloned().collect())
            }
            OutboxBackend::Redb(db) => {
                let read_txn = db.begin_read().map_err(io_err)?;
                let table = read_txn.open_table(OUTBOX).map_err(io_err)?;
                let mut entries = Vec::new();
                for entry in table.iter().map_err(io_err)? {
                    let (_, value) = entry.map_err(io_err)?;
                    entries.push(
                        postcard::from_bytes(value.value())
                            .map_err(|e| LineageError::Serialization(e.to_string()))?,
                    );
                }
                Ok(entries)
            }
        }
    }

    pub fn len(&self) -> Result<usize, LineageError> {
        match &self.backend {
            OutboxBackend::Memory(queue) => {
                Ok(queue.lock().map_err(|_| poisoned())?.entries.len())
            }
            OutboxBackend::Redb(db) => {
                let read_txn = db.begin_read().map_err(io_err)?;
                let table = read_txn.open_table(OUTBOX).map_err(io_err)?;
                Ok(table.len().map_err(io_err)? as usize)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool, LineageError> {
        Ok(self.len()? == 0)
    }

    /// Drop an entry. Returns `false` if the ticket is unknown.
    pub fn remove(&self, ticket: Uuid) -> Result<bool, LineageError> {
        match &self.backend {
            OutboxBackend::Memory(queue) => {
                let mut queue = queue.lock().map_err(|_| poisoned())?;
                let slot = queue
                    .entries
                    .iter()
                    .find(|(_, e)| e.ticket == ticket)
                    .map(|(slot, _)| *slot);
                Ok(slot.and_then(|s| queue.entries.remove(&s)).is_some())
            }
            OutboxBackend::Redb(db) => {
                let write_txn = db.begin_write().map_err(io_err)?;
                let removed = {
                    let mut table = write_txn.open_table(OUTBOX).map_err(io_err)?;
                    let mut slot = None;
                    for entry in table.iter().map_err(io_err)? {
                        let (key, value) = entry.map_err(io_err)?;
                        let pending: PendingRegistration = postcard::from_bytes(value.value())
                            .map_err(|e| LineageError::Serialization(e.to_string()))?;
                        if pending.ticket == ticket {
                            slot = Some(key.value());
                            break;
                        }
                    }
                    match slot {
                        Some(slot) => table.remove(slot).map_err(io_err)?.is_some(),
                        None => false,
                    }
                };
                write_txn.commit().map_err(io_err)?;
                Ok(removed)
            }
        }
    }
}

// =============================================================================
// REGISTRY INTEGRATION
// =============================================================================

impl<S: RegistryStore> Registry<S> {
    /// Register, or queue the request when the store is unavailable.
    pub fn register_or_queue(
        &self,
        request: RegistrationRequest,
        outbox: &Outbox,
    ) -> Result<Outcome, LineageError> {
        match self.register(request.clone()) {
            Ok(receipt) => Ok(Outcome::Registered(receipt)),
            Err(e) if e.is_recoverable() => {
                let ticket = outbox.enqueue(request)?;
                tracing::warn!(%ticket, error = %e, "registry unavailable; registration queued");
                Ok(Outcome::Queued { ticket })
            }
            Err(e) => Err(e),
        }
    }

    /// Replay queued registrations in order.
    ///
    /// Success and permanent rejections remove the entry. A recoverable
    /// failure stops the run and leaves the remaining entries queued.
    pub fn reconcile(&self, outbox: &Outbox) -> Result<ReconcileReport, LineageError> {
        let queued = outbox.pending()?;
        let mut report = ReconcileReport::default();

        for (index, entry) in queued.iter().enumerate() {
            match self.register(entry.request.clone()) {
                Ok(receipt) => {
                    outbox.remove(entry.ticket)?;
                    report.registered.push((entry.ticket, receipt.person.id));
                }
                Err(e) if e.is_recoverable() => {
                    report.pending = queued.len() - index;
                    tracing::warn!(
                        error = %e,
                        pending = report.pending,
                        "reconciliation interrupted"
                    );
                    return Ok(report);
                }
                Err(e) => {
                    tracing::warn!(
                        ticket = %entry.ticket,
                        error = %e,
                        "queued registration rejected"
                    );
                    outbox.remove(entry.ticket)?;
                    report.rejected.push((entry.ticket, e.to_string()));
                }
            }
        }

        tracing::info!(
            registered = report.registered.len(),
            rejected = report.rejected.len(),
            "outbox reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::{OriginLabels, PersonDraft, VitalityDraft};
    use crate::{ClassificationSeed, Credentials, Gender};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    const TEST_PHC: &str = concat!(
        "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHRzYWx0",
        "$ZmFrZWhhc2hmYWtlaGFzaGZha2VoYXNoZmFrZWhhc2g",
    );

    fn request(given: &str) -> RegistrationRequest {
        RegistrationRequest::new(PersonDraft {
            given_name: given.to_string(),
            family_name: "Camara".to_string(),
            gender: Gender::Male,
            birth_date: NaiveDate::from_ymd_opt(1985, 3, 3),
            origin: OriginLabels {
                continent: "Afrique".to_string(),
                country: "Guinée".to_string(),
                region: "Haute-Guinée".to_string(),
                ethnicity: "Malinkés".to_string(),
            },
            vitality: VitalityDraft::Living {
                credentials: Credentials::from_phc(TEST_PHC).unwrap(),
            },
        })
    }

    #[test]
    fn tickets_become_idempotency_keys() {
        let outbox = Outbox::in_memory();
        let ticket = outbox.enqueue(request("Sekou")).unwrap();
        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ticket, ticket);
        assert_eq!(pending[0].request.idempotency_key, Some(ticket.to_string()));

        let keyed = outbox
            .enqueue(request("Lansana").with_idempotency_key("client-7"))
            .unwrap();
        let pending = outbox.pending().unwrap();
        assert_eq!(pending[1].ticket, keyed);
        assert_eq!(pending[1].request.idempotency_key.as_deref(), Some("client-7"));
    }

    #[test]
    fn redb_outbox_survives_reopen_in_order() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("outbox.redb");
        let (first, second) = {
            let outbox = Outbox::open(&path).unwrap();
            (
                outbox.enqueue(request("Sekou")).unwrap(),
                outbox.enqueue(request("Lansana")).unwrap(),
            )
        };

        let outbox = Outbox::open(&path).unwrap();
        let tickets: Vec<Uuid> = outbox.pending().unwrap().iter().map(|p| p.ticket).collect();
        assert_eq!(tickets, [first, second]);

        assert!(outbox.remove(first).unwrap());
        assert!(!outbox.remove(first).unwrap());
        assert_eq!(outbox.len().unwrap(), 1);
    }

    #[test]
    fn reconcile_registers_and_drops_rejections() {
        let registry = Registry::in_memory(ClassificationSeed::curated().unwrap()).unwrap();
        let outbox = Outbox::in_memory();
        let good = outbox.enqueue(request("Sekou")).unwrap();
        let orphan = outbox
            .enqueue(request("Lansana").with_father("G90C1P2R3E2F6 404"))
            .unwrap();

        let report = registry.reconcile(&outbox).unwrap();
        assert_eq!(report.registered.len(), 1);
        assert_eq!(report.registered[0].0, good);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, orphan);
        assert_eq!(report.pending, 0);
        assert!(outbox.is_empty().unwrap());
    }
}
