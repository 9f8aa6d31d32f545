//! # Snapshot Format
//!
//! Binary export/import of a whole registry.
//!
//! Format: Header (5 bytes) + postcard-serialized [`RegistrySnapshot`].
//! - 4 bytes: Magic ("LNGE")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded.
//! File I/O is left to the caller.

use crate::classification::ClassificationSeed;
use crate::identifier::prefix_of;
use crate::registry::Registry;
use crate::storage::{RegistryStore, allocation_conflict, code_taken, key_taken};
use crate::{ClassificationCode, Dimension, DisplayId, LineageError, Person, Prefix, primitives};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum accepted snapshot size.
///
/// Checked before decoding so a corrupted or hostile file cannot force a
/// huge allocation.
pub const MAX_SNAPSHOT_SIZE: usize = 500 * 1024 * 1024; // 500 MB

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header precedes all snapshot data.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), LineageError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(LineageError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(LineageError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LineageError> {
        let header = bytes
            .get(..HEADER_SIZE)
            .ok_or_else(|| LineageError::Serialization("Header too short".to_string()))?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// One persisted label → code binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub dimension: Dimension,
    pub label: String,
    pub code: ClassificationCode,
}

/// Everything a registry store holds, in deterministic order.
///
/// Idempotency keys travel too, so a retried registration is still
/// recognized after the registry has been saved and reloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub persons: Vec<Person>,
    pub allocations: Vec<AllocationRecord>,
    pub sequences: Vec<(Prefix, u64)>,
    pub idempotency: Vec<(String, DisplayId)>,
}

impl RegistrySnapshot {
    /// Read the full state of a store.
    pub fn capture<S: RegistryStore + ?Sized>(store: &S) -> Result<Self, LineageError> {
        let mut allocations = Vec::new();
        for dimension in Dimension::ALL {
            allocations.extend(store.allocations(dimension)?.into_iter().map(|(label, code)| {
                AllocationRecord {
                    dimension,
                    label,
                    code,
                }
            }));
        }
        Ok(Self {
            persons: store.persons()?,
            allocations,
            sequences: store.sequences()?,
            idempotency: store.idempotency_keys()?,
        })
    }

    /// Counter floor per prefix: the recorded counter or the highest
    /// imported sequence, whichever is larger.
    #[must_use]
    pub fn sequence_floors(&self) -> BTreeMap<Prefix, u64> {
        let mut floors: BTreeMap<Prefix, u64> = self.sequences.iter().cloned().collect();
        for person in &self.persons {
            let floor = floors.entry(person.id.prefix().clone()).or_insert(0);
            *floor = (*floor).max(person.id.sequence());
        }
        floors
    }
}

/// What an import changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub persons: usize,
    pub allocations: usize,
    pub counters: usize,
    pub idempotency_keys: usize,
}

/// Serialize a snapshot (header + payload).
pub fn snapshot_to_bytes(snapshot: &RegistrySnapshot) -> Result<Vec<u8>, LineageError> {
    let payload =
        postcard::to_stdvec(snapshot).map_err(|e| LineageError::Serialization(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a snapshot, validating size and header first.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<RegistrySnapshot, LineageError> {
    if bytes.len() < HEADER_SIZE {
        return Err(LineageError::Serialization(
            "Data too short: minimum 5 bytes required".to_string(),
        ));
    }
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(LineageError::Serialization(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }

    SnapshotHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        LineageError::Serialization(format!("Failed to deserialize snapshot data: {}", e))
    })
}

/// Export a store as snapshot bytes.
pub fn export_snapshot<S: RegistryStore + ?Sized>(store: &S) -> Result<Vec<u8>, LineageError> {
    snapshot_to_bytes(&RegistrySnapshot::capture(store)?)
}

/// Import snapshot bytes into a store.
///
/// The whole snapshot is checked against the store and the seed before
/// anything is written:
/// - a person id already present, or listed twice → `DuplicateIdentifier`
/// - an id whose prefix disagrees with the person's codes → `InvalidIdentifier`
/// - a parent neither imported nor stored → `ParentNotFound`
/// - a label bound to another code → `ClassificationConflict`
/// - a code owned by another label → `CodeAlreadyAssigned`
/// - an idempotency key naming another person → `DuplicateIdentifier`
///
/// Counters are then raised so future identifiers never collide with
/// imported ones. Only a store failure during the writes
/// (`PersistenceUnavailable`) can leave an import half applied.
pub fn import_snapshot<S: RegistryStore + ?Sized>(
    bytes: &[u8],
    store: &S,
    seed: &ClassificationSeed,
) -> Result<ImportSummary, LineageError> {
    let snapshot = snapshot_from_bytes(bytes)?;
    check_import(&snapshot, store, seed)?;

    let mut summary = ImportSummary::default();
    for record in &snapshot.allocations {
        if store.import_allocation(record.dimension, &record.label, &record.code)? {
            summary.allocations += 1;
        }
    }
    for person in &snapshot.persons {
        store.import_person(person)?;
        summary.persons += 1;
    }
    for (key, id) in &snapshot.idempotency {
        if store.import_idempotency_key(key, id)? {
            summary.idempotency_keys += 1;
        }
    }
    for (prefix, floor) in snapshot.sequence_floors() {
        let before = store.current_sequence(&prefix)?;
        if store.raise_sequence(&prefix, floor)? > before {
            summary.counters += 1;
        }
    }

    tracing::info!(
        persons = summary.persons,
        allocations = summary.allocations,
        counters = summary.counters,
        idempotency_keys = summary.idempotency_keys,
        "snapshot imported"
    );
    Ok(summary)
}

fn check_import<S: RegistryStore + ?Sized>(
    snapshot: &RegistrySnapshot,
    store: &S,
    seed: &ClassificationSeed,
) -> Result<(), LineageError> {
    let mut incoming: BTreeSet<&DisplayId> = BTreeSet::new();
    for person in &snapshot.persons {
        let expected = prefix_of(person)?;
        if person.id.prefix() != &expected {
            return Err(LineageError::InvalidIdentifier(format!(
                "{} does not match its codes ({})",
                person.id, expected
            )));
        }
        if !incoming.insert(&person.id) || store.get_person(&person.id)?.is_some() {
            return Err(LineageError::DuplicateIdentifier(person.id.to_string()));
        }
    }
    let known = |id: &DisplayId| -> Result<bool, LineageError> {
        Ok(incoming.contains(id) || store.get_person(id)?.is_some())
    };
    for person in &snapshot.persons {
        for parent in person.parents() {
            if !known(parent)? {
                return Err(LineageError::ParentNotFound(parent.to_string()));
            }
        }
    }

    for dimension in Dimension::ALL {
        let records: Vec<(String, ClassificationCode)> = snapshot
            .allocations
            .iter()
            .filter(|a| a.dimension == dimension)
            .map(|a| (a.label.clone(), a.code.clone()))
            .collect();
        seed.check_allocations(dimension, &records)?;

        let mut by_label: BTreeMap<String, ClassificationCode> = BTreeMap::new();
        let mut by_code: BTreeMap<ClassificationCode, String> = BTreeMap::new();
        for (label, code) in store.allocations(dimension)? {
            by_label.insert(label.clone(), code.clone());
            by_code.insert(code, label);
        }
        for (label, code) in records {
            match by_label.get(&label) {
                Some(existing) if existing == &code => continue,
                Some(existing) => {
                    return Err(allocation_conflict(dimension, &label, existing, &code));
                }
                None => {}
            }
            if let Some(holder) = by_code.get(&code) {
                return Err(code_taken(dimension, &code, holder, &label));
            }
            by_label.insert(label.clone(), code.clone());
            by_code.insert(code, label);
        }
    }

    let mut keys: BTreeMap<String, DisplayId> = store.idempotency_keys()?.into_iter().collect();
    for (key, id) in &snapshot.idempotency {
        if !known(id)? {
            return Err(LineageError::PersonNotFound(id.to_string()));
        }
        match keys.get(key) {
            Some(holder) if holder != id => return Err(key_taken(key, holder)),
            Some(_) => {}
            None => {
                keys.insert(key.clone(), id.clone());
            }
        }
    }
    Ok(())
}

/// BLAKE3 hex digest of snapshot bytes.
///
/// Only available with the `crypto-hash` feature enabled.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn snapshot_checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

impl<S: RegistryStore> Registry<S> {
    pub fn export_snapshot(&self) -> Result<Vec<u8>, LineageError> {
        export_snapshot(self.store())
    }

    pub fn import_snapshot(&self, bytes: &[u8]) -> Result<ImportSummary, LineageError> {
        import_snapshot(bytes, self.store(), self.seed())
    }
}

// =============================================================================
// TESTS
// =============================================================================
