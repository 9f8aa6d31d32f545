//! # redb-backed Registry Storage
//!
//! A disk-backed registry store using the redb embedded database:
//! - ACID transactions (one write transaction per trait method)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! The single-writer model is what makes counter increments, code
//! allocation and registration commits atomic across threads.

use super::{CommitOutcome, RegistryStore, allocation_conflict, code_taken, key_taken};
use crate::{ClassificationCode, Dimension, DisplayId, LineageError, Person, Prefix};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::fmt::Display;
use std::path::Path;

/// Persons: display id text -> postcard-encoded `Person`
const PERSONS: TableDefinition<&str, &[u8]> = TableDefinition::new("persons");

/// Allocations by label: (dimension, label) -> code number
const ALLOCATIONS: TableDefinition<(&str, &str), u64> = TableDefinition::new("allocations");

/// Allocations by code: (dimension, code number) -> label
const ALLOCATION_CODES: TableDefinition<(&str, u64), &str> =
    TableDefinition::new("allocation_codes");

/// Sequence counters: prefix -> last value handed out
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Idempotency keys: key -> display id text
const IDEMPOTENCY: TableDefinition<&str, &str> = TableDefinition::new("idempotency");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Schema version written on creation.
const SCHEMA_VERSION: u64 = 1;

fn unavailable(e: impl Display) -> LineageError {
    LineageError::PersistenceUnavailable(e.to_string())
}

fn encode_person(person: &Person) -> Result<Vec<u8>, LineageError> {
    postcard::to_allocvec(person).map_err(|e| LineageError::Serialization(e.to_string()))
}

fn decode_person(bytes: &[u8]) -> Result<Person, LineageError> {
    postcard::from_bytes(bytes).map_err(|e| LineageError::Serialization(e.to_string()))
}

fn read_person(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<Person>, LineageError> {
    table
        .get(key)
        .map_err(unavailable)?
        .map(|guard| decode_person(guard.value()))
        .transpose()
}

/// A disk-backed registry store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a registry database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LineageError> {
        let db = Database::create(path.as_ref()).map_err(unavailable)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(unavailable)?;
            let _ = write_txn.open_table(PERSONS).map_err(unavailable)?;
            let _ = write_txn.open_table(ALLOCATIONS).map_err(unavailable)?;
            let _ = write_txn.open_table(ALLOCATION_CODES).map_err(unavailable)?;
            let _ = write_txn.open_table(SEQUENCES).map_err(unavailable)?;
            let _ = write_txn.open_table(IDEMPOTENCY).map_err(unavailable)?;
            {
                let mut metadata = write_txn.open_table(METADATA).map_err(unavailable)?;
                let version = metadata
                    .get("schema_version")
                    .map_err(unavailable)?
                    .map(|v| v.value());
                match version {
                    None => {
                        metadata
                            .insert("schema_version", SCHEMA_VERSION)
                            .map_err(unavailable)?;
                    }
                    Some(SCHEMA_VERSION) => {}
                    Some(other) => {
                        return Err(LineageError::Serialization(format!(
                            "unsupported registry schema version {} (expected {})",
                            other, SCHEMA_VERSION
                        )));
                    }
                }
            }
            write_txn.commit().map_err(unavailable)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "opened redb registry");
        Ok(Self { db })
    }
}

impl RegistryStore for RedbStore {
    fn lookup_allocation(
        &self,
        dimension: Dimension,
        label: &str,
    ) -> Result<Option<ClassificationCode>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(ALLOCATIONS).map_err(unavailable)?;
        table
            .get((dimension.name(), label))
            .map_err(unavailable)?
            .map(|guard| ClassificationCode::new(dimension, guard.value()))
            .transpose()
    }

    fn allocate_code(
        &self,
        dimension: Dimension,
        label: &str,
        floor: u64,
    ) -> Result<(ClassificationCode, bool), LineageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let code = {
            let mut by_label = write_txn.open_table(ALLOCATIONS).map_err(unavailable)?;
            let mut by_code = write_txn.open_table(ALLOCATION_CODES).map_err(unavailable)?;

            let existing = by_label
                .get((dimension.name(), label))
                .map_err(unavailable)?
                .map(|guard| guard.value());
            if let Some(number) = existing {
                return Ok((ClassificationCode::new(dimension, number)?, false));
            }

            let highest = by_code
                .range((dimension.name(), 0u64)..=(dimension.name(), u64::MAX))
                .map_err(unavailable)?
                .next_back()
                .transpose()
                .map_err(unavailable)?
                .map(|(key, _)| key.value().1)
                .unwrap_or(0);
            let number = floor.max(highest).checked_add(1).ok_or_else(|| {
                LineageError::SequenceExhausted(format!("{} codes", dimension))
            })?;

            by_label
                .insert((dimension.name(), label), number)
                .map_err(unavailable)?;
            by_code
                .insert((dimension.name(), number), label)
                .map_err(unavailable)?;
            ClassificationCode::new(dimension, number)?
        };
        write_txn.commit().map_err(unavailable)?;
        Ok((code, true))
    }

    fn allocations(
        &self,
        dimension: Dimension,
    ) -> Result<Vec<(String, ClassificationCode)>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(ALLOCATION_CODES).map_err(unavailable)?;

        let mut entries = Vec::new();
        for entry in table
            .range((dimension.name(), 0u64)..=(dimension.name(), u64::MAX))
            .map_err(unavailable)?
        {
            let (key, label) = entry.map_err(unavailable)?;
            entries.push((
                label.value().to_string(),
                ClassificationCode::new(dimension, key.value().1)?,
            ));
        }
        Ok(entries)
    }

    fn import_allocation(
        &self,
        dimension: Dimension,
        label: &str,
        code: &ClassificationCode,
    ) -> Result<bool, LineageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut by_label = write_txn.open_table(ALLOCATIONS).map_err(unavailable)?;
            let mut by_code = write_txn.open_table(ALLOCATION_CODES).map_err(unavailable)?;

            let existing = by_label
                .get((dimension.name(), label))
                .map_err(unavailable)?
                .map(|guard| guard.value());
            match existing {
                Some(number) if number == code.number() => return Ok(false),
                Some(number) => {
                    let existing = ClassificationCode::new(dimension, number)?;
                    return Err(allocation_conflict(dimension, label, existing, code));
                }
                None => {}
            }

            let owner = by_code
                .get((dimension.name(), code.number()))
                .map_err(unavailable)?
                .map(|guard| guard.value().to_string());
            if let Some(owner) = owner {
                return Err(code_taken(dimension, code, &owner, label));
            }

            by_label
                .insert((dimension.name(), label), code.number())
                .map_err(unavailable)?;
            by_code
                .insert((dimension.name(), code.number()), label)
                .map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(true)
    }

    fn next_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let next = {
            let mut table = write_txn.open_table(SEQUENCES).map_err(unavailable)?;
            let current = table
                .get(prefix.as_str())
                .map_err(unavailable)?
                .map(|v| v.value())
                .unwrap_or(0);
            let next = current
                .checked_add(1)
                .ok_or_else(|| LineageError::SequenceExhausted(prefix.to_string()))?;
            table.insert(prefix.as_str(), next).map_err(unavailable)?;
            next
        };
        write_txn.commit().map_err(unavailable)?;
        Ok(next)
    }

    fn current_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(SEQUENCES).map_err(unavailable)?;
        Ok(table
            .get(prefix.as_str())
            .map_err(unavailable)?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    fn raise_sequence(&self, prefix: &Prefix, at_least: u64) -> Result<u64, LineageError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let value = {
            let mut table = write_txn.open_table(SEQUENCES).map_err(unavailable)?;
            let current = table
                .get(prefix.as_str())
                .map_err(unavailable)?
                .map(|v| v.value())
                .unwrap_or(0);
            let value = current.max(at_least);
            if value != current {
                table.insert(prefix.as_str(), value).map_err(unavailable)?;
            }
            value
        };
        write_txn.commit().map_err(unavailable)?;
        Ok(value)
    }

    fn sequences(&self) -> Result<Vec<(Prefix, u64)>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(SEQUENCES).map_err(unavailable)?;

        let mut counters = Vec::new();
        for entry in table.iter().map_err(unavailable)? {
            let (key, value) = entry.map_err(unavailable)?;
            counters.push((Prefix::new(key.value())?, value.value()));
        }
        Ok(counters)
    }

    fn get_person(&self, id: &DisplayId) -> Result<Option<Person>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(PERSONS).map_err(unavailable)?;
        read_person(&table, &id.to_string())
    }

    fn persons(&self) -> Result<Vec<Person>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(PERSONS).map_err(unavailable)?;

        // Keys are display id text; re-sort by the typed id.
        let mut persons = Vec::new();
        for entry in table.iter().map_err(unavailable)? {
            let (_, value) = entry.map_err(unavailable)?;
            persons.push(decode_person(value.value())?);
        }
        persons.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(persons)
    }

    fn person_count(&self) -> Result<u64, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(PERSONS).map_err(unavailable)?;
        table.len().map_err(unavailable)
    }

    fn replay(&self, idempotency_key: &str) -> Result<Option<Person>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let keys = read_txn.open_table(IDEMPOTENCY).map_err(unavailable)?;
        let persons = read_txn.open_table(PERSONS).map_err(unavailable)?;

        let prior = keys
            .get(idempotency_key)
            .map_err(unavailable)?
            .map(|guard| guard.value().to_string());
        match prior {
            Some(id) => read_person(&persons, &id),
            None => Ok(None),
        }
    }

    fn commit_registration(
        &self,
        person: Person,
        idempotency_key: Option<&str>,
    ) -> Result<CommitOutcome, LineageError> {
        let id_key = person.id.to_string();
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut persons = write_txn.open_table(PERSONS).map_err(unavailable)?;
            let mut keys = write_txn.open_table(IDEMPOTENCY).map_err(unavailable)?;

            if let Some(key) = idempotency_key {
                let prior = keys
                    .get(key)
                    .map_err(unavailable)?
                    .map(|guard| guard.value().to_string());
                if let Some(prior) = prior {
                    let existing = read_person(&persons, &prior)?
                        .ok_or(LineageError::PersonNotFound(prior))?;
                    // Dropping the transaction aborts it.
                    return Ok(CommitOutcome::Replayed(existing));
                }
            }

            if persons.get(id_key.as_str()).map_err(unavailable)?.is_some() {
                return Err(LineageError::DuplicateIdentifier(id_key));
            }

            let mut parents = Vec::new();
            for parent_id in person.parents() {
                let parent_key = parent_id.to_string();
                let parent = read_person(&persons, &parent_key)?
                    .ok_or_else(|| LineageError::ParentNotFound(parent_key.clone()))?;
                parents.push((parent_key, parent));
            }

            for (parent_key, mut parent) in parents {
                if parent.link_child(&person.id) {
                    let bytes = encode_person(&parent)?;
                    persons
                        .insert(parent_key.as_str(), bytes.as_slice())
                        .map_err(unavailable)?;
                }
            }

            let bytes = encode_person(&person)?;
            persons
                .insert(id_key.as_str(), bytes.as_slice())
                .map_err(unavailable)?;
            if let Some(key) = idempotency_key {
                keys.insert(key, id_key.as_str()).map_err(unavailable)?;
            }
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(CommitOutcome::Committed(person))
    }

    fn import_person(&self, person: &Person) -> Result<(), LineageError> {
        let id_key = person.id.to_string();
        let bytes = encode_person(person)?;
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut persons = write_txn.open_table(PERSONS).map_err(unavailable)?;
            if persons.get(id_key.as_str()).map_err(unavailable)?.is_some() {
                return Err(LineageError::DuplicateIdentifier(id_key));
            }
            persons
                .insert(id_key.as_str(), bytes.as_slice())
                .map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(())
    }

    fn idempotency_keys(&self) -> Result<Vec<(String, DisplayId)>, LineageError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(IDEMPOTENCY).map_err(unavailable)?;

        let mut keys = Vec::new();
        for entry in table.iter().map_err(unavailable)? {
            let (key, id) = entry.map_err(unavailable)?;
            keys.push((key.value().to_string(), id.value().parse()?));
        }
        Ok(keys)
    }

    fn import_idempotency_key(&self, key: &str, id: &DisplayId) -> Result<bool, LineageError> {
        let id_key = id.to_string();
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let persons = write_txn.open_table(PERSONS).map_err(unavailable)?;
            let mut keys = write_txn.open_table(IDEMPOTENCY).map_err(unavailable)?;

            let existing = keys
                .get(key)
                .map_err(unavailable)?
                .map(|guard| guard.value().to_string());
            match existing {
                Some(existing) if existing == id_key => return Ok(false),
                Some(existing) => return Err(key_taken(key, existing)),
                None => {}
            }
            if persons.get(id_key.as_str()).map_err(unavailable)?.is_none() {
                return Err(LineageError::PersonNotFound(id_key));
            }
            keys.insert(key, id_key.as_str()).map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(true)
    }
}
