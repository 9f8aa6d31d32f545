//! # Registry Storage
//!
//! The durable state of the registry: person records, classification
//! allocations, sequence counters and idempotency keys. All four travel in
//! snapshots.
//!
//! Every mutating operation is atomic. In particular
//! [`RegistryStore::commit_registration`] checks the idempotency key, the
//! parents and the identifier, inserts the person and links it to its
//! parents in a single transaction: on error nothing is written.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`] (fast, volatile)
//! - `Persistent`: [`RedbStore`] (redb, ACID, survives restarts)

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::{ClassificationCode, Dimension, DisplayId, LineageError, Person, Prefix};
use std::path::Path;

/// Result of [`RegistryStore::commit_registration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The person was inserted and linked.
    Committed(Person),
    /// The idempotency key was already used; this is the person it created.
    Replayed(Person),
}

impl CommitOutcome {
    #[must_use]
    pub fn person(&self) -> &Person {
        match self {
            Self::Committed(p) | Self::Replayed(p) => p,
        }
    }

    #[must_use]
    pub fn into_person(self) -> Person {
        match self {
            Self::Committed(p) | Self::Replayed(p) => p,
        }
    }
}

/// Trait for registry storage backends.
///
/// Implementations are internally synchronized: every method takes `&self`
/// and may be called from many threads at once.
pub trait RegistryStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Classification allocations
    // -------------------------------------------------------------------------

    /// Code previously allocated to a canonical label.
    fn lookup_allocation(
        &self,
        dimension: Dimension,
        label: &str,
    ) -> Result<Option<ClassificationCode>, LineageError>;

    /// Return the label's allocation, or allocate `max(floor, highest allocated) + 1`.
    ///
    /// The boolean is `true` when this call created the allocation. Two
    /// concurrent calls for the same new label observe the same code.
    fn allocate_code(
        &self,
        dimension: Dimension,
        label: &str,
        floor: u64,
    ) -> Result<(ClassificationCode, bool), LineageError>;

    /// All allocations of a dimension, ordered by code number.
    fn allocations(
        &self,
        dimension: Dimension,
    ) -> Result<Vec<(String, ClassificationCode)>, LineageError>;

    /// Record an allocation made elsewhere (snapshot import).
    ///
    /// Returns `false` when the identical binding already exists. Fails with
    /// `ClassificationConflict` when the label is bound to another code and
    /// with `CodeAlreadyAssigned` when another label owns the code.
    fn import_allocation(
        &self,
        dimension: Dimension,
        label: &str,
        code: &ClassificationCode,
    ) -> Result<bool, LineageError>;

    // -------------------------------------------------------------------------
    // Sequence counters
    // -------------------------------------------------------------------------

    /// Atomically advance the prefix counter and return the new value.
    ///
    /// The first call for a prefix returns 1.
    fn next_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError>;

    /// Last value handed out for a prefix (0 when never used).
    fn current_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError>;

    /// Raise the counter to at least `at_least`; never lowers it.
    fn raise_sequence(&self, prefix: &Prefix, at_least: u64) -> Result<u64, LineageError>;

    /// All counters, ordered by prefix.
    fn sequences(&self) -> Result<Vec<(Prefix, u64)>, LineageError>;

    // -------------------------------------------------------------------------
    // Persons
    // -------------------------------------------------------------------------

    fn get_person(&self, id: &DisplayId) -> Result<Option<Person>, LineageError>;

    /// All persons, ordered by identifier.
    fn persons(&self) -> Result<Vec<Person>, LineageError>;

    fn person_count(&self) -> Result<u64, LineageError>;

    /// Person created by an earlier registration carrying this key.
    fn replay(&self, idempotency_key: &str) -> Result<Option<Person>, LineageError>;

    /// Atomically insert `person` and append it to its parents' children.
    ///
    /// In order: a known idempotency key yields `Replayed`; a taken id fails
    /// with `DuplicateIdentifier`; a missing parent fails with `ParentNotFound`.
    fn commit_registration(
        &self,
        person: Person,
        idempotency_key: Option<&str>,
    ) -> Result<CommitOutcome, LineageError>;

    /// Insert a complete record as-is, links included (snapshot import).
    ///
    /// Fails with `DuplicateIdentifier` if the id is taken.
    fn import_person(&self, person: &Person) -> Result<(), LineageError>;

    // -------------------------------------------------------------------------
    // Idempotency keys
    // -------------------------------------------------------------------------

    /// All idempotency keys with the person each one created, ordered by key.
    fn idempotency_keys(&self) -> Result<Vec<(String, DisplayId)>, LineageError>;

    /// Record a key used elsewhere (snapshot import).
    ///
    /// Returns `false` when the key already names `id`. Fails with
    /// `DuplicateIdentifier` when it names another person and with
    /// `PersonNotFound` when `id` is not stored.
    fn import_idempotency_key(&self, key: &str, id: &DisplayId) -> Result<bool, LineageError>;
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for a registry.
#[derive(Debug)]
pub enum StorageBackend {
    /// Volatile in-process store.
    InMemory(MemoryStore),
    /// Disk-backed store using redb.
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    /// Open (or create) a redb-backed store.
    pub fn open_persistent(path: impl AsRef<Path>) -> Result<Self, LineageError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    /// `"memory"` or `"redb"`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "memory",
            Self::Persistent(_) => "redb",
        }
    }

    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }

    fn inner(&self) -> &dyn RegistryStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

impl RegistryStore for StorageBackend {
    fn lookup_allocation(
        &self,
        dimension: Dimension,
        label: &str,
    ) -> Result<Option<ClassificationCode>, LineageError> {
        self.inner().lookup_allocation(dimension, label)
    }

    fn allocate_code(
        &self,
        dimension: Dimension,
        label: &str,
        floor: u64,
    ) -> Result<(ClassificationCode, bool), LineageError> {
        self.inner().allocate_code(dimension, label, floor)
    }

    fn allocations(
        &self,
        dimension: Dimension,
    ) -> Result<Vec<(String, ClassificationCode)>, LineageError> {
        self.inner().allocations(dimension)
    }

    fn import_allocation(
        &self,
        dimension: Dimension,
        label: &str,
        code: &ClassificationCode,
    ) -> Result<bool, LineageError> {
        self.inner().import_allocation(dimension, label, code)
    }

    fn next_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError> {
        self.inner().next_sequence(prefix)
    }

    fn current_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError> {
        self.inner().current_sequence(prefix)
    }

    fn raise_sequence(&self, prefix: &Prefix, at_least: u64) -> Result<u64, LineageError> {
        self.inner().raise_sequence(prefix, at_least)
    }

    fn sequences(&self) -> Result<Vec<(Prefix, u64)>, LineageError> {
        self.inner().sequences()
    }

    fn get_person(&self, id: &DisplayId) -> Result<Option<Person>, LineageError> {
        self.inner().get_person(id)
    }

    fn persons(&self) -> Result<Vec<Person>, LineageError> {
        self.inner().persons()
    }

    fn person_count(&self) -> Result<u64, LineageError> {
        self.inner().person_count()
    }

    fn replay(&self, idempotency_key: &str) -> Result<Option<Person>, LineageError> {
        self.inner().replay(idempotency_key)
    }

    fn commit_registration(
        &self,
        person: Person,
        idempotency_key: Option<&str>,
    ) -> Result<CommitOutcome, LineageError> {
        self.inner().commit_registration(person, idempotency_key)
    }

    fn import_person(&self, person: &Person) -> Result<(), LineageError> {
        self.inner().import_person(person)
    }

    fn idempotency_keys(&self) -> Result<Vec<(String, DisplayId)>, LineageError> {
        self.inner().idempotency_keys()
    }

    fn import_idempotency_key(&self, key: &str, id: &DisplayId) -> Result<bool, LineageError> {
        self.inner().import_idempotency_key(key, id)
    }
}

/// Conflict raised when an idempotency key already names another person.
pub(crate) fn key_taken(key: &str, holder: impl ToString) -> LineageError {
    LineageError::DuplicateIdentifier(format!(
        "idempotency key '{}' already created {}",
        key,
        holder.to_string()
    ))
}

/// Conflict raised when a label is already bound to another code.
pub(crate) fn allocation_conflict(
    dimension: Dimension,
    label: &str,
    existing: impl ToString,
    proposed: &ClassificationCode,
) -> LineageError {
    LineageError::ClassificationConflict {
        dimension,
        label: label.to_string(),
        existing: existing.to_string(),
        proposed: proposed.to_string(),
    }
}

/// Conflict raised when a code is already owned by another label.
pub(crate) fn code_taken(
    dimension: Dimension,
    code: &ClassificationCode,
    holder: &str,
    label: &str,
) -> LineageError {
    LineageError::CodeAlreadyAssigned {
        dimension,
        code: code.to_string(),
        holder: holder.to_string(),
        label: label.to_string(),
    }
}
