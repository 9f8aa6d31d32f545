//! # lineage-core
//!
//! The identity-code and genealogical graph engine for Lineage - THE LOGIC.
//!
//! This crate derives era codes from dates, resolves free-form origin
//! labels into stable short codes, mints `PREFIX SEQ` identifiers that are
//! unique per prefix, and keeps parent → child linkage between registered
//! persons.
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Is synchronous: NO async, NO network dependencies
//! - Owns every shared counter: sequence increments and code allocations
//!   happen inside a storage write transaction, never in a client
//! - Never panics: every failure is a [`LineageError`]

// =============================================================================
// MODULES
// =============================================================================

pub mod classification;
pub mod credentials;
pub mod epoch;
pub mod geography;
pub mod graph;
pub mod identifier;
pub mod outbox;
pub mod primitives;
pub mod registry;
pub mod snapshot;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ClassificationCode, Credentials, Dimension, DisplayId, EraCode, EraKind, Gender,
    IdentityCodes, LineageError, Person, Prefix, Vitality, normalize_text,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use classification::{ClassificationSeed, Classifier, CodeOrigin, Resolution};
pub use credentials::AuthSession;
pub use epoch::{EpochSpec, decet_code, generation_code, parse_date};
pub use geography::{GeoEntry, GeoLevel, GeographyCatalog};
pub use graph::{GenealogyGraph, LineageEntry};
pub use identifier::IdentifierBuilder;
pub use outbox::{Outbox, Outcome, PendingRegistration, ReconcileReport};
pub use registry::{
    OriginLabels, PersonDraft, Registry, RegistrationReceipt, RegistrationRequest,
    RegistryMetrics, VitalityDraft,
};
pub use storage::{CommitOutcome, MemoryStore, RedbStore, RegistryStore, StorageBackend};

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

pub use snapshot::{
    ImportSummary, RegistrySnapshot, SnapshotHeader, export_snapshot, import_snapshot,
};

#[cfg(feature = "crypto-hash")]
pub use snapshot::snapshot_checksum;
