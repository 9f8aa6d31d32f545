//! # Composite Identifier Builder
//!
//! Codes → `PREFIX SEQ`.
//!
//! The prefix is the concatenation, without separators, of:
//! - Deceased: `[decet, generation, continent, country, region, ethnicity, family]`
//! - Living: the same list without the decet
//!
//! The sequence comes from the prefix counter, advanced atomically inside
//! one storage write transaction. For a fixed prefix the sequence is
//! strictly increasing and never repeats.

use crate::storage::RegistryStore;
use crate::{DisplayId, EraCode, IdentityCodes, LineageError, Person, Prefix, Vitality};

/// The ordered code tokens of a person.
#[must_use]
pub fn ordered_codes(codes: &IdentityCodes, decet: Option<EraCode>) -> Vec<String> {
    let mut tokens = Vec::with_capacity(7);
    if let Some(decet) = decet {
        tokens.push(decet.to_string());
    }
    tokens.push(codes.generation.to_string());
    tokens.push(codes.continent.to_string());
    tokens.push(codes.country.to_string());
    tokens.push(codes.region.to_string());
    tokens.push(codes.ethnicity.to_string());
    tokens.push(codes.family.to_string());
    tokens
}

/// Prefix for a code set; `decet` is `Some` for deceased persons.
pub fn prefix_for(codes: &IdentityCodes, decet: Option<EraCode>) -> Result<Prefix, LineageError> {
    Prefix::new(ordered_codes(codes, decet).concat())
}

/// Prefix a person's identifier must carry.
pub fn prefix_of(person: &Person) -> Result<Prefix, LineageError> {
    let decet = match &person.vitality {
        Vitality::Deceased { decet, .. } => Some(*decet),
        Vitality::Living { .. } => None,
    };
    prefix_for(&person.codes, decet)
}

/// Mints identifiers from a store's sequence counters.
#[derive(Debug)]
pub struct IdentifierBuilder<'a, S: RegistryStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RegistryStore + ?Sized> IdentifierBuilder<'a, S> {
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Advance the prefix counter and build the identifier.
    pub fn mint(&self, prefix: &Prefix) -> Result<DisplayId, LineageError> {
        let sequence = self.store.next_sequence(prefix)?;
        tracing::debug!(prefix = %prefix, sequence, "sequence advanced");
        DisplayId::new(prefix.clone(), sequence)
    }
}
