//! In-process registry store.
//!
//! One mutex guards the whole state, so each trait method is a transaction.

use super::{CommitOutcome, RegistryStore, allocation_conflict, code_taken, key_taken};
use crate::{ClassificationCode, Dimension, DisplayId, LineageError, Person, Prefix};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    persons: BTreeMap<DisplayId, Person>,
    allocations: BTreeMap<(Dimension, String), ClassificationCode>,
    sequences: BTreeMap<Prefix, u64>,
    idempotency: BTreeMap<String, DisplayId>,
}

impl MemoryState {
    fn highest_allocated(&self, dimension: Dimension) -> u64 {
        self.allocations
            .iter()
            .filter(|((dim, _), _)| *dim == dimension)
            .map(|(_, code)| code.number())
            .max()
            .unwrap_or(0)
    }

    fn code_owner(&self, dimension: Dimension, code: &ClassificationCode) -> Option<&str> {
        self.allocations
            .iter()
            .find(|((dim, _), c)| *dim == dimension && *c == code)
            .map(|((_, label), _)| label.as_str())
    }
}

/// Volatile registry store. State is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LineageError> {
        self.state.lock().map_err(|_| {
            LineageError::PersistenceUnavailable("memory store lock poisoned".to_string())
        })
    }
}

impl RegistryStore for MemoryStore {
    fn lookup_allocation(
        &self,
        dimension: Dimension,
        label: &str,
    ) -> Result<Option<ClassificationCode>, LineageError> {
        let state = self.lock()?;
        Ok(state
            .allocations
            .get(&(dimension, label.to_string()))
            .cloned())
    }

    fn allocate_code(
        &self,
        dimension: Dimension,
        label: &str,
        floor: u64,
    ) -> Result<(ClassificationCode, bool), LineageError> {
        let mut state = self.lock()?;
        let key = (dimension, label.to_string());
        if let Some(code) = state.allocations.get(&key) {
            return Ok((code.clone(), false));
        }

        let number = floor
            .max(state.highest_allocated(dimension))
            .checked_add(1)
            .ok_or_else(|| {
                LineageError::SequenceExhausted(format!("{} codes", dimension))
            })?;
        let code = ClassificationCode::new(dimension, number)?;
        state.allocations.insert(key, code.clone());
        Ok((code, true))
    }

    fn allocations(
        &self,
        dimension: Dimension,
    ) -> Result<Vec<(String, ClassificationCode)>, LineageError> {
        let state = self.lock()?;
        let mut entries: Vec<_> = state
            .allocations
            .iter()
            .filter(|((dim, _), _)| *dim == dimension)
            .map(|((_, label), code)| (label.clone(), code.clone()))
            .collect();
        entries.sort_by_key(|(_, code)| code.number());
        Ok(entries)
    }

    fn import_allocation(
        &self,
        dimension: Dimension,
        label: &str,
        code: &ClassificationCode,
    ) -> Result<bool, LineageError> {
        let mut state = self.lock()?;
        let key = (dimension, label.to_string());
        if let Some(existing) = state.allocations.get(&key) {
            if existing == code {
                return Ok(false);
            }
            return Err(allocation_conflict(dimension, label, existing, code));
        }
        if let Some(owner) = state.code_owner(dimension, code) {
            return Err(code_taken(dimension, code, owner, label));
        }
        state.allocations.insert(key, code.clone());
        Ok(true)
    }

    fn next_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError> {
        let mut state = self.lock()?;
        let counter = state.sequences.entry(prefix.clone()).or_insert(0);
        let next = counter
            .checked_add(1)
            .ok_or_else(|| LineageError::SequenceExhausted(prefix.to_string()))?;
        *counter = next;
        Ok(next)
    }

    fn current_sequence(&self, prefix: &Prefix) -> Result<u64, LineageError> {
        let state = self.lock()?;
        Ok(state.sequences.get(prefix).copied().unwrap_or(0))
    }

    fn raise_sequence(&self, prefix: &Prefix, at_least: u64) -> Result<u64, LineageError> {
        let mut state = self.lock()?;
        let counter = state.sequences.entry(prefix.clone()).or_insert(0);
        *counter = (*counter).max(at_least);
        Ok(*counter)
    }

    fn sequences(&self) -> Result<Vec<(Prefix, u64)>, LineageError> {
        let state = self.lock()?;
        Ok(state
            .sequences
            .iter()
            .map(|(prefix, value)| (prefix.clone(), *value))
            .collect())
    }

    fn get_person(&self, id: &DisplayId) -> Result<Option<Person>, LineageError> {
        let state = self.lock()?;
        Ok(state.persons.get(id).cloned())
    }

    fn persons(&self) -> Result<Vec<Person>, LineageError> {
        let state = self.lock()?;
        Ok(state.persons.values().cloned().collect())
    }

    fn person_count(&self) -> Result<u64, LineageError> {
        let state = self.lock()?;
        Ok(state.persons.len() as u64)
    }

    fn replay(&self, idempotency_key: &str) -> Result<Option<Person>, LineageError> {
        let state = self.lock()?;
        Ok(state
            .idempotency
            .get(idempotency_key)
            .and_then(|id| state.persons.get(id))
            .cloned())
    }

    fn commit_registration(
        &self,
        person: Person,
        idempotency_key: Option<&str>,
    ) -> Result<CommitOutcome, LineageError> {
        let mut state = self.lock()?;

        if let Some(key) = idempotency_key
            && let Some(prior) = state.idempotency.get(key)
        {
            let existing = state
                .persons
                .get(prior)
                .cloned()
                .ok_or_else(|| LineageError::PersonNotFound(prior.to_string()))?;
            return Ok(CommitOutcome::Replayed(existing));
        }

        if state.persons.contains_key(&person.id) {
            return Err(LineageError::DuplicateIdentifier(person.id.to_string()));
        }

        let parents: Vec<DisplayId> = person.parents().cloned().collect();
        if let Some(missing) = parents.iter().find(|p| !state.persons.contains_key(*p)) {
            return Err(LineageError::ParentNotFound(missing.to_string()));
        }

        // All checks passed: mutate.
        for parent_id in &parents {
            if let Some(parent) = state.persons.get_mut(parent_id) {
                parent.link_child(&person.id);
            }
        }
        if let Some(key) = idempotency_key {
            state
                .idempotency
                .insert(key.to_string(), person.id.clone());
        }
        state.persons.insert(person.id.clone(), person.clone());

        Ok(CommitOutcome::Committed(person))
    }

    fn import_person(&self, person: &Person) -> Result<(), LineageError> {
        let mut state = self.lock()?;
        if state.persons.contains_key(&person.id) {
            return Err(LineageError::DuplicateIdentifier(person.id.to_string()));
        }
        state.persons.insert(person.id.clone(), person.clone());
        Ok(())
    }

    fn idempotency_keys(&self) -> Result<Vec<(String, DisplayId)>, LineageError> {
        let state = self.lock()?;
        Ok(state
            .idempotency
            .iter()
            .map(|(key, id)| (key.clone(), id.clone()))
            .collect())
    }

    fn import_idempotency_key(&self, key: &str, id: &DisplayId) -> Result<bool, LineageError> {
        let mut state = self.lock()?;
        match state.idempotency.get(key) {
            Some(existing) if existing == id => return Ok(false),
            Some(existing) => return Err(key_taken(key, existing)),
            None => {}
        }
        if !state.persons.contains_key(id) {
            return Err(LineageError::PersonNotFound(id.to_string()));
        }
        state.idempotency.insert(key.to_string(), id.clone());
        Ok(true)
    }
}
