//! # Genealogical Graph Store
//!
//! Parent → child linkage between registered persons.
//!
//! Each person holds up to two parent references and a materialized,
//! append-only list of children. The child insert and every parent's
//! `children` append happen in one storage transaction
//! ([`RegistryStore::commit_registration`]), so the two directions of an
//! edge can never disagree.
//!
//! All traversals are bounded by `MAX_LINEAGE_DEPTH` and visit persons in
//! a deterministic order, each at most once.

use crate::identifier::{IdentifierBuilder, prefix_for};
use crate::primitives::{MAX_IDENTIFIER_ATTEMPTS, MAX_LINEAGE_DEPTH};
use crate::storage::{CommitOutcome, RegistryStore};
use crate::{
    DisplayId, Gender, IdentityCodes, LineageError, Person, Vitality, normalize_text,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// A person whose codes are derived but who has no identifier yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPerson {
    pub given_name: String,
    pub family_name: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
    pub codes: IdentityCodes,
    pub vitality: Vitality,
    pub father: Option<DisplayId>,
    pub mother: Option<DisplayId>,
}

/// A person reached by a lineage traversal, `depth` steps from the start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub depth: usize,
    pub person: Person,
}

/// Parse a supplied parent reference.
///
/// Text that is not an identifier cannot name a registered person, so it
/// fails with `ParentNotFound` carrying the raw text.
pub fn parse_parent_ref(raw: &str) -> Result<DisplayId, LineageError> {
    raw.parse()
        .map_err(|_| LineageError::ParentNotFound(normalize_text(raw)))
}

/// Linkage and lineage queries over a registry store.
#[derive(Debug)]
pub struct GenealogyGraph<'a, S: RegistryStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RegistryStore + ?Sized> GenealogyGraph<'a, S> {
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    // =========================================================================
    // LINKAGE
    // =========================================================================

    /// Mint an identifier for `pending` and commit it with its parent links.
    ///
    /// A known idempotency key returns the person it created, untouched.
    /// `DuplicateIdentifier` at commit time triggers a new identifier, up to
    /// `MAX_IDENTIFIER_ATTEMPTS` times.
    pub fn link(
        &self,
        pending: PendingPerson,
        idempotency_key: Option<&str>,
    ) -> Result<CommitOutcome, LineageError> {
        if let Some(key) = idempotency_key
            && let Some(existing) = self.store.replay(key)?
        {
            return Ok(CommitOutcome::Replayed(existing));
        }

        let decet = match &pending.vitality {
            Vitality::Deceased { decet, .. } => Some(*decet),
            Vitality::Living { .. } => None,
        };
        let prefix = prefix_for(&pending.codes, decet)?;
        let builder = IdentifierBuilder::new(self.store);

        for attempt in 1..=MAX_IDENTIFIER_ATTEMPTS {
            let id = builder.mint(&prefix)?;
            let person = Person {
                id,
                given_name: pending.given_name.clone(),
                family_name: pending.family_name.clone(),
                gender: pending.gender,
                birth_date: pending.birth_date,
                codes: pending.codes.clone(),
                vitality: pending.vitality.clone(),
                father: pending.father.clone(),
                mother: pending.mother.clone(),
                children: Vec::new(),
                registered_at: Utc::now(),
            };

            match self.store.commit_registration(person, idempotency_key) {
                Err(LineageError::DuplicateIdentifier(taken)) => {
                    tracing::warn!(
                        identifier = %taken,
                        attempt,
                        max_attempts = MAX_IDENTIFIER_ATTEMPTS,
                        "identifier already taken; minting another"
                    );
                }
                other => return other,
            }
        }

        Err(LineageError::DuplicateIdentifier(format!(
            "{}: no free identifier after {} attempts",
            prefix, MAX_IDENTIFIER_ATTEMPTS
        )))
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// The person with this identifier.
    pub fn person(&self, id: &DisplayId) -> Result<Person, LineageError> {
        self.store
            .get_person(id)?
            .ok_or_else(|| LineageError::PersonNotFound(id.to_string()))
    }

    /// Children in registration order.
    pub fn children(&self, id: &DisplayId) -> Result<Vec<Person>, LineageError> {
        let person = self.person(id)?;
        self.load_all(&person.children)
    }

    /// Parents, father first.
    pub fn parents(&self, id: &DisplayId) -> Result<Vec<Person>, LineageError> {
        let person = self.person(id)?;
        let parents: Vec<DisplayId> = person.parents().cloned().collect();
        self.load_all(&parents)
    }

    /// Persons sharing at least one parent, in parent then registration order.
    pub fn siblings(&self, id: &DisplayId) -> Result<Vec<Person>, LineageError> {
        let person = self.person(id)?;
        let mut seen = BTreeSet::from([person.id.clone()]);
        let mut siblings = Vec::new();
        for parent in self.load_all(&person.parents().cloned().collect::<Vec<_>>())? {
            for child in &parent.children {
                if seen.insert(child.clone())
                    && let Some(sibling) = self.store.get_person(child)?
                {
                    siblings.push(sibling);
                }
            }
        }
        Ok(siblings)
    }

    /// Ancestors up to `depth` generations (capped at `MAX_LINEAGE_DEPTH`).
    pub fn ancestors(
        &self,
        id: &DisplayId,
        depth: usize,
    ) -> Result<Vec<LineageEntry>, LineageError> {
        self.walk(id, depth, |p| p.parents().cloned().collect())
    }

    /// Descendants up to `depth` generations (capped at `MAX_LINEAGE_DEPTH`).
    pub fn descendants(
        &self,
        id: &DisplayId,
        depth: usize,
    ) -> Result<Vec<LineageEntry>, LineageError> {
        self.walk(id, depth, |p| p.children.clone())
    }

    /// Breadth-first walk excluding the start person.
    fn walk(
        &self,
        start: &DisplayId,
        depth: usize,
        next: impl Fn(&Person) -> Vec<DisplayId>,
    ) -> Result<Vec<LineageEntry>, LineageError> {
        let depth = depth.min(MAX_LINEAGE_DEPTH);
        let origin = self.person(start)?;

        let mut visited = BTreeSet::from([origin.id.clone()]);
        let mut queue = VecDeque::from([(origin, 0usize)]);
        let mut found = Vec::new();

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }
            for id in next(&current) {
                if !visited.insert(id.clone()) {
                    continue;
                }
                match self.store.get_person(&id)? {
                    Some(person) => {
                        found.push(LineageEntry {
                            depth: current_depth + 1,
                            person: person.clone(),
                        });
                        queue.push_back((person, current_depth + 1));
                    }
                    None => dangling(&current.id, &id),
                }
            }
        }
        Ok(found)
    }

    fn load_all(&self, ids: &[DisplayId]) -> Result<Vec<Person>, LineageError> {
        let mut persons = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_person(id)? {
                Some(person) => persons.push(person),
                None => tracing::warn!(reference = %id, "lineage reference to unknown person"),
            }
        }
        Ok(persons)
    }
}

fn dangling(from: &DisplayId, to: &DisplayId) {
    tracing::warn!(from = %from, reference = %to, "lineage reference to unknown person");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::{Credentials, EraCode, Prefix};

    fn codes(generation: &str) -> IdentityCodes {
        IdentityCodes {
            generation: generation.parse::<EraCode>().unwrap(),
            continent: "C1".parse().unwrap(),
            country: "P2".parse().unwrap(),
            region: "R1".parse().unwrap(),
            ethnicity: "E3".parse().unwrap(),
            family: "F1".parse().unwrap(),
        }
    }

    fn pending(
        name: &str,
        father: Option<&DisplayId>,
        mother: Option<&DisplayId>,
    ) -> PendingPerson {
        PendingPerson {
            given_name: name.to_string(),
            family_name: "Diallo".to_string(),
            gender: Gender::Other,
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1),
            codes: codes("G96"),
            vitality: Vitality::Living {
                credentials: Credentials {
                    secret_hash: "$argon2id$v=19$test".to_string(),
                },
            },
            father: father.cloned(),
            mother: mother.cloned(),
        }
    }

    fn register(graph: &GenealogyGraph<'_, MemoryStore>, p: PendingPerson) -> DisplayId {
        graph.link(p, None).unwrap().into_person().id
    }

    #[test]
    fn child_is_appended_to_both_parents_once() {
        let store = MemoryStore::new();
        let graph = GenealogyGraph::new(&store);
        let father = register(&graph, pending("Alpha", None, None));
        let mother = register(&graph, pending("Binta", None, None));

        let outcome = graph
            .link(pending("Cherif", Some(&father), Some(&mother)), Some("k1"))
            .unwrap();
        let child = outcome.person().id.clone();
        assert!(matches!(outcome, CommitOutcome::Committed(_)));

        let replay = graph
            .link(pending("Cherif", Some(&father), Some(&mother)), Some("k1"))
            .unwrap();
        assert_eq!(replay, CommitOutcome::Replayed(outcome.person().clone()));

        assert_eq!(graph.person(&father).unwrap().children, vec![child.clone()]);
        assert_eq!(graph.person(&mother).unwrap().children, vec![child.clone()]);
        assert_eq!(graph.parents(&child).unwrap().len(), 2);
    }

    #[test]
    fn unknown_parent_blocks_and_writes_nothing() {
        let store = MemoryStore::new();
        let graph = GenealogyGraph::new(&store);
        let ghost: DisplayId = "G95C1P2R1E3F1 42".parse().unwrap();

        let result = graph.link(pending("Orphan", Some(&ghost), None), None);
        assert!(matches!(result, Err(LineageError::ParentNotFound(_))));
        assert_eq!(store.person_count().unwrap(), 0);
    }

    #[test]
    fn malformed_parent_text_is_parent_not_found() {
        match parse_parent_ref("  not   an id ") {
            Err(LineageError::ParentNotFound(raw)) => assert_eq!(raw, "not an id"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_parent_ref(" G95C1P2R1E3F1   4 ").is_ok());
    }

    #[test]
    fn taken_identifier_is_retried() {
        let store = MemoryStore::new();
        let graph = GenealogyGraph::new(&store);
        // Occupy "... 1" out of band so the counter's first value collides.
        let squatter = Person {
            id: DisplayId::new(Prefix::new("G96C1P2R1E3F1").unwrap(), 1).unwrap(),
            given_name: "Imported".to_string(),
            family_name: "Diallo".to_string(),
            gender: Gender::Other,
            birth_date: None,
            codes: codes("G96"),
            vitality: pending("x", None, None).vitality,
            father: None,
            mother: None,
            children: Vec::new(),
            registered_at: Utc::now(),
        };
        store.import_person(&squatter).unwrap();

        let id = register(&graph, pending("Fresh", None, None));
        assert_eq!(id.to_string(), "G96C1P2R1E3F1 2");
    }

    #[test]
    fn traversals_are_bounded_and_ordered() {
        let store = MemoryStore::new();
        let graph = GenealogyGraph::new(&store);
        let grandpa = register(&graph, pending("Grandpa", None, None));
        let father = register(&graph, pending("Father", Some(&grandpa), None));
        let uncle = register(&graph, pending("Uncle", Some(&grandpa), None));
        let me = register(&graph, pending("Me", Some(&father), None));

        let ancestors = graph.ancestors(&me, 10).unwrap();
        let names: Vec<_> = ancestors
            .iter()
            .map(|e| (e.depth, e.person.given_name.as_str()))
            .collect();
        assert_eq!(names, [(1, "Father"), (2, "Grandpa")]);
        assert_eq!(graph.ancestors(&me, 1).unwrap().len(), 1);

        let descendants = graph.descendants(&grandpa, 10).unwrap();
        let names: Vec<_> = descendants.iter().map(|e| e.person.given_name.as_str()).collect();
        assert_eq!(names, ["Father", "Uncle", "Me"]);

        let siblings = graph.siblings(&father).unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].id, uncle);
        assert!(graph.siblings(&grandpa).unwrap().is_empty());
    }

    #[test]
    fn queries_on_unknown_person_fail() {
        let store = MemoryStore::new();
        let graph = GenealogyGraph::new(&store);
        let ghost: DisplayId = "G1C1P1R1E1F1 1".parse().unwrap();
        assert!(matches!(graph.children(&ghost), Err(LineageError::PersonNotFound(_))));
        assert!(matches!(graph.ancestors(&ghost, 3), Err(LineageError::PersonNotFound(_))));
    }
}
