//! # Person Registry
//!
//! The facade composing the engine: validation, code derivation, linkage,
//! lookup and authentication over one [`RegistryStore`].
//!
//! ```text
//! PersonDraft ──► epoch + classification ──► codes
//!                                              │
//!                 identifier + graph ◄─────────┘
//!                        │
//!                   RegistryStore (one transaction)
//! ```

use crate::classification::{Classifier, ClassificationSeed, Resolution, canonical_label};
use crate::credentials::AuthSession;
use crate::epoch::{decet_code, generation_code};
use crate::graph::{GenealogyGraph, PendingPerson, parse_parent_ref};
use crate::primitives::{MAX_IDEMPOTENCY_KEY_LENGTH, MAX_NAME_LENGTH};
use crate::storage::{CommitOutcome, RegistryStore, StorageBackend};
use crate::{
    Credentials, Dimension, DisplayId, EraCode, EraKind, Gender, IdentityCodes, LineageError,
    Person, Vitality, normalize_text,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Free-form origin labels, resolved to codes at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginLabels {
    pub continent: String,
    pub country: String,
    pub region: String,
    pub ethnicity: String,
}

/// Kind-specific registration data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalityDraft {
    /// Credentials are hashed before they reach the draft.
    Living { credentials: Credentials },
    /// `generation` stands in for the code when the birth date is unknown.
    Deceased {
        death_date: NaiveDate,
        generation: Option<EraCode>,
    },
}

/// Everything needed to register a person, before derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDraft {
    pub given_name: String,
    pub family_name: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
    pub origin: OriginLabels,
    pub vitality: VitalityDraft,
}

/// A draft plus its parent references and an optional idempotency key.
///
/// Parent references are raw text; they are normalized and resolved at
/// commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub draft: PersonDraft,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub idempotency_key: Option<String>,
}

impl RegistrationRequest {
    #[must_use]
    pub fn new(draft: PersonDraft) -> Self {
        Self {
            draft,
            father: None,
            mother: None,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub fn with_father(mut self, id: impl Into<String>) -> Self {
        self.father = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_mother(mut self, id: impl Into<String>) -> Self {
        self.mother = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub person: Person,
    /// Labels that had no static code (allocated now or earlier).
    pub gaps: Vec<Resolution>,
    /// `true` when the idempotency key had already been committed.
    pub replayed: bool,
}

/// Registry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMetrics {
    pub persons: u64,
    pub living: u64,
    pub deceased: u64,
    pub lineage_roots: u64,
    pub allocated_codes: Vec<(Dimension, u64)>,
    pub prefixes: u64,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// The person registry over a storage backend.
#[derive(Debug)]
pub struct Registry<S = StorageBackend> {
    store: S,
    seed: ClassificationSeed,
}

impl Registry<StorageBackend> {
    /// A volatile registry.
    pub fn in_memory(seed: ClassificationSeed) -> Result<Self, LineageError> {
        Self::new(StorageBackend::default(), seed)
    }

    /// A registry persisted in a redb file.
    pub fn open(path: impl AsRef<Path>, seed: ClassificationSeed) -> Result<Self, LineageError> {
        Self::new(StorageBackend::open_persistent(path)?, seed)
    }
}

impl<S: RegistryStore> Registry<S> {
    /// Wrap a store, checking its allocations against the seed.
    pub fn new(store: S, seed: ClassificationSeed) -> Result<Self, LineageError> {
        for dimension in Dimension::ALL {
            seed.check_allocations(dimension, &store.allocations(dimension)?)?;
        }
        Ok(Self { store, seed })
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn seed(&self) -> &ClassificationSeed {
        &self.seed
    }

    #[must_use]
    pub fn classifier(&self) -> Classifier<'_, S> {
        Classifier::new(&self.seed, &self.store)
    }

    #[must_use]
    pub fn graph(&self) -> GenealogyGraph<'_, S> {
        GenealogyGraph::new(&self.store)
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a Living person. Fails if the draft is for a Deceased person.
    pub fn register_living(
        &self,
        draft: PersonDraft,
        father: Option<&str>,
        mother: Option<&str>,
    ) -> Result<RegistrationReceipt, LineageError> {
        if !matches!(draft.vitality, VitalityDraft::Living { .. }) {
            return Err(LineageError::InputValidation(
                "register_living requires living credentials".to_string(),
            ));
        }
        self.register(with_parents(draft, father, mother))
    }

    /// Register a Deceased person. Fails if the draft is for a Living person.
    pub fn register_deceased(
        &self,
        draft: PersonDraft,
        father: Option<&str>,
        mother: Option<&str>,
    ) -> Result<RegistrationReceipt, LineageError> {
        if !matches!(draft.vitality, VitalityDraft::Deceased { .. }) {
            return Err(LineageError::InputValidation(
                "register_deceased requires a death date".to_string(),
            ));
        }
        self.register(with_parents(draft, father, mother))
    }

    /// Validate, derive codes, mint an identifier and link to parents.
    pub fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationReceipt, LineageError> {
        let key = validate_key(request.idempotency_key.as_deref())?;
        if let Some(key) = key.as_deref()
            && let Some(person) = self.store.replay(key)?
        {
            tracing::info!(id = %person.id, "registration replayed");
            return Ok(RegistrationReceipt {
                person,
                gaps: Vec::new(),
                replayed: true,
            });
        }

        let draft = validate_draft(request.draft)?;
        let father = request.father.as_deref().map(parse_parent_ref).transpose()?;
        let mother = request.mother.as_deref().map(parse_parent_ref).transpose()?;
        if father.is_some() && father == mother {
            return Err(LineageError::InputValidation(
                "father and mother must be different persons".to_string(),
            ));
        }
        // Early check so an unknown parent neither allocates codes nor
        // consumes a sequence number; the commit re-checks atomically.
        for parent in father.iter().chain(mother.iter()) {
            if self.store.get_person(parent)?.is_none() {
                return Err(LineageError::ParentNotFound(parent.to_string()));
            }
        }

        let (codes, gaps) = self.derive_codes(&draft)?;
        let vitality = match draft.vitality {
            VitalityDraft::Living { credentials } => Vitality::Living { credentials },
            VitalityDraft::Deceased { death_date, .. } => Vitality::Deceased {
                death_date,
                decet: decet_code(death_date),
            },
        };

        let pending = PendingPerson {
            given_name: draft.given_name,
            family_name: draft.family_name,
            gender: draft.gender,
            birth_date: draft.birth_date,
            codes,
            vitality,
            father,
            mother,
        };

        let outcome = self.graph().link(pending, key.as_deref())?;
        let replayed = matches!(outcome, CommitOutcome::Replayed(_));
        let person = outcome.into_person();
        tracing::info!(
            id = %person.id,
            kind = person.vitality.kind_name(),
            root = person.is_lineage_root(),
            replayed,
            "person registered"
        );
        Ok(RegistrationReceipt {
            person,
            gaps: if replayed { Vec::new() } else { gaps },
            replayed,
        })
    }

    fn derive_codes(
        &self,
        draft: &PersonDraft,
    ) -> Result<(IdentityCodes, Vec<Resolution>), LineageError> {
        let generation = match (draft.birth_date, &draft.vitality) {
            (Some(birth), _) => generation_code(birth),
            (None, VitalityDraft::Deceased { generation: Some(code), .. }) => *code,
            (None, _) => {
                return Err(LineageError::InputValidation(
                    "generation code not derivable: birth date unknown".to_string(),
                ));
            }
        };

        let classifier = self.classifier();
        let continent = classifier.resolve(Dimension::Continent, &draft.origin.continent)?;
        let country = classifier.resolve(Dimension::Country, &draft.origin.country)?;
        let region = classifier.resolve(Dimension::Region, &draft.origin.region)?;
        let ethnicity = classifier.resolve(Dimension::Ethnicity, &draft.origin.ethnicity)?;
        let family = classifier.resolve(Dimension::Family, &draft.family_name)?;

        let codes = IdentityCodes {
            generation,
            continent: continent.code.clone(),
            country: country.code.clone(),
            region: region.code.clone(),
            ethnicity: ethnicity.code.clone(),
            family: family.code.clone(),
        };
        let gaps = [continent, country, region, ethnicity, family]
            .into_iter()
            .filter(Resolution::is_gap)
            .collect();
        Ok((codes, gaps))
    }

    // -------------------------------------------------------------------------
    // Lookup & authentication
    // -------------------------------------------------------------------------

    /// The person registered under `id` (whitespace-normalized).
    pub fn find_by_id(&self, id: &str) -> Result<Person, LineageError> {
        let id = parse_lookup_id(id)?;
        self.graph().person(&id)
    }

    /// Check a Living person's secret and open a session.
    pub fn authenticate(&self, id: &str, secret: &str) -> Result<AuthSession, LineageError> {
        let person = self.find_by_id(id).inspect_err(|e| {
            auth_failure(id, "unknown_person", e);
        })?;

        let verified = match &person.vitality {
            Vitality::Deceased { .. } => {
                let err = LineageError::AuthenticationUnsupported(person.id.to_string());
                auth_failure(id, "deceased", &err);
                return Err(err);
            }
            Vitality::Living { credentials } => credentials.verify(secret)?,
        };

        if !verified {
            let err = LineageError::InvalidCredentials;
            auth_failure(id, "bad_secret", &err);
            return Err(err);
        }

        tracing::info!(id = %person.id, "person authenticated");
        Ok(AuthSession::issue(person))
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    pub fn metrics(&self) -> Result<RegistryMetrics, LineageError> {
        let mut metrics = RegistryMetrics::default();
        for person in self.store.persons()? {
            metrics.persons += 1;
            if person.vitality.is_living() {
                metrics.living += 1;
            } else {
                metrics.deceased += 1;
            }
            if person.is_lineage_root() {
                metrics.lineage_roots += 1;
            }
        }
        for dimension in Dimension::ALL {
            let count = self.store.allocations(dimension)?.len() as u64;
            metrics.allocated_codes.push((dimension, count));
        }
        metrics.prefixes = self.store.sequences()?.len() as u64;
        Ok(metrics)
    }

}

fn with_parents(
    draft: PersonDraft,
    father: Option<&str>,
    mother: Option<&str>,
) -> RegistrationRequest {
    RegistrationRequest {
        draft,
        father: father.map(str::to_string),
        mother: mother.map(str::to_string),
        idempotency_key: None,
    }
}

fn parse_lookup_id(raw: &str) -> Result<DisplayId, LineageError> {
    raw.parse()
        .map_err(|_| LineageError::PersonNotFound(normalize_text(raw)))
}

fn auth_failure(id: &str, reason: &str, error: &LineageError) {
    tracing::warn!(
        event = "auth_failure",
        id = %normalize_text(id),
        reason,
        error = %error,
        "authentication rejected"
    );
}

fn validate_key(key: Option<&str>) -> Result<Option<String>, LineageError> {
    let Some(key) = key else {
        return Ok(None);
    };
    let key = key.trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(LineageError::InputValidation(format!(
            "idempotency key must be 1..={} bytes",
            MAX_IDEMPOTENCY_KEY_LENGTH
        )));
    }
    Ok(Some(key.to_string()))
}

fn validate_name(field: &str, raw: &str) -> Result<String, LineageError> {
    let name = normalize_text(raw);
    if name.is_empty() {
        return Err(LineageError::InputValidation(format!("{} is required", field)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(LineageError::InputValidation(format!(
            "{} length {} exceeds maximum {} bytes",
            field,
            name.len(),
            MAX_NAME_LENGTH
        )));
    }
    Ok(name)
}

/// Normalize and check a draft before any code is resolved.
fn validate_draft(draft: PersonDraft) -> Result<PersonDraft, LineageError> {
    let given_name = validate_name("given name", &draft.given_name)?;
    let family_name = validate_name("family name", &draft.family_name)?;
    let origin = OriginLabels {
        continent: canonical_label(&draft.origin.continent)?,
        country: canonical_label(&draft.origin.country)?,
        region: canonical_label(&draft.origin.region)?,
        ethnicity: canonical_label(&draft.origin.ethnicity)?,
    };

    match (&draft.vitality, draft.birth_date) {
        (VitalityDraft::Living { .. }, None) => {
            return Err(LineageError::InputValidation(
                "birth date is required for a living person".to_string(),
            ));
        }
        (VitalityDraft::Deceased { death_date, .. }, Some(birth)) if *death_date < birth => {
            return Err(LineageError::InputValidation(format!(
                "death date {} precedes birth date {}",
                death_date, birth
            )));
        }
        (
            VitalityDraft::Deceased {
                generation: Some(code),
                ..
            },
            Some(birth),
        ) if *code != generation_code(birth) => {
            return Err(LineageError::InputValidation(format!(
                "generation {} contradicts birth date {} ({})",
                code,
                birth,
                generation_code(birth)
            )));
        }
        (VitalityDraft::Deceased { generation: Some(code), .. }, None)
            if code.kind() != EraKind::Generation =>
        {
            return Err(LineageError::InputValidation(format!(
                "{} is not a generation code",
                code
            )));
        }
        _ => {}
    }

    Ok(PersonDraft {
        given_name,
        family_name,
        origin,
        ..draft
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn registry() -> Registry<StorageBackend> {
        Registry::in_memory(ClassificationSeed::curated().unwrap()).unwrap()
    }

    fn living(given: &str, family: &str) -> PersonDraft {
        PersonDraft {
            given_name: given.to_string(),
            family_name: family.to_string(),
            gender: Gender::Female,
            birth_date: NaiveDate::from_ymd_opt(1990, 4, 12),
            origin: OriginLabels {
                continent: "Afrique".to_string(),
                country: "Guinée".to_string(),
                region: "Fouta-Djallon".to_string(),
                ethnicity: "Peuls".to_string(),
            },
            vitality: VitalityDraft::Living {
                credentials: Credentials::from_secret("secret-1").unwrap(),
            },
        }
    }

    fn deceased(given: &str, family: &str, death_year: i32) -> PersonDraft {
        PersonDraft {
            birth_date: NaiveDate::from_ymd_opt(1930, 1, 1),
            vitality: VitalityDraft::Deceased {
                death_date: NaiveDate::from_ymd_opt(death_year, 1, 1).unwrap(),
                generation: None,
            },
            ..living(given, family)
        }
    }

    #[test]
    fn living_identifier_from_curated_codes() {
        let receipt = registry()
            .register_living(living("Aïssatou", "Barry"), None, None)
            .unwrap();
        assert_eq!(receipt.person.id.to_string(), "G96C1P2R2E1F2 1");
        assert!(receipt.gaps.is_empty());
        assert!(!receipt.replayed);
    }

    #[test]
    fn deceased_prefix_starts_with_decet() {
        let receipt = registry()
            .register_deceased(deceased("Mamadou", "Diallo", 2001), None, None)
            .unwrap();
        // birth: 1930 - (-4003) = 5933 = 63 * 94 + 11; death: 2001 -> D94
        assert_eq!(receipt.person.id.to_string(), "D94G95C1P2R2E1F1 1");
        assert!(!receipt.person.vitality.is_living());
    }

    #[test]
    fn deceased_without_birth_date_needs_generation() {
        let registry = registry();
        let mut draft = deceased("Inconnu", "Sow", 1950);
        draft.birth_date = None;
        assert!(matches!(
            registry.register_deceased(draft.clone(), None, None),
            Err(LineageError::InputValidation(_))
        ));

        draft.vitality = VitalityDraft::Deceased {
            death_date: NaiveDate::from_ymd_opt(1950, 1, 1).unwrap(),
            generation: Some("G62".parse().unwrap()),
        };
        let receipt = registry.register_deceased(draft, None, None).unwrap();
        assert!(receipt.person.id.prefix().as_str().starts_with("D93G62"));
    }

    #[test]
    fn unseen_labels_are_reported_as_gaps() {
        let registry = registry();
        let mut draft = living("Fatou", "Ndiaye");
        draft.origin.ethnicity = "Wolof".to_string();
        let receipt = registry.register(RegistrationRequest::new(draft)).unwrap();

        let gaps: Vec<(Dimension, String)> = receipt
            .gaps
            .iter()
            .map(|g| (g.dimension, g.code.to_string()))
            .collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].0, Dimension::Family);
        assert_eq!(registry.metrics().unwrap().allocated_codes[4], (Dimension::Family, 1));
        assert_eq!(receipt.person.codes.ethnicity.to_string(), "E7");
    }

    #[test]
    fn validation_rejects_bad_drafts() {
        let registry = registry();

        let mut blank = living("  ", "Barry");
        blank.given_name = "   ".to_string();
        assert!(matches!(
            registry.register(RegistrationRequest::new(blank)),
            Err(LineageError::InputValidation(_))
        ));

        let mut no_birth = living("Awa", "Barry");
        no_birth.birth_date = None;
        assert!(matches!(
            registry.register(RegistrationRequest::new(no_birth)),
            Err(LineageError::InputValidation(_))
        ));

        let mut backwards = deceased("Awa", "Barry", 1920);
        backwards.birth_date = NaiveDate::from_ymd_opt(1930, 1, 1);
        assert!(matches!(
            registry.register(RegistrationRequest::new(backwards)),
            Err(LineageError::InputValidation(_))
        ));

        assert!(registry
            .register_deceased(living("Awa", "Barry"), None, None)
            .is_err());
        assert_eq!(registry.metrics().unwrap().persons, 0);
    }

    #[test]
    fn same_parent_twice_is_rejected() {
        let registry = registry();
        let parent = registry
            .register_living(living("Alpha", "Barry"), None, None)
            .unwrap()
            .person
            .id
            .to_string();
        assert!(matches!(
            registry.register_living(living("Beta", "Barry"), Some(&parent), Some(&parent)),
            Err(LineageError::InputValidation(_))
        ));
    }

    #[test]
    fn unknown_parent_consumes_nothing() {
        let registry = registry();
        let result = registry.register_living(
            living("Awa", "Barry"),
            Some("G95C1P2R2E1F2 77"),
            None,
        );
        assert!(matches!(result, Err(LineageError::ParentNotFound(_))));
        assert!(registry.store().sequences().unwrap().is_empty());
    }

    #[test]
    fn authentication_distinguishes_kinds() {
        let registry = registry();
        let alive = registry
            .register_living(living("Aïssatou", "Barry"), None, None)
            .unwrap()
            .person;
        let dead = registry
            .register_deceased(deceased("Mamadou", "Diallo", 2001), None, None)
            .unwrap()
            .person;

        let session = registry
            .authenticate(&format!("  {}  ", alive.id), "secret-1")
            .unwrap();
        assert_eq!(session.person.id, alive.id);

        assert!(matches!(
            registry.authenticate(&alive.id.to_string(), "wrong-secret"),
            Err(LineageError::InvalidCredentials)
        ));
        assert!(matches!(
            registry.authenticate(&dead.id.to_string(), "secret-1"),
            Err(LineageError::AuthenticationUnsupported(_))
        ));
        assert!(matches!(
            registry.authenticate("G1C1P1R1E1F1 9", "secret-1"),
            Err(LineageError::PersonNotFound(_))
        ));
        assert!(matches!(
            registry.authenticate("garbage", "secret-1"),
            Err(LineageError::PersonNotFound(_))
        ));
    }

    #[test]
    fn metrics_count_kinds_and_roots() {
        let registry = registry();
        let father = registry
            .register_deceased(deceased("Mamadou", "Diallo", 2001), None, None)
            .unwrap()
            .person
            .id
            .to_string();
        registry
            .register_living(living("Aïssatou", "Diallo"), Some(&father), None)
            .unwrap();

        let metrics = registry.metrics().unwrap();
        assert_eq!(metrics.persons, 2);
        assert_eq!(metrics.living, 1);
        assert_eq!(metrics.deceased, 1);
        assert_eq!(metrics.lineage_roots, 1);
        assert_eq!(metrics.prefixes, 2);
    }

    #[test]
    fn seed_conflicting_with_store_is_refused() {
        let store = StorageBackend::default();
        store.allocate_code(Dimension::Ethnicity, "Wolof", 5).unwrap();
        let seed = ClassificationSeed::empty()
            .with_entries(Dimension::Ethnicity, &[("Wolof", 9)])
            .unwrap();
        assert!(matches!(
            Registry::new(store, seed),
            Err(LineageError::ClassificationConflict { .. })
        ));
    }
}
