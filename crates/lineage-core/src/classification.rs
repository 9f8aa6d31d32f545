//! # Hierarchical Classification Resolver
//!
//! Canonical label → short code, per dimension.
//!
//! 1. Exact match (after whitespace normalization) in the static seed table.
//! 2. Otherwise the persisted allocation for that label, if any.
//! 3. Otherwise allocate `letter + (N + 1)` where N is the highest number
//!    known for the dimension (seed ∪ every persisted allocation), inside
//!    the store's write transaction.
//!
//! Codes are append-only: nothing is ever removed or renumbered.

use crate::primitives::MAX_LABEL_LENGTH;
use crate::storage::RegistryStore;
use crate::{ClassificationCode, Dimension, LineageError, normalize_text};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CURATED TABLES
// =============================================================================

const CONTINENTS: &[(&str, u64)] = &[
    ("Afrique", 1),
    ("Asie", 2),
    ("Europe", 3),
    ("Amérique", 4),
    ("Océanie", 5),
];

const COUNTRIES: &[(&str, u64)] = &[("Égypte", 1), ("Guinée", 2)];

const REGIONS: &[(&str, u64)] = &[
    ("Basse-Guinée", 1),
    ("Fouta-Djallon", 2),
    ("Haute-Guinée", 3),
    ("Guinée forestière", 4),
];

const ETHNICITIES: &[(&str, u64)] = &[
    ("Peuls", 1),
    ("Malinkés", 2),
    ("Soussous", 3),
    ("Tomas / Loma", 4),
    ("Kissi", 5),
    ("Guerzés / Kpelle", 6),
    ("Wolof", 7),
    ("Serer", 8),
    ("Diola", 9),
    ("Mandinka", 10),
    ("Bambara", 11),
    ("Soninké", 12),
    ("Songhaï", 13),
    ("Hausa", 14),
    ("Fulani", 15),
    ("Yoruba", 16),
    ("Igbo", 17),
    ("Edo", 18),
    ("Ijaw", 19),
    ("Ibibio", 20),
    ("Zoulou", 50),
    ("Xhosa", 51),
    ("Afrikaans", 52),
    ("Sotho du Nord", 53),
    ("Sotho du Sud", 54),
    ("Arabe", 100),
    ("Persan", 101),
    ("Turc", 102),
    ("Kurde", 103),
    ("Arménien", 104),
    ("Han", 200),
    ("Mandchou", 201),
    ("Mongol", 202),
    ("Tibétain", 203),
    ("Ouïghour", 204),
    ("Japonais", 300),
    ("Coréen", 301),
    ("Vietnamien", 302),
    ("Thaï", 303),
    ("Lao", 304),
    ("Français", 400),
    ("Allemand", 401),
    ("Italien", 402),
    ("Espagnol", 403),
    ("Portugais", 404),
    ("Britannique", 405),
    ("Irlandais", 406),
    ("Néerlandais", 407),
    ("Belge", 408),
    ("Russe", 500),
    ("Ukrainien", 501),
    ("Polonais", 502),
    ("Tchèque", 503),
    ("Hongrois", 504),
    ("Amérindien", 600),
    ("Inuit", 601),
    ("Métis", 602),
    ("Afro-américain", 603),
    ("Hispanique", 604),
    ("Aborigène australien", 700),
    ("Maori", 701),
    ("Hawaïen", 702),
    ("Samoan", 703),
    ("Tongien", 704),
];

const FAMILIES: &[(&str, u64)] = &[
    ("Diallo", 1),
    ("Barry", 2),
    ("Sow", 3),
    ("Bah", 4),
    ("Balde", 5),
    ("Camara", 6),
    ("Keita", 7),
    ("Bangoura", 8),
    ("Koroma", 9),
    ("Kamano", 10),
    ("Fofana", 11),
    ("Traoré", 12),
    ("Cissé", 13),
    ("Konaté", 14),
    ("Kourouma", 15),
    ("Soumah", 16),
    ("Touré", 17),
    ("Conté", 18),
    ("Kissi", 19),
    ("Sangaré", 20),
    ("Sidibé", 21),
    ("Koulibaly", 22),
    ("Kaba", 23),
    ("Gbanamou", 24),
    ("Manons", 25),
    ("Lelehée", 26),
    ("Kpelle", 27),
    ("Doumbouya", 28),
    ("Sylla", 29),
    ("Kouyaté", 30),
    ("Smith", 100),
    ("Johnson", 101),
    ("Williams", 102),
    ("Brown", 103),
    ("Jones", 104),
    ("Garcia", 105),
    ("Miller", 106),
    ("Davis", 107),
    ("Rodriguez", 108),
    ("Martinez", 109),
    ("Martin", 200),
    ("Bernard", 201),
    ("Dubois", 202),
    ("Thomas", 203),
    ("Robert", 204),
    ("Müller", 300),
    ("Schmidt", 301),
    ("Schneider", 302),
    ("Fischer", 303),
    ("Weber", 304),
    ("Rossi", 400),
    ("Russo", 401),
    ("Ferrari", 402),
    ("Esposito", 403),
    ("Bianchi", 404),
    ("Wang", 500),
    ("Li", 501),
    ("Zhang", 502),
    ("Liu", 503),
    ("Chen", 504),
    ("Singh", 600),
    ("Kumar", 601),
    ("Patel", 602),
    ("Sharma", 603),
    ("Gupta", 604),
    ("Al-Ahmad", 700),
    ("Al-Hassan", 701),
    ("Al-Hussein", 702),
    ("Al-Ali", 703),
    ("Al-Mahmoud", 704),
    ("Tanaka", 800),
    ("Sato", 801),
    ("Suzuki", 802),
    ("Takahashi", 803),
    ("Watanabe", 804),
    ("Kim", 900),
    ("Lee", 901),
    ("Park", 902),
    ("Choi", 903),
    ("Jung", 904),
];

// =============================================================================
// SEED
// =============================================================================

#[derive(Debug, Clone, Default)]
struct SeedTable {
    by_label: BTreeMap<String, ClassificationCode>,
    by_code: BTreeMap<ClassificationCode, String>,
}

/// The static, curated label → code tables, one per dimension.
///
/// A seed is internally consistent by construction: no label carries two
/// codes and no code is bound to two labels.
#[derive(Debug, Clone, Default)]
pub struct ClassificationSeed {
    tables: BTreeMap<Dimension, SeedTable>,
}

impl ClassificationSeed {
    /// A seed with no static codes; every label is allocated.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The curated registry tables.
    pub fn curated() -> Result<Self, LineageError> {
        Self::empty()
            .with_entries(Dimension::Continent, CONTINENTS)?
            .with_entries(Dimension::Country, COUNTRIES)?
            .with_entries(Dimension::Region, REGIONS)?
            .with_entries(Dimension::Ethnicity, ETHNICITIES)?
            .with_entries(Dimension::Family, FAMILIES)
    }

    /// Add `(label, number)` entries to a dimension.
    pub fn with_entries(
        mut self,
        dimension: Dimension,
        entries: &[(&str, u64)],
    ) -> Result<Self, LineageError> {
        let table = self.tables.entry(dimension).or_default();
        for &(raw_label, number) in entries {
            let label = canonical_label(raw_label)?;
            let code = ClassificationCode::new(dimension, number)?;

            if let Some(existing) = table.by_label.get(&label) {
                if existing != &code {
                    return Err(LineageError::ClassificationConflict {
                        dimension,
                        label,
                        existing: existing.to_string(),
                        proposed: code.to_string(),
                    });
                }
                continue;
            }
            if let Some(owner) = table.by_code.get(&code) {
                return Err(LineageError::CodeAlreadyAssigned {
                    dimension,
                    code: code.to_string(),
                    holder: owner.clone(),
                    label,
                });
            }

            table.by_label.insert(label.clone(), code.clone());
            table.by_code.insert(code, label);
        }
        Ok(self)
    }

    /// Static code for an already-normalized label.
    #[must_use]
    pub fn static_code(&self, dimension: Dimension, label: &str) -> Option<&ClassificationCode> {
        self.tables.get(&dimension)?.by_label.get(label)
    }

    /// Label owning a static code.
    #[must_use]
    pub fn static_label(&self, dimension: Dimension, code: &ClassificationCode) -> Option<&str> {
        self.tables
            .get(&dimension)?
            .by_code
            .get(code)
            .map(String::as_str)
    }

    /// Highest static number of a dimension (0 when the table is empty).
    #[must_use]
    pub fn max_number(&self, dimension: Dimension) -> u64 {
        self.tables
            .get(&dimension)
            .and_then(|t| t.by_code.keys().map(ClassificationCode::number).max())
            .unwrap_or(0)
    }

    /// Static entries of a dimension, ordered by code number.
    #[must_use]
    pub fn entries(&self, dimension: Dimension) -> Vec<(String, ClassificationCode)> {
        let mut entries: Vec<_> = self
            .tables
            .get(&dimension)
            .map(|t| {
                t.by_label
                    .iter()
                    .map(|(label, code)| (label.clone(), code.clone()))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|(_, code)| code.number());
        entries
    }

    /// Check persisted allocations against this seed.
    ///
    /// A seed revision must never move an allocated label to another code,
    /// nor hand an allocated code to another label.
    pub fn check_allocations(
        &self,
        dimension: Dimension,
        allocations: &[(String, ClassificationCode)],
    ) -> Result<(), LineageError> {
        for (label, code) in allocations {
            if let Some(static_code) = self.static_code(dimension, label)
                && static_code != code
            {
                return Err(LineageError::ClassificationConflict {
                    dimension,
                    label: label.clone(),
                    existing: code.to_string(),
                    proposed: static_code.to_string(),
                });
            }
            if let Some(owner) = self.static_label(dimension, code)
                && owner != label
            {
                return Err(LineageError::CodeAlreadyAssigned {
                    dimension,
                    code: code.to_string(),
                    holder: owner.to_string(),
                    label: label.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Normalize and validate a label.
pub fn canonical_label(raw: &str) -> Result<String, LineageError> {
    let label = normalize_text(raw);
    if label.is_empty() {
        return Err(LineageError::InputValidation(
            "classification label is empty".to_string(),
        ));
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(LineageError::InputValidation(format!(
            "classification label length {} exceeds maximum {} bytes",
            label.len(),
            MAX_LABEL_LENGTH
        )));
    }
    Ok(label)
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Where a resolved code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeOrigin {
    /// Curated static table.
    Static,
    /// Allocated by an earlier resolution.
    Allocated,
    /// Allocated by this resolution.
    Fresh,
}

/// Outcome of resolving one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub dimension: Dimension,
    pub label: String,
    pub code: ClassificationCode,
    pub origin: CodeOrigin,
}

impl Resolution {
    /// A label without a static code: the catalog should be reviewed.
    #[must_use]
    pub fn is_gap(&self) -> bool {
        self.origin != CodeOrigin::Static
    }
}

/// Resolves labels against a seed and the allocations of a store.
#[derive(Debug)]
pub struct Classifier<'a, S: RegistryStore + ?Sized> {
    seed: &'a ClassificationSeed,
    store: &'a S,
}

impl<'a, S: RegistryStore + ?Sized> Classifier<'a, S> {
    #[must_use]
    pub fn new(seed: &'a ClassificationSeed, store: &'a S) -> Self {
        Self { seed, store }
    }

    /// Look up a label without allocating.
    pub fn lookup(
        &self,
        dimension: Dimension,
        raw_label: &str,
    ) -> Result<Option<Resolution>, LineageError> {
        let label = canonical_label(raw_label)?;
        if let Some(code) = self.seed.static_code(dimension, &label) {
            return Ok(Some(Resolution {
                dimension,
                code: code.clone(),
                label,
                origin: CodeOrigin::Static,
            }));
        }
        Ok(self
            .store
            .lookup_allocation(dimension, &label)?
            .map(|code| Resolution {
                dimension,
                label,
                code,
                origin: CodeOrigin::Allocated,
            }))
    }

    /// Resolve a label, allocating a new code when it has none.
    pub fn resolve(
        &self,
        dimension: Dimension,
        raw_label: &str,
    ) -> Result<Resolution, LineageError> {
        if let Some(resolution) = self.lookup(dimension, raw_label)? {
            if resolution.is_gap() {
                report_gap(&resolution);
            }
            return Ok(resolution);
        }

        let label = canonical_label(raw_label)?;
        let floor = self.seed.max_number(dimension);
        let (code, fresh) = self.store.allocate_code(dimension, &label, floor)?;
        let resolution = Resolution {
            dimension,
            label,
            code,
            origin: if fresh {
                CodeOrigin::Fresh
            } else {
                CodeOrigin::Allocated
            },
        };
        report_gap(&resolution);
        Ok(resolution)
    }

    /// Every known code of a dimension (static and allocated), ordered by number.
    pub fn codes(&self, dimension: Dimension) -> Result<Vec<Resolution>, LineageError> {
        let mut all: Vec<Resolution> = self
            .seed
            .entries(dimension)
            .into_iter()
            .map(|(label, code)| Resolution {
                dimension,
                label,
                code,
                origin: CodeOrigin::Static,
            })
            .collect();
        all.extend(
            self.store
                .allocations(dimension)?
                .into_iter()
                .map(|(label, code)| Resolution {
                    dimension,
                    label,
                    code,
                    origin: CodeOrigin::Allocated,
                }),
        );
        all.sort_by_key(|r| r.code.number());
        Ok(all)
    }
}

fn report_gap(resolution: &Resolution) {
    tracing::warn!(
        event = "code_resolution_gap",
        dimension = %resolution.dimension,
        label = %resolution.label,
        code = %resolution.code,
        fresh = resolution.origin == CodeOrigin::Fresh,
        "label has no static code; review the classification catalog"
    );
}
