//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API. The same
//! [`RegisterRequest`] shape is read by `lineage register` from a file.

use chrono::{DateTime, NaiveDate, Utc};
use lineage_core::{
    AuthSession, CodeOrigin, Credentials, Dimension, GeoEntry, GeoLevel, LineageEntry,
    LineageError, OriginLabels, Person, PersonDraft, RegistrationReceipt, RegistrationRequest,
    RegistryMetrics, Resolution, Vitality, VitalityDraft, epoch::parse_date,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx response produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable error kind (`person_not_found`, ...).
    pub kind: String,
    pub error: String,
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Registry status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub backend: String,
    pub persons: u64,
    pub living: u64,
    pub deceased: u64,
    pub lineage_roots: u64,
    pub prefixes: u64,
    /// Dimension name -> number of allocated (non-curated) codes.
    pub allocated_codes: BTreeMap<String, u64>,
}

impl StatusResponse {
    pub fn from_metrics(backend: &str, metrics: RegistryMetrics) -> Self {
        Self {
            backend: backend.to_string(),
            persons: metrics.persons,
            living: metrics.living,
            deceased: metrics.deceased,
            lineage_roots: metrics.lineage_roots,
            prefixes: metrics.prefixes,
            allocated_codes: metrics
                .allocated_codes
                .into_iter()
                .map(|(dimension, count)| (dimension.name().to_string(), count))
                .collect(),
        }
    }
}

// =============================================================================
// CODES
// =============================================================================

/// Era code request. `kind` is `generation` (birth) or `decet` (death).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraRequest {
    pub date: String,
    #[serde(default = "default_era_kind")]
    pub kind: String,
}

fn default_era_kind() -> String {
    "generation".to_string()
}

/// Era code response. `code` is empty when the date is unreadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraResponse {
    pub code: String,
}

/// Label resolution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub dimension: String,
    pub label: String,
}

/// One resolved code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeJson {
    pub dimension: Dimension,
    pub label: String,
    pub code: String,
    pub origin: CodeOrigin,
}

impl From<Resolution> for CodeJson {
    fn from(resolution: Resolution) -> Self {
        Self {
            dimension: resolution.dimension,
            label: resolution.label,
            code: resolution.code.to_string(),
            origin: resolution.origin,
        }
    }
}

/// Known codes of a dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodesResponse {
    pub dimension: Dimension,
    pub codes: Vec<CodeJson>,
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Registration request.
///
/// `kind` selects the required fields: `living` needs `birth_date` and
/// `secret`; `deceased` needs `death_date` and either `birth_date` or
/// `generation`. The secret is hashed before it reaches the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub kind: String,
    pub given_name: String,
    pub family_name: String,
    pub gender: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    pub continent: String,
    pub country: String,
    pub region: String,
    pub ethnicity: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub death_date: Option<String>,
    #[serde(default)]
    pub generation: Option<String>,
    #[serde(default)]
    pub father: Option<String>,
    #[serde(default)]
    pub mother: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl RegisterRequest {
    /// Convert to a core request, hashing the secret.
    pub fn into_registration(self) -> Result<RegistrationRequest, LineageError> {
        let birth_date = self
            .birth_date
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| read_date("birth_date", raw))
            .transpose()?;

        let vitality = match self.kind.trim().to_ascii_lowercase().as_str() {
            "living" => {
                if self.death_date.is_some() {
                    return Err(LineageError::InputValidation(
                        "a living person has no death date".to_string(),
                    ));
                }
                let secret = self.secret.as_deref().ok_or_else(|| {
                    LineageError::InputValidation(
                        "secret is required for a living person".to_string(),
                    )
                })?;
                VitalityDraft::Living {
                    credentials: Credentials::from_secret(secret)?,
                }
            }
            "deceased" => {
                if self.secret.is_some() {
                    return Err(LineageError::InputValidation(
                        "a deceased person cannot hold a secret".to_string(),
                    ));
                }
                let death = self.death_date.as_deref().ok_or_else(|| {
                    LineageError::InputValidation(
                        "death_date is required for a deceased person".to_string(),
                    )
                })?;
                VitalityDraft::Deceased {
                    death_date: read_date("death_date", death)?,
                    generation: self
                        .generation
                        .as_deref()
                        .filter(|raw| !raw.trim().is_empty())
                        .map(|raw| raw.trim().parse())
                        .transpose()?,
                }
            }
            other => {
                return Err(LineageError::InputValidation(format!(
                    "unknown kind '{}'. Use: living, deceased",
                    other
                )));
            }
        };

        Ok(RegistrationRequest {
            draft: PersonDraft {
                given_name: self.given_name,
                family_name: self.family_name,
                gender: self.gender.parse()?,
                birth_date,
                origin: OriginLabels {
                    continent: self.continent,
                    country: self.country,
                    region: self.region,
                    ethnicity: self.ethnicity,
                },
                vitality,
            },
            father: blank_to_none(self.father),
            mother: blank_to_none(self.mother),
            idempotency_key: blank_to_none(self.idempotency_key),
        })
    }
}

fn read_date(field: &str, raw: &str) -> Result<NaiveDate, LineageError> {
    parse_date(raw)
        .ok_or_else(|| LineageError::InputValidation(format!("{} '{}' is not a date", field, raw)))
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Registration response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// `registered`, `replayed` or `queued`.
    pub status: String,
    pub person: Option<PersonJson>,
    /// Outbox ticket when the request was queued.
    pub ticket: Option<String>,
    /// Labels that had no curated code.
    #[serde(default)]
    pub gaps: Vec<CodeJson>,
}

impl RegisterResponse {
    pub fn from_receipt(receipt: RegistrationReceipt) -> Self {
        Self {
            status: if receipt.replayed { "replayed" } else { "registered" }.to_string(),
            person: Some(PersonJson::from(&receipt.person)),
            ticket: None,
            gaps: receipt.gaps.into_iter().map(CodeJson::from).collect(),
        }
    }

    pub fn queued(ticket: impl ToString) -> Self {
        Self {
            status: "queued".to_string(),
            person: None,
            ticket: Some(ticket.to_string()),
            gaps: Vec::new(),
        }
    }
}

// =============================================================================
// PERSONS
// =============================================================================

/// Derived codes of a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodesJson {
    pub generation: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub decet: Option<String>,
    pub continent: String,
    pub country: String,
    pub region: String,
    pub ethnicity: String,
    pub family: String,
}

/// Public view of a person. Credentials never leave the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonJson {
    pub id: String,
    pub kind: String,
    pub given_name: String,
    pub family_name: String,
    pub gender: String,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub codes: CodesJson,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub children: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl From<&Person> for PersonJson {
    fn from(person: &Person) -> Self {
        let (death_date, decet) = match &person.vitality {
            Vitality::Living { .. } => (None, None),
            Vitality::Deceased { death_date, decet } => {
                (Some(*death_date), Some(decet.to_string()))
            }
        };
        Self {
            id: person.id.to_string(),
            kind: person.vitality.kind_name().to_string(),
            given_name: person.given_name.clone(),
            family_name: person.family_name.clone(),
            gender: format!("{:?}", person.gender).to_ascii_lowercase(),
            birth_date: person.birth_date,
            death_date,
            codes: CodesJson {
                generation: person.codes.generation.to_string(),
                decet,
                continent: person.codes.continent.to_string(),
                country: person.codes.country.to_string(),
                region: person.codes.region.to_string(),
                ethnicity: person.codes.ethnicity.to_string(),
                family: person.codes.family.to_string(),
            },
            father: person.father.as_ref().map(ToString::to_string),
            mother: person.mother.as_ref().map(ToString::to_string),
            children: person.children.iter().map(ToString::to_string).collect(),
            registered_at: person.registered_at,
        }
    }
}

/// Lineage walk query string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

/// One person found by a lineage walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageJson {
    pub depth: usize,
    pub person: PersonJson,
}

impl From<&LineageEntry> for LineageJson {
    fn from(entry: &LineageEntry) -> Self {
        Self {
            depth: entry.depth,
            person: PersonJson::from(&entry.person),
        }
    }
}

/// Children or a lineage walk from one person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativesResponse {
    pub id: String,
    pub relatives: Vec<LineageJson>,
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Login request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub id: String,
    pub secret: String,
}

/// Login response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub person: PersonJson,
}

impl From<AuthSession> for LoginResponse {
    fn from(session: AuthSession) -> Self {
        Self {
            token: session.token.to_string(),
            issued_at: session.issued_at,
            person: PersonJson::from(&session.person),
        }
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Geography query string. An absent path lists the continents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub path: String,
}

/// Children of a catalog node. `level` is absent for the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogResponse {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<GeoLevel>,
    pub entries: Vec<GeoEntry>,
}

// =============================================================================
// EXPORT RESPONSE
// =============================================================================

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub data: String, // Base64 encoded
    /// BLAKE3 hex digest of the decoded bytes.
    pub checksum: String,
    pub size: usize,
}

impl ExportResponse {
    pub fn new(data: &[u8], checksum: String) -> Self {
        Self {
            data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data),
            checksum,
            size: data.len(),
        }
    }
}
