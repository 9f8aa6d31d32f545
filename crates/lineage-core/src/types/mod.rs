//! # Core Type Definitions
//!
//! This module contains all core types for the Lineage engine:
//! - Classification dimensions and codes (`Dimension`, `ClassificationCode`)
//! - Era tokens (`EraKind`, `EraCode`)
//! - Identifiers (`Prefix`, `DisplayId`)
//! - The person record (`Person`, `Vitality`, `IdentityCodes`, `Credentials`)
//! - Error types (`LineageError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` where they are used as `BTreeMap`/`BTreeSet` keys
//! - Are validated at construction, so a value that exists is well-formed

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// TEXT NORMALIZATION
// =============================================================================

/// Trim and collapse every run of whitespace into a single ASCII space.
///
/// Applied to labels before classification lookups and to identifier text
/// before parsing.
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// CLASSIFICATION DIMENSIONS
// =============================================================================

/// A classification dimension. Each dimension owns one code letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Continent,
    Country,
    Region,
    Ethnicity,
    Family,
}

impl Dimension {
    /// All dimensions, in prefix order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Continent,
        Dimension::Country,
        Dimension::Region,
        Dimension::Ethnicity,
        Dimension::Family,
    ];

    /// The letter every code of this dimension starts with.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Continent => 'C',
            Self::Country => 'P',
            Self::Region => 'R',
            Self::Ethnicity => 'E',
            Self::Family => 'F',
        }
    }

    /// Stable lowercase name, used as a storage key.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Continent => "continent",
            Self::Country => "country",
            Self::Region => "region",
            Self::Ethnicity => "ethnicity",
            Self::Family => "family",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continent" => Ok(Self::Continent),
            "country" => Ok(Self::Country),
            "region" => Ok(Self::Region),
            "ethnicity" => Ok(Self::Ethnicity),
            "family" => Ok(Self::Family),
            other => Err(LineageError::InputValidation(format!(
                "unknown classification dimension '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// CLASSIFICATION CODE
// =============================================================================

/// A short stable token (e.g. `E3`) bound to one canonical label.
///
/// Always `letter + N` with N >= 1 and no leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClassificationCode {
    letter: char,
    number: u64,
}

impl ClassificationCode {
    /// Build the code `letter(dimension) + number`.
    pub fn new(dimension: Dimension, number: u64) -> Result<Self, LineageError> {
        if number == 0 {
            return Err(LineageError::InputValidation(format!(
                "{} code numbers start at 1",
                dimension
            )));
        }
        Ok(Self {
            letter: dimension.letter(),
            number,
        })
    }

    /// The numeric suffix.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// The leading letter.
    #[must_use]
    pub const fn letter(&self) -> char {
        self.letter
    }
}

impl fmt::Display for ClassificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter, self.number)
    }
}

impl FromStr for ClassificationCode {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || LineageError::InputValidation(format!("invalid classification code '{}'", s));
        let mut chars = s.chars();
        let letter = chars.next().ok_or_else(invalid)?;
        if !Dimension::ALL.iter().any(|d| d.letter() == letter) {
            return Err(invalid());
        }
        let digits = chars.as_str();
        let number = parse_canonical_number(digits).ok_or_else(invalid)?;
        Ok(Self { letter, number })
    }
}

impl TryFrom<String> for ClassificationCode {
    type Error = LineageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClassificationCode> for String {
    fn from(code: ClassificationCode) -> Self {
        code.to_string()
    }
}

/// Parse a positive decimal integer with no sign and no leading zeros.
pub(crate) fn parse_canonical_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0')
    {
        return None;
    }
    digits.parse().ok()
}

// =============================================================================
// ERA TOKENS
// =============================================================================

/// The two era families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EraKind {
    /// Derived from a birth date.
    Generation,
    /// Derived from a death date.
    Decet,
}

impl EraKind {
    /// One-letter marker of the token.
    #[must_use]
    pub const fn marker(self) -> char {
        match self {
            Self::Generation => 'G',
            Self::Decet => 'D',
        }
    }
}

impl FromStr for EraKind {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generation" | "g" => Ok(Self::Generation),
            "decet" | "d" => Ok(Self::Decet),
            other => Err(LineageError::InputValidation(format!(
                "unknown era kind '{}'",
                other
            ))),
        }
    }
}

/// An era token such as `G96` or `D2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EraCode {
    kind: EraKind,
    index: u16,
}

impl EraCode {
    /// Build a token; `index` must be within `1..=MAX_ERA_INDEX`.
    pub fn new(kind: EraKind, index: u16) -> Result<Self, LineageError> {
        if index == 0 || index > crate::primitives::MAX_ERA_INDEX {
            return Err(LineageError::InputValidation(format!(
                "era index {} out of range 1..={}",
                index,
                crate::primitives::MAX_ERA_INDEX
            )));
        }
        Ok(Self { kind, index })
    }

    /// Build without range validation. Callers guarantee the clamp.
    pub(crate) const fn clamped(kind: EraKind, index: u16) -> Self {
        Self { kind, index }
    }

    #[must_use]
    pub const fn kind(&self) -> EraKind {
        self.kind
    }

    #[must_use]
    pub const fn index(&self) -> u16 {
        self.index
    }
}

impl fmt::Display for EraCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.marker(), self.index)
    }
}

impl FromStr for EraCode {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LineageError::InputValidation(format!("invalid era code '{}'", s));
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let kind = match chars.next() {
            Some('G') => EraKind::Generation,
            Some('D') => EraKind::Decet,
            _ => return Err(invalid()),
        };
        let index = parse_canonical_number(chars.as_str()).ok_or_else(invalid)?;
        let index = u16::try_from(index).map_err(|_| invalid())?;
        Self::new(kind, index)
    }
}

impl TryFrom<String> for EraCode {
    type Error = LineageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EraCode> for String {
    fn from(code: EraCode) -> Self {
        code.to_string()
    }
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Concatenation of era and classification codes, no separators.
///
/// The key of a sequence counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix(String);

impl Prefix {
    /// Validate raw prefix text: non-empty ASCII letters and digits only.
    pub fn new(raw: impl Into<String>) -> Result<Self, LineageError> {
        let raw = raw.into();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(LineageError::InvalidIdentifier(format!(
                "prefix '{}' must be non-empty ASCII letters and digits",
                raw
            )));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Prefix {
    type Error = LineageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Prefix> for String {
    fn from(prefix: Prefix) -> Self {
        prefix.0
    }
}

/// The human-facing registry number: `PREFIX SEQ`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayId {
    prefix: Prefix,
    sequence: u64,
}

impl DisplayId {
    /// Build an identifier; `sequence` must be positive.
    pub fn new(prefix: Prefix, sequence: u64) -> Result<Self, LineageError> {
        if sequence == 0 {
            return Err(LineageError::InvalidIdentifier(format!(
                "sequence for prefix {} must be positive",
                prefix
            )));
        }
        Ok(Self { prefix, sequence })
    }

    #[must_use]
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.prefix, self.sequence)
    }
}

impl FromStr for DisplayId {
    type Err = LineageError;

    /// Parse after whitespace normalization: `"  G96C1P2R1E3F2   4 "` is `G96C1P2R1E3F2 4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_text(s);
        let invalid = || LineageError::InvalidIdentifier(format!("'{}' is not PREFIX SEQ", s));
        let (prefix, sequence) = normalized.split_once(' ').ok_or_else(invalid)?;
        if sequence.contains(' ') {
            return Err(invalid());
        }
        let sequence = parse_canonical_number(sequence).ok_or_else(invalid)?;
        Self::new(Prefix::new(prefix)?, sequence)
    }
}

impl TryFrom<String> for DisplayId {
    type Error = LineageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DisplayId> for String {
    fn from(id: DisplayId) -> Self {
        id.to_string()
    }
}

// =============================================================================
// PERSON
// =============================================================================

/// Gender as recorded at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl FromStr for Gender {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" | "o" => Ok(Self::Other),
            other => Err(LineageError::InputValidation(format!(
                "unknown gender '{}'",
                other
            ))),
        }
    }
}

/// An Argon2id PHC hash of a person's secret. Raw secrets are never stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub(crate) secret_hash: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

/// Living persons hold credentials; deceased persons only exist as tree nodes.
///
/// There is no transition between the two variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vitality {
    Living {
        credentials: Credentials,
    },
    Deceased {
        death_date: NaiveDate,
        decet: EraCode,
    },
}

impl Vitality {
    #[must_use]
    pub const fn is_living(&self) -> bool {
        matches!(self, Self::Living { .. })
    }

    /// `"living"` or `"deceased"`.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Living { .. } => "living",
            Self::Deceased { .. } => "deceased",
        }
    }
}

/// The derived codes that make up a person's prefix (decet lives in `Vitality`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCodes {
    pub generation: EraCode,
    pub continent: ClassificationCode,
    pub country: ClassificationCode,
    pub region: ClassificationCode,
    pub ethnicity: ClassificationCode,
    pub family: ClassificationCode,
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: DisplayId,
    pub given_name: String,
    pub family_name: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
    pub codes: IdentityCodes,
    pub vitality: Vitality,
    pub father: Option<DisplayId>,
    pub mother: Option<DisplayId>,
    /// Append-only, duplicate-free, in registration order.
    pub children: Vec<DisplayId>,
    pub registered_at: DateTime<Utc>,
}

impl Person {
    /// Explicit parents, father first.
    pub fn parents(&self) -> impl Iterator<Item = &DisplayId> {
        self.father.iter().chain(self.mother.iter())
    }

    /// A person registered without any parent.
    #[must_use]
    pub fn is_lineage_root(&self) -> bool {
        self.father.is_none() && self.mother.is_none()
    }

    /// Append a child reference unless it is already present.
    ///
    /// Returns `true` if the reference was added.
    pub fn link_child(&mut self, child: &DisplayId) -> bool {
        if self.children.contains(child) {
            return false;
        }
        self.children.push(child.clone());
        true
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Lineage engine.
///
/// - No silent failures
/// - Use `Result<T, LineageError>` for fallible operations
/// - The engine never panics; all errors must be recoverable by the caller
#[derive(Debug, Error)]
pub enum LineageError {
    /// Required input is missing or malformed.
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Text that should be a display identifier is not one.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// An explicitly supplied parent id does not resolve to a registered person.
    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    /// No person carries the requested identifier.
    #[error("Person not found: {0}")]
    PersonNotFound(String),

    /// The identifier is already taken (uniqueness constraint at persistence time).
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// A label is already bound to a different code.
    #[error("Classification conflict in {dimension}: '{label}' is {existing}, not {proposed}")]
    ClassificationConflict {
        dimension: Dimension,
        label: String,
        existing: String,
        proposed: String,
    },

    /// A code is already owned by another label of the dimension.
    #[error("Code {code} in {dimension} already belongs to '{holder}', not '{label}'")]
    CodeAlreadyAssigned {
        dimension: Dimension,
        code: String,
        holder: String,
        label: String,
    },

    /// A sequence counter cannot advance any further.
    #[error("Sequence exhausted for prefix {0}")]
    SequenceExhausted(String),

    /// The person exists only as a genealogical node and cannot log in.
    #[error("Authentication unsupported for deceased person {0}")]
    AuthenticationUnsupported(String),

    /// Wrong secret for a living person.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The registry store could not be reached or failed mid-operation.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File or socket I/O outside the registry store.
    #[error("I/O error: {0}")]
    Io(String),
}

impl LineageError {
    /// Whether retrying later (or queueing locally) can succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PersistenceUnavailable(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  Guinée \t forestière \n"), "Guinée forestière");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn classification_code_round_trip_and_rejects_padding() {
        let code: ClassificationCode = "E3".parse().expect("parse");
        assert_eq!(code.number(), 3);
        assert_eq!(code.to_string(), "E3");

        assert!("E03".parse::<ClassificationCode>().is_err());
        assert!("E0".parse::<ClassificationCode>().is_err());
        assert!("X4".parse::<ClassificationCode>().is_err());
        assert_eq!(code.letter(), Dimension::Ethnicity.letter());
    }

    #[test]
    fn era_code_bounds() {
        assert_eq!("G96".parse::<EraCode>().expect("parse").index(), 96);
        assert!("G0".parse::<EraCode>().is_err());
        assert!("D201".parse::<EraCode>().is_err());
        assert!("X1".parse::<EraCode>().is_err());
    }

    #[test]
    fn display_id_parses_normalized_text() {
        let id: DisplayId = "  G10C1P2R1E3F2   7 ".parse().expect("parse");
        assert_eq!(id.prefix().as_str(), "G10C1P2R1E3F2");
        assert_eq!(id.sequence(), 7);
        assert_eq!(id.to_string(), "G10C1P2R1E3F2 7");
    }

    #[test]
    fn display_id_rejects_malformed_text() {
        for raw in ["G10C1", "G10C1 07", "G10C1 0", "G10-C1 3", "G10C1 3 4", " 5", "G1 -2"] {
            assert!(raw.parse::<DisplayId>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn display_id_survives_postcard() {
        let id: DisplayId = "G1C1P1R1E1F1 12".parse().expect("parse");
        let bytes = postcard::to_allocvec(&id).expect("encode");
        let decoded: DisplayId = postcard::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, id);
        assert_eq!(String::from(decoded), "G1C1P1R1E1F1 12");
    }

    #[test]
    fn link_child_is_append_once() {
        let mut person = sample_person();
        let child: DisplayId = "G96C1P2R1E3F2 2".parse().expect("parse");
        assert!(person.link_child(&child));
        assert!(!person.link_child(&child));
        assert_eq!(person.children, vec![child]);
    }

    fn sample_person() -> Person {
        Person {
            id: "G95C1P2R1E3F2 1".parse().expect("parse"),
            given_name: "Mamadou".to_string(),
            family_name: "Diallo".to_string(),
            gender: Gender::Male,
            birth_date: NaiveDate::from_ymd_opt(1960, 5, 1),
            codes: IdentityCodes {
                generation: EraCode::clamped(EraKind::Generation, 95),
                continent: "C1".parse().expect("code"),
                country: "P2".parse().expect("code"),
                region: "R1".parse().expect("code"),
                ethnicity: "E3".parse().expect("code"),
                family: "F2".parse().expect("code"),
            },
            vitality: Vitality::Deceased {
                death_date: NaiveDate::from_ymd_opt(2001, 1, 1).expect("date"),
                decet: EraCode::clamped(EraKind::Decet, 93),
            },
            father: None,
            mother: None,
            children: Vec::new(),
            registered_at: Utc::now(),
        }
    }
}
