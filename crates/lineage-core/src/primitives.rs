//! # Innate Primitives
//!
//! Hardcoded runtime constants for the Lineage engine.
//!
//! These values are part of the identifier scheme itself: changing any of
//! the epoch constants re-labels every person already registered, so they
//! are compiled in and immutable at runtime.

/// Length of one era tranche in years.
pub const TRANCHE_YEARS: u32 = 63;

/// Highest era index; later years clamp to it.
pub const MAX_ERA_INDEX: u16 = 200;

/// Generation epoch: 4004 BCE in astronomical year numbering.
pub const GENERATION_EPOCH_YEAR: i32 = -4003;

/// Decet epoch: 3870 BCE in astronomical year numbering.
pub const DECET_EPOCH_YEAR: i32 = -3869;

/// Magic bytes for the registry snapshot header.
///
/// - File Header = Magic Bytes ("LNGE") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"LNGE";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 2;

/// Maximum ancestry / descent depth for lineage queries.
///
/// All queries must be computationally bounded.
pub const MAX_LINEAGE_DEPTH: usize = 64;

/// How many identifiers a registration mints before giving up on
/// `DuplicateIdentifier`.
pub const MAX_IDENTIFIER_ATTEMPTS: usize = 5;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for given and family names, in bytes.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum length for classification labels, in bytes.
pub const MAX_LABEL_LENGTH: usize = 128;

/// Minimum secret length for living persons.
pub const MIN_SECRET_LENGTH: usize = 6;

/// Maximum length of an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_are_astronomical_years() {
        // 4004 BCE and 3870 BCE, with year 0 = 1 BCE
        assert_eq!(GENERATION_EPOCH_YEAR, 1 - 4004);
        assert_eq!(DECET_EPOCH_YEAR, 1 - 3870);
    }

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"LNGE");
    }
}
