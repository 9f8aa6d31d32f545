//! # Temporal Epoch Calculator
//!
//! Pure date → era token derivation.
//!
//! `marker + clamp(floor((year − epoch) / 63) + 1, 1, 200)`
//!
//! A year exactly at `epoch + 63k` opens tranche `k + 1`. Years before the
//! epoch clamp to index 1, years past the last tranche clamp to 200.
//! Input that cannot be read as a date yields `None`: the code is simply
//! not derivable yet.

use crate::primitives::{DECET_EPOCH_YEAR, GENERATION_EPOCH_YEAR, MAX_ERA_INDEX, TRANCHE_YEARS};
use crate::{EraCode, EraKind};
use chrono::{DateTime, Datelike, NaiveDate};

/// Parameters of one era family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSpec {
    pub kind: EraKind,
    pub epoch_year: i32,
    pub tranche: u32,
    pub max_index: u16,
}

impl EpochSpec {
    /// Generation: tranches of 63 years since 4004 BCE.
    pub const GENERATION: Self = Self::new(
        EraKind::Generation,
        GENERATION_EPOCH_YEAR,
        TRANCHE_YEARS,
        MAX_ERA_INDEX,
    );

    /// Decet: tranches of 63 years since 3870 BCE.
    pub const DECET: Self = Self::new(
        EraKind::Decet,
        DECET_EPOCH_YEAR,
        TRANCHE_YEARS,
        MAX_ERA_INDEX,
    );

    /// A custom era family. `tranche` and `max_index` of zero are raised to 1.
    #[must_use]
    pub const fn new(kind: EraKind, epoch_year: i32, tranche: u32, max_index: u16) -> Self {
        Self {
            kind,
            epoch_year,
            tranche: if tranche == 0 { 1 } else { tranche },
            max_index: if max_index == 0 { 1 } else { max_index },
        }
    }

    /// The spec matching an era kind.
    #[must_use]
    pub const fn for_kind(kind: EraKind) -> Self {
        match kind {
            EraKind::Generation => Self::GENERATION,
            EraKind::Decet => Self::DECET,
        }
    }

    /// Clamped 1-based tranche index of `year`.
    #[must_use]
    pub fn index_for_year(&self, year: i32) -> u16 {
        let offset = i64::from(year) - i64::from(self.epoch_year);
        let index = offset.div_euclid(i64::from(self.tranche)) + 1;
        index.clamp(1, i64::from(self.max_index)) as u16
    }

    /// The era token for a calendar date.
    #[must_use]
    pub fn code_for(&self, date: NaiveDate) -> EraCode {
        EraCode::clamped(self.kind, self.index_for_year(date.year()))
    }

    /// The era token for date text, or `None` when the text is not a date.
    #[must_use]
    pub fn code_for_str(&self, raw: &str) -> Option<EraCode> {
        parse_date(raw).map(|date| self.code_for(date))
    }

    /// First calendar year of tranche `index`.
    #[must_use]
    pub fn first_year_of(&self, index: u16) -> i64 {
        let index = i64::from(index.clamp(1, self.max_index));
        i64::from(self.epoch_year) + (index - 1) * i64::from(self.tranche)
    }
}

/// Generation token from a birth date.
#[must_use]
pub fn generation_code(birth: NaiveDate) -> EraCode {
    EpochSpec::GENERATION.code_for(birth)
}

/// Decet token from a death date.
#[must_use]
pub fn decet_code(death: NaiveDate) -> EraCode {
    EpochSpec::DECET.code_for(death)
}

/// Generation token from birth date text; `None` if not derivable.
#[must_use]
pub fn generation_code_from_str(raw: &str) -> Option<EraCode> {
    EpochSpec::GENERATION.code_for_str(raw)
}

/// Decet token from death date text; `None` if not derivable.
#[must_use]
pub fn decet_code_from_str(raw: &str) -> Option<EraCode> {
    EpochSpec::DECET.code_for_str(raw)
}

/// Read date text.
///
/// Accepted forms:
/// - `YYYY-MM-DD`, with a signed year for dates before 1 CE (`-4003-01-01`)
/// - an RFC 3339 timestamp (`1990-04-12T08:30:00Z`), date part only
/// - a bare year (`1957`, `-3869`), read as January 1st
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(year) = trimmed.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(timestamp.date_naive());
    }

    parse_ymd(trimmed)
}

/// `[-]Y-M-D` with numeric fields.
fn parse_ymd(text: &str) -> Option<NaiveDate> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let mut fields = body.splitn(3, '-');
    let year: i32 = fields.next()?.parse().ok()?;
    let month: u32 = fields.next()?.parse().ok()?;
    let day: u32 = fields.next()?.parse().ok()?;
    let year = if negative { -year } else { year };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Every token of a kind up to `max` (capped at `MAX_ERA_INDEX`), for selection lists.
#[must_use]
pub fn list_codes(kind: EraKind, max: u16) -> Vec<EraCode> {
    (1..=max.min(MAX_ERA_INDEX))
        .map(|index| EraCode::clamped(kind, index))
        .collect()
}

/// Whole years elapsed from `from` to `to`: an age, or years since a death.
///
/// `None` when `to` precedes `from`.
#[must_use]
pub fn completed_years(from: NaiveDate, to: NaiveDate) -> Option<i32> {
    if to < from {
        return None;
    }
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    Some(years)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jan1(year: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date")
    }

    #[test]
    fn generation_tranche_boundaries() {
        assert_eq!(generation_code(jan1(-4003)).to_string(), "G1");
        assert_eq!(generation_code(jan1(-3941)).to_string(), "G1");
        assert_eq!(generation_code(jan1(-3940)).to_string(), "G2");
    }

    #[test]
    fn decet_tranche_boundaries() {
        assert_eq!(decet_code(jan1(-3869)).to_string(), "D1");
        assert_eq!(decet_code(jan1(-3807)).to_string(), "D1");
        assert_eq!(decet_code(jan1(-3806)).to_string(), "D2");
    }

    #[test]
    fn modern_dates() {
        // 1990 - (-4003) = 5993 = 63 * 95 + 8
        assert_eq!(generation_code(jan1(1990)).to_string(), "G96");
        // 2001 - (-3869) = 5870 = 63 * 93 + 11
        assert_eq!(decet_code(jan1(2001)).to_string(), "D94");
    }

    #[test]
    fn clamps_both_ends() {
        assert_eq!(generation_code(jan1(-9000)).index(), 1);
        assert_eq!(generation_code(jan1(200_000)).index(), MAX_ERA_INDEX);
    }

    #[test]
    fn custom_spec_follows_formula() {
        let spec = EpochSpec::new(EraKind::Generation, 0, 10, 5);
        assert_eq!(spec.index_for_year(0), 1);
        assert_eq!(spec.index_for_year(9), 1);
        assert_eq!(spec.index_for_year(10), 2);
        assert_eq!(spec.index_for_year(1000), 5);
        assert_eq!(spec.index_for_year(-1), 1);
    }

    #[test]
    fn first_year_matches_index() {
        let spec = EpochSpec::GENERATION;
        for index in [1u16, 2, 50, 96] {
            let year = spec.first_year_of(index) as i32;
            assert_eq!(spec.index_for_year(year), index);
            assert_eq!(spec.index_for_year(year - 1), index.saturating_sub(1).max(1));
        }
    }

    #[test]
    fn parse_date_forms() {
        assert_eq!(parse_date("1990-04-12"), NaiveDate::from_ymd_opt(1990, 4, 12));
        assert_eq!(parse_date("1957"), NaiveDate::from_ymd_opt(1957, 1, 1));
        assert_eq!(parse_date("-3869"), NaiveDate::from_ymd_opt(-3869, 1, 1));
        assert_eq!(parse_date("-4003-06-30"), NaiveDate::from_ymd_opt(-4003, 6, 30));
        assert_eq!(
            parse_date("2010-02-03T23:15:00+00:00"),
            NaiveDate::from_ymd_opt(2010, 2, 3)
        );
    }

    #[test]
    fn unparseable_dates_are_not_derivable() {
        for raw in ["", "   ", "yesterday", "1990-13-01", "1990-02-30", "12/04/1990"] {
            assert_eq!(generation_code_from_str(raw), None, "{raw}");
            assert_eq!(decet_code_from_str(raw), None, "{raw}");
        }
    }

    #[test]
    fn list_codes_caps_at_max() {
        let codes = list_codes(EraKind::Decet, 500);
        assert_eq!(codes.len(), usize::from(MAX_ERA_INDEX));
        assert_eq!(codes[0].to_string(), "D1");
        assert_eq!(codes[199].to_string(), "D200");
    }

    #[test]
    fn completed_years_respects_anniversary() {
        let birth = NaiveDate::from_ymd_opt(1990, 6, 15).expect("date");
        let before = NaiveDate::from_ymd_opt(2020, 6, 14).expect("date");
        let on = NaiveDate::from_ymd_opt(2020, 6, 15).expect("date");
        assert_eq!(completed_years(birth, before), Some(29));
        assert_eq!(completed_years(birth, on), Some(30));
        assert_eq!(completed_years(on, birth), None);
    }
}
