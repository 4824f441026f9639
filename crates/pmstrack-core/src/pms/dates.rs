//! PMS date arithmetic.
//!
//! Pure functions turning an anchor date and a contract class into due
//! dates. Boundary helpers accept the ISO-8601 strings callers send and keep
//! "absent" distinct from "unparseable".

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};

use crate::contract::ContractClass;
use crate::error::{CoreError, Result};

/// Hardware contracts are serviced every 3 months.
pub const HARDWARE_CADENCE_DAYS: u64 = 90;

/// Label contracts are serviced monthly.
pub const LABEL_CADENCE_DAYS: u64 = 30;

/// Cadence for any class that is not hardware or label.
pub const DEFAULT_CADENCE_DAYS: u64 = 30;

/// Days between successive due dates for a class.
pub fn cadence_days(class: ContractClass) -> u64 {
    match class {
        ContractClass::Hardware => HARDWARE_CADENCE_DAYS,
        ContractClass::Label => LABEL_CADENCE_DAYS,
        // Unknown classes schedule monthly.
        ContractClass::Unrecognized => DEFAULT_CADENCE_DAYS,
    }
}

/// `date + cadence_days(class)`, or `None` past the end of the calendar.
pub fn add_cadence(date: NaiveDate, class: ContractClass) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(cadence_days(class)))
}

/// First due date after a contract's anchor date.
///
/// # Errors
/// `InvalidInput` if the anchor is absent or the result overflows.
pub fn next_due_from_anchor(anchor: Option<NaiveDate>, class: ContractClass) -> Result<NaiveDate> {
    let anchor = anchor.ok_or_else(|| CoreError::invalid_input("anchor date is required"))?;
    add_cadence(anchor, class)
        .ok_or_else(|| CoreError::invalid_input(format!("due date after {anchor} is out of range")))
}

/// Due date following `current_due`, falling back to the anchor when there
/// is no current due date.
///
/// # Errors
/// `InvalidInput` if both dates are absent or the result overflows.
pub fn next_due_from_schedule(
    current_due: Option<NaiveDate>,
    anchor: Option<NaiveDate>,
    class: ContractClass,
) -> Result<NaiveDate> {
    match current_due {
        Some(current) => add_cadence(current, class).ok_or_else(|| {
            CoreError::invalid_input(format!("due date after {current} is out of range"))
        }),
        None => next_due_from_anchor(anchor, class),
    }
}

/// Why a boundary date could not be turned into a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateInputError {
    #[error("date is missing")]
    Missing,
    #[error("unparseable date '{0}'")]
    Unparseable(String),
}

impl From<DateInputError> for CoreError {
    fn from(err: DateInputError) -> Self {
        CoreError::InvalidInput(err.to_string())
    }
}

/// Parse an ISO-8601 date or date-time into the calendar date it names.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 date-times (`Z` or an offset) and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (a space separator is also accepted). The
/// offset is not applied; the date is taken as written.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
}

/// Parse an optional boundary date, reporting absence and garbage separately.
/// Blank strings count as absent.
pub fn parse_optional_date(raw: Option<&str>) -> std::result::Result<NaiveDate, DateInputError> {
    match raw.map(str::trim) {
        None | Some("") => Err(DateInputError::Missing),
        Some(s) => parse_date(s).ok_or_else(|| DateInputError::Unparseable(s.to_string())),
    }
}

/// Next due date from a boundary string.
///
/// # Errors
/// `InvalidInput` if the anchor is absent or unparseable; never defaults.
pub fn compute_next_due(anchor: Option<&str>, class: ContractClass) -> Result<NaiveDate> {
    let anchor = parse_optional_date(anchor)?;
    next_due_from_anchor(Some(anchor), class)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn cadence_by_class() {
        assert_eq!(cadence_days(ContractClass::Hardware), 90);
        assert_eq!(cadence_days(ContractClass::Label), 30);
        assert_eq!(cadence_days(ContractClass::Unrecognized), 30);
    }

    #[test]
    fn next_due_from_anchor_adds_cadence() {
        let anchor = d(2024, 1, 1);
        assert_eq!(
            next_due_from_anchor(Some(anchor), ContractClass::Hardware).unwrap(),
            d(2024, 3, 31)
        );
        assert_eq!(
            next_due_from_anchor(Some(anchor), ContractClass::Label).unwrap(),
            d(2024, 1, 31)
        );
    }

    #[test]
    fn missing_anchor_is_invalid_input() {
        let err = next_due_from_anchor(None, ContractClass::Hardware).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn schedule_advance_prefers_current_due() {
        let next = next_due_from_schedule(
            Some(d(2024, 5, 1)),
            Some(d(2024, 1, 1)),
            ContractClass::Label,
        )
        .unwrap();
        assert_eq!(next, d(2024, 5, 31));
    }

    #[test]
    fn schedule_advance_falls_back_to_anchor() {
        let next =
            next_due_from_schedule(None, Some(d(2024, 1, 1)), ContractClass::Hardware).unwrap();
        assert_eq!(next, d(2024, 3, 31));
    }

    #[test]
    fn parse_date_accepts_common_iso_shapes() {
        assert_eq!(parse_date("2024-01-15"), Some(d(2024, 1, 15)));
        assert_eq!(parse_date("2024-01-15T10:30:00Z"), Some(d(2024, 1, 15)));
        assert_eq!(parse_date("2024-01-15T23:30:00+08:00"), Some(d(2024, 1, 15)));
        assert_eq!(parse_date("2024-01-15T10:30:00.123456"), Some(d(2024, 1, 15)));
        assert_eq!(parse_date("2024-01-15 10:30:00"), Some(d(2024, 1, 15)));
        assert_eq!(parse_date("15/01/2024"), None);
    }

    #[test]
    fn absent_and_unparseable_are_distinct() {
        assert_eq!(parse_optional_date(None), Err(DateInputError::Missing));
        assert_eq!(parse_optional_date(Some("  ")), Err(DateInputError::Missing));
        assert_eq!(
            parse_optional_date(Some("next tuesday")),
            Err(DateInputError::Unparseable("next tuesday".into()))
        );
    }

    #[test]
    fn compute_next_due_rejects_garbage() {
        assert!(compute_next_due(Some("not-a-date"), ContractClass::Label).is_err());
        assert!(compute_next_due(None, ContractClass::Label).is_err());
        assert_eq!(
            compute_next_due(Some("2024-02-01"), ContractClass::Unrecognized).unwrap(),
            d(2024, 3, 2)
        );
    }

    #[test]
    fn overflow_is_reported_not_panicked() {
        assert!(next_due_from_anchor(Some(NaiveDate::MAX), ContractClass::Hardware).is_err());
    }
}
