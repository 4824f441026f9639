//! Full-term maintenance calendar for a contract.
//!
//! Read-only projection used by report and export views: every due date
//! from the anchor (exclusive) up to the end date (inclusive), stepping by
//! the class cadence.

use std::iter::FusedIterator;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::dates::{add_cadence, cadence_days, parse_optional_date};
use crate::contract::{Contract, ContractClass};

/// Lazy iterator over a contract's due dates.
///
/// Cloning restarts nothing; it forks the iteration at its current point.
/// Call [`schedule_between`] again for a fresh pass.
#[derive(Debug, Clone)]
pub struct ScheduleIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
    class: ContractClass,
}

impl ScheduleIter {
    fn empty() -> Self {
        Self {
            next: None,
            end: NaiveDate::MIN,
            class: ContractClass::Unrecognized,
        }
    }

    /// Number of dates still to be yielded.
    pub fn remaining(&self) -> usize {
        match self.next {
            Some(next) if next <= self.end => {
                let span = (self.end - next).num_days() as u64;
                (span / cadence_days(self.class)) as usize + 1
            }
            _ => 0,
        }
    }
}

impl Iterator for ScheduleIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next.filter(|date| *date <= self.end)?;
        self.next = add_cadence(current, self.class);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for ScheduleIter {}

impl FusedIterator for ScheduleIter {}

/// Due dates strictly after `anchor` and no later than `end`.
pub fn schedule_between(anchor: NaiveDate, end: NaiveDate, class: ContractClass) -> ScheduleIter {
    ScheduleIter {
        next: add_cadence(anchor, class),
        end,
        class,
    }
}

/// Schedule projection from boundary strings.
///
/// Missing or unparseable dates yield an empty schedule rather than an error.
pub fn generate_schedule(
    anchor: Option<&str>,
    end: Option<&str>,
    class: ContractClass,
) -> ScheduleIter {
    match (parse_optional_date(anchor), parse_optional_date(end)) {
        (Ok(anchor), Ok(end)) => schedule_between(anchor, end, class),
        _ => ScheduleIter::empty(),
    }
}

/// One projected due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// 1-based visit number within the contract term.
    pub visit: usize,
    pub due_date: NaiveDate,
}

/// A contract's complete calendar, shaped for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSchedule {
    pub contract_id: String,
    pub class: ContractClass,
    pub contract_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub entries: Vec<ScheduleEntry>,
    pub total: usize,
}

impl ContractSchedule {
    pub fn for_contract(contract: &Contract) -> Self {
        let term = (contract.contract_date, contract.contract_end_date);
        let entries: Vec<ScheduleEntry> = match term {
            (Some(anchor), Some(end)) => schedule_between(anchor, end, contract.class)
                .enumerate()
                .map(|(idx, due_date)| ScheduleEntry {
                    visit: idx + 1,
                    due_date,
                })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            contract_id: contract.id.clone(),
            class: contract.class,
            contract_date: contract.contract_date,
            end_date: contract.contract_end_date,
            total: entries.len(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn hardware_year_has_four_visits() {
        let dates: Vec<_> =
            schedule_between(d(2024, 1, 1), d(2024, 12, 31), ContractClass::Hardware).collect();
        assert_eq!(
            dates,
            vec![d(2024, 3, 31), d(2024, 6, 29), d(2024, 9, 27), d(2024, 12, 26)]
        );
    }

    #[test]
    fn end_date_is_inclusive() {
        let dates: Vec<_> =
            schedule_between(d(2024, 1, 1), d(2024, 1, 31), ContractClass::Label).collect();
        assert_eq!(dates, vec![d(2024, 1, 31)]);
    }

    #[test]
    fn end_before_anchor_is_empty() {
        let iter = schedule_between(d(2024, 6, 1), d(2024, 1, 1), ContractClass::Label);
        assert_eq!(iter.len(), 0);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn boundary_schedule_degrades_to_empty() {
        assert_eq!(generate_schedule(None, Some("2024-12-31"), ContractClass::Label).count(), 0);
        assert_eq!(generate_schedule(Some("2024-01-01"), None, ContractClass::Label).count(), 0);
        assert_eq!(
            generate_schedule(Some("garbage"), Some("2024-12-31"), ContractClass::Label).count(),
            0
        );
    }

    #[test]
    fn boundary_schedule_accepts_datetimes() {
        let dates: Vec<_> = generate_schedule(
            Some("2024-01-01T00:00:00Z"),
            Some("2024-12-31T00:00:00"),
            ContractClass::Hardware,
        )
        .collect();
        assert_eq!(dates.len(), 4);
    }

    #[test]
    fn len_matches_collected_count() {
        let iter = schedule_between(d(2023, 3, 14), d(2026, 3, 14), ContractClass::Label);
        let expected = iter.len();
        assert_eq!(iter.clone().count(), expected);
        assert_eq!(expected, ((d(2026, 3, 14) - d(2023, 3, 14)).num_days() / 30) as usize);
    }

    #[test]
    fn near_calendar_end_stops_without_panicking() {
        let dates: Vec<_> =
            schedule_between(d(262_142, 1, 1), NaiveDate::MAX, ContractClass::Hardware).collect();
        assert!(!dates.is_empty());
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn contract_schedule_numbers_visits() {
        let now = chrono::Utc::now();
        let contract = Contract {
            id: "c-1".into(),
            class: ContractClass::Label,
            sq: "1".into(),
            end_user: "Acme".into(),
            equipment_ref: "LBL-9".into(),
            serial: "S1".into(),
            branch: "North".into(),
            technical_specialist: "Rae".into(),
            po_number: "PO-1".into(),
            contract_date: Some(d(2024, 1, 1)),
            contract_end_date: Some(d(2024, 4, 1)),
            next_due_date: None,
            last_reminded_on: None,
            status: Default::default(),
            created_at: now,
            updated_at: now,
        };
        let schedule = ContractSchedule::for_contract(&contract);
        assert_eq!(schedule.total, 3);
        assert_eq!(schedule.entries[0].visit, 1);
        assert_eq!(schedule.entries[2].due_date, d(2024, 3, 31));
    }
}
