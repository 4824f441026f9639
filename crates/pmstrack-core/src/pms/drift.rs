//! Drift between service history and due dates.
//!
//! A contract drifts when its most recently recorded completed visit implies
//! a later due date than the one stored. Legacy data written without the atomic
//! completion commit can end up like this when the second write was lost.
//! Detection only reports; repair is an explicit compensating write.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::dates::add_cadence;
use crate::contract::{Contract, ContractClass, ContractPatch, ContractStatus, ServiceEvent};
use crate::error::{CoreError, Result};
use crate::storage::{ContractStore, HistoryStore};

/// One drifted contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftFinding {
    pub contract_id: String,
    pub class: ContractClass,
    pub sq: String,
    pub last_service_date: NaiveDate,
    /// Due date currently stored on the contract.
    pub recorded_next_due: Option<NaiveDate>,
    /// `last_service_date + cadence`.
    pub expected_next_due: NaiveDate,
}

impl DriftFinding {
    /// Compare a contract with its latest completion.
    pub fn check(contract: &Contract, latest: &ServiceEvent) -> Option<Self> {
        let expected = add_cadence(latest.service_date, contract.class)?;
        let drifted = match contract.next_due_date {
            Some(recorded) => recorded < expected,
            None => true,
        };
        drifted.then(|| DriftFinding {
            contract_id: contract.id.clone(),
            class: contract.class,
            sq: contract.sq.clone(),
            last_service_date: latest.service_date,
            recorded_next_due: contract.next_due_date,
            expected_next_due: expected,
        })
    }

    pub fn to_error(&self) -> CoreError {
        let recorded = self
            .recorded_next_due
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string());
        CoreError::Inconsistency {
            contract_id: self.contract_id.clone(),
            detail: format!(
                "last service {} implies next due {}, but {} is recorded",
                self.last_service_date, self.expected_next_due, recorded
            ),
        }
    }
}

/// Outcome of a drift check, optionally with repairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSummary {
    pub checked: usize,
    pub findings: Vec<DriftFinding>,
    pub repaired: usize,
    pub failed: usize,
    pub checked_at: DateTime<Utc>,
}

impl DriftSummary {
    pub fn has_drift(&self) -> bool {
        !self.findings.is_empty()
    }

    pub fn message(&self) -> String {
        if self.findings.is_empty() {
            format!("Checked {} contract(s), no drift found.", self.checked)
        } else if self.repaired == 0 && self.failed == 0 {
            format!(
                "Found {} drifted contract(s) out of {}.",
                self.findings.len(),
                self.checked
            )
        } else {
            format!(
                "Repaired {} of {} drifted contract(s).",
                self.repaired,
                self.findings.len()
            )
        }
    }
}

/// Scan every non-expired contract for drift. Each finding is logged as an
/// inconsistency.
pub fn detect_drift<S>(store: &S, now: DateTime<Utc>) -> Result<DriftSummary>
where
    S: ContractStore + HistoryStore + ?Sized,
{
    let mut checked = 0;
    let mut findings = Vec::new();

    for class in ContractClass::STORED {
        for contract in store.fetch_contracts_by_status(class, ContractStatus::Expired)? {
            checked += 1;
            let Some(latest) = store.latest_completion(&contract.id)? else {
                continue;
            };
            if let Some(finding) = DriftFinding::check(&contract, &latest) {
                tracing::error!("{}", finding.to_error());
                findings.push(finding);
            }
        }
    }

    Ok(DriftSummary {
        checked,
        findings,
        repaired: 0,
        failed: 0,
        checked_at: now,
    })
}

/// Advance each drifted contract to its expected due date.
///
/// # Errors
/// `PartialFailure` if any contract could not be updated.
pub fn repair_drift<S>(store: &S, summary: &mut DriftSummary) -> Result<()>
where
    S: ContractStore + ?Sized,
{
    for finding in &summary.findings {
        match store.update_contract_fields(
            &finding.contract_id,
            &ContractPatch::next_due(finding.expected_next_due),
        ) {
            Ok(_) => {
                summary.repaired += 1;
                tracing::info!(
                    contract_id = %finding.contract_id,
                    next_due = %finding.expected_next_due,
                    "drifted due date repaired"
                );
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(contract_id = %finding.contract_id, "drift repair failed: {e}");
            }
        }
    }

    if summary.failed > 0 {
        return Err(CoreError::PartialFailure {
            operation: "drift repair".into(),
            succeeded: summary.repaired,
            failed: summary.failed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{NewContract, ServiceOutcome};
    use crate::storage::PmsDb;
    use crate::clock::Clock;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn now() -> DateTime<Utc> {
        d(2024, 6, 1).and_hms_opt(0, 0, 0).unwrap().and_utc()
    }

    fn event_for(contract: &Contract, service_date: NaiveDate) -> ServiceEvent {
        ServiceEvent {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract.id.clone(),
            contract_class: contract.class,
            service_date,
            service_type: "PMS".into(),
            description: "legacy".into(),
            technician: "Tech".into(),
            outcome: ServiceOutcome::Completed,
            service_report: None,
            sr_number: None,
            created_at: now(),
        }
    }

    fn hardware_due(db: &PmsDb, due: NaiveDate) -> Contract {
        let mut new = NewContract::new(ContractClass::Hardware, "Acme");
        new.next_due_date = Some(due);
        db.create_contract(&new, now()).unwrap()
    }

    #[test]
    fn check_flags_lagging_due_date() {
        let db = PmsDb::open_memory().unwrap();
        let contract = hardware_due(&db, d(2024, 3, 1));
        let event = event_for(&contract, d(2024, 3, 5));
        let finding = DriftFinding::check(&contract, &event).unwrap();
        assert_eq!(finding.expected_next_due, d(2024, 6, 3));
        assert!(matches!(finding.to_error(), CoreError::Inconsistency { .. }));
    }

    #[test]
    fn check_accepts_consistent_contract() {
        let db = PmsDb::open_memory().unwrap();
        let contract = hardware_due(&db, d(2024, 6, 3));
        assert!(DriftFinding::check(&contract, &event_for(&contract, d(2024, 3, 5))).is_none());
    }

    #[test]
    fn detect_then_repair() {
        let db = PmsDb::open_memory().unwrap();
        let drifted = hardware_due(&db, d(2024, 3, 1));
        let fine = hardware_due(&db, d(2024, 9, 1));
        let expired = hardware_due(&db, d(2024, 1, 1));
        db.set_contract_status(&expired.id, ContractStatus::Expired).unwrap();

        db.append_service_event(&event_for(&drifted, d(2024, 3, 5))).unwrap();
        db.append_service_event(&event_for(&fine, d(2024, 3, 5))).unwrap();
        db.append_service_event(&event_for(&expired, d(2024, 3, 5))).unwrap();

        let mut summary = detect_drift(&db, now()).unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.findings.len(), 1);
        assert_eq!(summary.findings[0].contract_id, drifted.id);

        repair_drift(&db, &mut summary).unwrap();
        assert_eq!(summary.repaired, 1);
        assert_eq!(
            db.fetch_contract(&drifted.id).unwrap().next_due_date,
            Some(d(2024, 6, 3))
        );
        assert!(!detect_drift(&db, now()).unwrap().has_drift());
    }

    #[test]
    fn back_dated_completion_is_not_drift() {
        use crate::clock::FixedClock;
        use crate::pms::{CompletionReconciler, CompletionRequest};

        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 3, 12));
        let mut new = NewContract::new(ContractClass::Label, "Acme");
        new.next_due_date = Some(d(2024, 3, 10));
        let contract = db.create_contract(&new, clock.now()).unwrap();

        let reconciler = CompletionReconciler::new(&db, &clock);
        for date in ["2024-03-10", "2024-03-01"] {
            let request =
                CompletionRequest::new(&contract.id, ContractClass::Label).completed_on(date);
            reconciler.record_completion(&request).unwrap();
            clock.advance(chrono::Duration::minutes(5));
        }
        assert_eq!(
            db.fetch_contract(&contract.id).unwrap().next_due_date,
            Some(d(2024, 3, 31))
        );

        let mut summary = detect_drift(&db, clock.now()).unwrap();
        assert!(!summary.has_drift());
        repair_drift(&db, &mut summary).unwrap();
        assert_eq!(
            db.fetch_contract(&contract.id).unwrap().next_due_date,
            Some(d(2024, 3, 31))
        );
    }
}
