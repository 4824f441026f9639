//! Completion reconciliation.
//!
//! A completed visit appends one service event and moves the contract's due
//! date to `completion date + cadence`. Both writes go through
//! [`CompletionLedger::commit_completion`], so they land together or not at
//! all.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dates::{add_cadence, parse_date};
use crate::clock::Clock;
use crate::contract::{Contract, ContractClass, ServiceEvent, ServiceOutcome};
use crate::error::{CoreError, Result};
use crate::storage::{CompletionLedger, ContractStore};

/// Technician recorded when neither the caller nor the contract names one.
pub const FALLBACK_TECHNICIAN: &str = "System User";

/// A completed maintenance visit to record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub contract_id: String,
    pub class: Option<ContractClass>,
    /// Free-form date or date-time. Unparseable values fall back to now.
    pub completion_date: Option<String>,
    pub technician: Option<String>,
    pub service_report: Option<String>,
    pub sr_number: Option<String>,
}

impl CompletionRequest {
    pub fn new(contract_id: impl Into<String>, class: ContractClass) -> Self {
        Self {
            contract_id: contract_id.into(),
            class: Some(class),
            ..Self::default()
        }
    }

    pub fn completed_on(mut self, date: impl Into<String>) -> Self {
        self.completion_date = Some(date.into());
        self
    }

    pub fn technician(mut self, name: impl Into<String>) -> Self {
        self.technician = Some(name.into());
        self
    }
}

/// Result of a recorded completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub next_due_date: NaiveDate,
    pub event_id: String,
    pub service_date: NaiveDate,
}

/// Resolve the date a visit happened, substituting today when the input is
/// missing or garbage.
fn resolve_completion_date(raw: Option<&str>, now: DateTime<Utc>) -> NaiveDate {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => now.date_naive(),
        Some(s) => parse_date(s).unwrap_or_else(|| {
            tracing::warn!(input = s, "unparseable completion date, using current date");
            now.date_naive()
        }),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// `SR-YYYYMMDD-XXXXXXXX` from the service date and the contract id.
pub fn default_sr_number(service_date: NaiveDate, contract_id: &str) -> String {
    let prefix: String = contract_id.chars().take(8).collect();
    format!(
        "SR-{}-{}",
        service_date.format("%Y%m%d"),
        prefix.to_uppercase()
    )
}

/// Records completed visits against a store.
pub struct CompletionReconciler<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S> CompletionReconciler<'a, S>
where
    S: ContractStore + CompletionLedger + ?Sized,
{
    pub fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Record a completed visit and advance the contract's due date.
    ///
    /// # Errors
    /// - `NotFound` if the contract does not exist or is of another class.
    ///   No service event is written.
    /// - Any store error from the atomic commit. Neither write is kept.
    pub fn record_completion(&self, request: &CompletionRequest) -> Result<CompletionOutcome> {
        let contract = self.store.fetch_contract(&request.contract_id)?;
        let class = request.class.unwrap_or(contract.class);
        if class != contract.class {
            return Err(CoreError::not_found(
                format!("{class} contract"),
                &request.contract_id,
            ));
        }

        let now = self.clock.now();
        let service_date = resolve_completion_date(request.completion_date.as_deref(), now);
        let next_due = add_cadence(service_date, class).ok_or_else(|| {
            CoreError::invalid_input(format!("due date after {service_date} is out of range"))
        })?;

        let event = self.build_event(&contract, request, service_date, now);
        match self.store.commit_completion(&event, next_due, now) {
            Ok(event_id) => {
                tracing::info!(
                    contract_id = %contract.id,
                    sq = %contract.sq,
                    %service_date,
                    %next_due,
                    "PMS completion recorded"
                );
                Ok(CompletionOutcome {
                    next_due_date: next_due,
                    event_id,
                    service_date,
                })
            }
            Err(e @ CoreError::NotFound { .. }) => Err(e),
            Err(e) => {
                tracing::error!(
                    contract_id = %contract.id,
                    "completion commit failed, history and due date left unchanged: {e}"
                );
                Err(e)
            }
        }
    }

    fn build_event(
        &self,
        contract: &Contract,
        request: &CompletionRequest,
        service_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> ServiceEvent {
        let technician = non_blank(request.technician.as_deref())
            .or_else(|| non_blank(Some(contract.technical_specialist.as_str())))
            .unwrap_or(FALLBACK_TECHNICIAN)
            .to_string();
        let service_report = non_blank(request.service_report.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("PMS service completed by {technician}"));
        let sr_number = non_blank(request.sr_number.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| default_sr_number(service_date, &contract.id));

        ServiceEvent {
            id: Uuid::new_v4().to_string(),
            contract_id: contract.id.clone(),
            contract_class: contract.class,
            service_date,
            service_type: "PMS".to_string(),
            description: format!("PMS completed for {}", contract.display_name()),
            technician,
            outcome: ServiceOutcome::Completed,
            service_report: Some(service_report),
            sr_number: Some(sr_number),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::contract::NewContract;
    use crate::storage::{HistoryStore, PmsDb};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn label_contract(db: &PmsDb) -> Contract {
        let mut new = NewContract::new(ContractClass::Label, "Acme Foods");
        new.next_due_date = Some(d(2024, 1, 1));
        new.technical_specialist = "Rosa".into();
        db.create_contract(&new, d(2023, 12, 1).and_hms_opt(0, 0, 0).unwrap().and_utc())
            .unwrap()
    }

    #[test]
    fn late_label_visit_resets_from_completion_date() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 1, 20));
        let contract = label_contract(&db);

        let request =
            CompletionRequest::new(&contract.id, ContractClass::Label).completed_on("2024-01-15");
        let outcome = CompletionReconciler::new(&db, &clock)
            .record_completion(&request)
            .unwrap();

        assert_eq!(outcome.service_date, d(2024, 1, 15));
        assert_eq!(outcome.next_due_date, d(2024, 2, 14));
        assert_eq!(
            db.fetch_contract(&contract.id).unwrap().next_due_date,
            Some(d(2024, 2, 14))
        );
    }

    #[test]
    fn defaults_follow_contract_fields() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 1, 20));
        let contract = label_contract(&db);

        let request = CompletionRequest::new(&contract.id, ContractClass::Label)
            .completed_on("2024-01-15T10:30:00Z");
        let outcome = CompletionReconciler::new(&db, &clock)
            .record_completion(&request)
            .unwrap();

        let event = db.latest_completion(&contract.id).unwrap().unwrap();
        assert_eq!(event.id, outcome.event_id);
        assert_eq!(event.technician, "Rosa");
        assert_eq!(event.service_report.as_deref(), Some("PMS service completed by Rosa"));
        assert_eq!(
            event.description,
            format!("PMS completed for {} - Acme Foods", contract.sq)
        );
        let expected_sr = format!(
            "SR-20240115-{}",
            contract.id[..8].to_uppercase()
        );
        assert_eq!(event.sr_number.as_deref(), Some(expected_sr.as_str()));
    }

    #[test]
    fn technician_falls_back_to_system_user() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 3, 1));
        let contract = db
            .create_contract(
                &NewContract::new(ContractClass::Hardware, "Initech"),
                clock.now(),
            )
            .unwrap();

        CompletionReconciler::new(&db, &clock)
            .record_completion(&CompletionRequest::new(&contract.id, ContractClass::Hardware))
            .unwrap();
        let event = db.latest_completion(&contract.id).unwrap().unwrap();
        assert_eq!(event.technician, FALLBACK_TECHNICIAN);
    }

    #[test]
    fn garbage_date_falls_back_to_clock() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 5, 10));
        let contract = label_contract(&db);

        let request =
            CompletionRequest::new(&contract.id, ContractClass::Label).completed_on("last tuesday");
        let outcome = CompletionReconciler::new(&db, &clock)
            .record_completion(&request)
            .unwrap();
        assert_eq!(outcome.service_date, d(2024, 5, 10));
        assert_eq!(outcome.next_due_date, d(2024, 6, 9));
    }

    #[test]
    fn missing_contract_writes_nothing() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 1, 1));

        let err = CompletionReconciler::new(&db, &clock)
            .record_completion(&CompletionRequest::new("no-such-id", ContractClass::Hardware))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(db.count_service_events_with_outcome(ServiceOutcome::Completed).unwrap(), 0);
    }

    #[test]
    fn wrong_class_is_not_found() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 1, 20));
        let contract = label_contract(&db);

        let err = CompletionReconciler::new(&db, &clock)
            .record_completion(&CompletionRequest::new(&contract.id, ContractClass::Hardware))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(db.count_service_events_with_outcome(ServiceOutcome::Completed).unwrap(), 0);
    }

    #[test]
    fn sr_number_uses_first_eight_chars() {
        assert_eq!(
            default_sr_number(d(2024, 7, 4), "ab12cd34-ef56"),
            "SR-20240704-AB12CD34"
        );
        assert_eq!(default_sr_number(d(2024, 7, 4), "abc"), "SR-20240704-ABC");
    }
}
