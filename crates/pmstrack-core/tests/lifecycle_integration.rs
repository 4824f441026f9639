//! End-to-end scenarios over the SQLite store: contract creation,
//! completion, sweeps, SQ repair and drift.

use chrono::{Duration, NaiveDate};
use pmstrack_core::contract::NewContract;
use pmstrack_core::lifecycle::{LifecycleMonitor, SweepSettings};
use pmstrack_core::pms::{detect_drift, repair_drift, CompletionReconciler, CompletionRequest};
use pmstrack_core::storage::{CompletionLedger, ContractStore, HistoryStore, PmsDb};
use pmstrack_core::{
    Clock, ContractClass, ContractStatus, CoreError, FixedClock, Role, ServiceEvent,
    ServiceOutcome,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn seeded_db(clock: &FixedClock) -> PmsDb {
    let db = PmsDb::open_memory().unwrap();
    db.create_user("admin@example.com", "Ada", Role::Admin, clock.now())
        .unwrap();
    db.create_user("tech@example.com", "Ted", Role::Technician, clock.now())
        .unwrap();
    db.create_user("viewer@example.com", "Val", Role::Viewer, clock.now())
        .unwrap();
    db
}

fn settings() -> SweepSettings {
    SweepSettings::default().with_holder("integration")
}

fn create(
    db: &PmsDb,
    clock: &FixedClock,
    class: ContractClass,
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    let new = NewContract::new(class, "Northwind").with_term(start, end);
    let contract = db.create_contract(&new, clock.now()).unwrap();
    clock.advance(Duration::seconds(1));
    contract.id
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn label_contract_completed_late_moves_due_date_from_completion() {
    let clock = FixedClock::at_date(d(2023, 12, 2));
    let db = seeded_db(&clock);
    let id = create(&db, &clock, ContractClass::Label, d(2023, 12, 2), d(2024, 12, 1));
    assert_eq!(db.fetch_contract(&id).unwrap().next_due_date, Some(d(2024, 1, 1)));

    clock.set(d(2024, 1, 16).and_hms_opt(9, 0, 0).unwrap().and_utc());
    let request = CompletionRequest::new(&id, ContractClass::Label).completed_on("2024-01-15");
    let outcome = CompletionReconciler::new(&db, &clock)
        .record_completion(&request)
        .unwrap();

    assert_eq!(outcome.next_due_date, d(2024, 2, 14));
    assert_eq!(db.list_service_events(&id).unwrap().len(), 1);
}

#[test]
fn completion_for_unknown_contract_leaves_no_history() {
    let clock = FixedClock::at_date(d(2024, 1, 1));
    let db = seeded_db(&clock);

    let err = CompletionReconciler::new(&db, &clock)
        .record_completion(&CompletionRequest::new("missing", ContractClass::Label))
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound { .. }));
    assert_eq!(
        db.count_service_events_with_outcome(ServiceOutcome::Completed).unwrap(),
        0
    );
}

#[test]
fn crash_between_writes_keeps_history_and_due_date_in_step() {
    let clock = FixedClock::at_date(d(2024, 1, 1));
    let db = seeded_db(&clock);
    let id = create(&db, &clock, ContractClass::Hardware, d(2024, 1, 1), d(2024, 12, 31));
    let before = db.fetch_contract(&id).unwrap();

    db.conn()
        .execute_batch(
            "CREATE TRIGGER crash_on_due BEFORE UPDATE OF next_due_date ON contracts
             BEGIN SELECT RAISE(ABORT, 'simulated crash'); END;",
        )
        .unwrap();

    let request = CompletionRequest::new(&id, ContractClass::Hardware).completed_on("2024-03-30");
    let result = CompletionReconciler::new(&db, &clock).record_completion(&request);
    assert!(result.is_err());
    assert!(db.list_service_events(&id).unwrap().is_empty());
    assert_eq!(db.fetch_contract(&id).unwrap().next_due_date, before.next_due_date);

    // The same commit succeeds once the fault is gone.
    db.conn().execute_batch("DROP TRIGGER crash_on_due;").unwrap();
    let event = ServiceEvent {
        id: "evt-1".into(),
        contract_id: id.clone(),
        contract_class: ContractClass::Hardware,
        service_date: d(2024, 3, 30),
        service_type: "PMS".into(),
        description: "retry".into(),
        technician: "Ted".into(),
        outcome: ServiceOutcome::Completed,
        service_report: None,
        sr_number: None,
        created_at: clock.now(),
    };
    db.commit_completion(&event, d(2024, 6, 28), clock.now()).unwrap();
    assert_eq!(db.list_service_events(&id).unwrap().len(), 1);
}

#[test]
fn due_soon_scan_skips_expired_contracts_in_window() {
    let clock = FixedClock::at_date(d(2024, 1, 1));
    let db = seeded_db(&clock);
    let live = create(&db, &clock, ContractClass::Label, d(2023, 12, 5), d(2024, 12, 31));
    let expired = create(&db, &clock, ContractClass::Label, d(2023, 12, 5), d(2024, 12, 31));
    db.set_contract_status(&expired, ContractStatus::Expired).unwrap();

    let report = LifecycleMonitor::new(&db, &clock, settings())
        .run_due_soon_scan(7)
        .unwrap();

    let ids: Vec<&str> = report.matched.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![live.as_str()]);
    // Admin and technician, not the viewer.
    assert_eq!(report.notifications.delivered, 2);
}

#[test]
fn expiry_sweep_twice_expires_each_contract_once() {
    let clock = FixedClock::at_date(d(2023, 1, 1));
    let db = seeded_db(&clock);
    let ended = create(&db, &clock, ContractClass::Hardware, d(2023, 1, 1), d(2023, 12, 31));
    let running = create(&db, &clock, ContractClass::Label, d(2023, 6, 1), d(2024, 5, 31));

    clock.set(d(2024, 1, 1).and_hms_opt(0, 5, 0).unwrap().and_utc());
    let monitor = LifecycleMonitor::new(&db, &clock, settings());
    let first = monitor.run_expiry_scan().unwrap();
    let second = monitor.run_expiry_scan().unwrap();

    assert_eq!(first.expired_ids, vec![ended.clone()]);
    assert_eq!(second.expired_count, 0);
    assert_eq!(db.fetch_contract(&ended).unwrap().status, ContractStatus::Expired);
    assert_eq!(db.fetch_contract(&running).unwrap().status, ContractStatus::Active);

    let expired_notices = db
        .list_notifications(None, false)
        .unwrap()
        .into_iter()
        .filter(|n| n.contract_id.as_deref() == Some(ended.as_str()))
        .count();
    assert_eq!(expired_notices, 2);
}

#[test]
fn resequence_after_deletions_is_dense_by_creation_order() {
    let clock = FixedClock::at_date(d(2024, 1, 1));
    let db = seeded_db(&clock);
    let ids: Vec<String> = (0..6)
        .map(|_| create(&db, &clock, ContractClass::Hardware, d(2024, 1, 1), d(2024, 12, 31)))
        .collect();
    db.delete_contract(&ids[0]).unwrap();
    db.delete_contract(&ids[3]).unwrap();
    assert_eq!(db.next_sq(ContractClass::Hardware).unwrap(), "7");

    db.resequence_sq(ContractClass::Hardware).unwrap();

    let sqs: Vec<(String, String)> = db
        .list_contracts(ContractClass::Hardware)
        .unwrap()
        .into_iter()
        .map(|c| (c.id, c.sq))
        .collect();
    let expected: Vec<(String, String)> = [1usize, 2, 4, 5]
        .iter()
        .enumerate()
        .map(|(pos, idx)| (ids[*idx].clone(), (pos + 1).to_string()))
        .collect();
    assert_eq!(sqs, expected);
    assert_eq!(db.next_sq(ContractClass::Hardware).unwrap(), "5");
}

#[test]
fn legacy_half_written_completion_is_detected_and_repaired() {
    let clock = FixedClock::at_date(d(2024, 1, 1));
    let db = seeded_db(&clock);
    let id = create(&db, &clock, ContractClass::Hardware, d(2024, 1, 1), d(2024, 12, 31));

    // History written without the matching due-date update.
    db.append_service_event(&ServiceEvent {
        id: "legacy".into(),
        contract_id: id.clone(),
        contract_class: ContractClass::Hardware,
        service_date: d(2024, 4, 10),
        service_type: "PMS".into(),
        description: "legacy import".into(),
        technician: "Ted".into(),
        outcome: ServiceOutcome::Completed,
        service_report: None,
        sr_number: None,
        created_at: clock.now(),
    })
    .unwrap();

    let mut summary = detect_drift(&db, clock.now()).unwrap();
    assert_eq!(summary.findings.len(), 1);
    assert!(matches!(
        summary.findings[0].to_error(),
        CoreError::Inconsistency { .. }
    ));

    repair_drift(&db, &mut summary).unwrap();
    assert_eq!(db.fetch_contract(&id).unwrap().next_due_date, Some(d(2024, 7, 9)));
}
