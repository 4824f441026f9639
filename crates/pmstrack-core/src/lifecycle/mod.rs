//! Lifecycle monitor: the periodic sweeps.
//!
//! - Due-soon scan: reminders for contracts whose next due date falls inside
//!   a look-ahead window.
//! - Expiry scan: contracts past their end date become `Expired`.
//! - Weekly report: a count of last week's service events.
//!
//! Each sweep runs under a lease from [`SweepLock`] so overlapping
//! invocations skip instead of double-processing. Handlers are stateless;
//! time comes from the injected [`Clock`] and triggers live in [`trigger`].

pub mod runner;
pub mod trigger;

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::contract::{Contract, ContractClass, ContractPatch, ContractStatus};
use crate::error::{CoreError, Result};
use crate::notify::{DispatchReport, NotificationDispatcher, NotificationPayload, Role};
use crate::storage::{
    Config, ContractStore, HistoryStore, NotificationSink, RecipientDirectory, SweepLock,
};

/// Sweep types, one lease each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    DueSoon,
    Expiry,
    WeeklyReport,
}

impl SweepKind {
    pub const ALL: [SweepKind; 3] = [
        SweepKind::DueSoon,
        SweepKind::Expiry,
        SweepKind::WeeklyReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::DueSoon => "due_soon",
            SweepKind::Expiry => "expiry",
            SweepKind::WeeklyReport => "weekly_report",
        }
    }
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds and identity for sweep runs.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub batch_size: usize,
    pub max_contracts_per_sweep: usize,
    pub lease_ttl: Duration,
    /// Identifies this process in the lease table.
    pub holder_id: String,
    pub notifications_enabled: bool,
    pub recipient_roles: Vec<Role>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SweepSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.sweep.batch_size.max(1),
            max_contracts_per_sweep: config.sweep.max_contracts_per_sweep.max(1),
            lease_ttl: config.sweep.lease_ttl(),
            holder_id: format!("pmstrack-{}", uuid::Uuid::new_v4()),
            notifications_enabled: config.notifications.enabled,
            recipient_roles: config.notifications.operational_roles.clone(),
        }
    }

    pub fn with_holder(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = holder_id.into();
        self
    }
}

/// True when a non-expired contract's next due date is on or before
/// `today + window_days`. Overdue contracts match; undated ones never do.
pub fn is_due_within(contract: &Contract, today: NaiveDate, window_days: u64) -> bool {
    if contract.is_expired() {
        return false;
    }
    let Some(horizon) = today.checked_add_days(Days::new(window_days)) else {
        return contract.next_due_date.is_some();
    };
    contract.next_due_date.is_some_and(|due| due <= horizon)
}

/// True when a non-expired contract's end date is strictly before `today`.
pub fn is_past_end(contract: &Contract, today: NaiveDate) -> bool {
    !contract.is_expired() && contract.contract_end_date.is_some_and(|end| end < today)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueSoonReport {
    pub window_days: u64,
    pub matched: Vec<Contract>,
    pub notified: usize,
    pub failed: usize,
    pub notifications: DispatchReport,
    /// More contracts matched than one sweep may touch.
    pub truncated: bool,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryReport {
    pub expired_count: usize,
    pub expired_ids: Vec<String>,
    pub failed: usize,
    pub notifications: DispatchReport,
    pub truncated: bool,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReportSummary {
    pub since: NaiveDate,
    pub completed_last_week: usize,
    pub notifications: DispatchReport,
    pub finished_at: DateTime<Utc>,
}

/// Runs the lifecycle sweeps against a store.
pub struct LifecycleMonitor<'a, S> {
    store: &'a S,
    clock: &'a dyn Clock,
    settings: SweepSettings,
}

impl<'a, S> LifecycleMonitor<'a, S>
where
    S: ContractStore + HistoryStore + NotificationSink + RecipientDirectory + SweepLock,
{
    pub fn new(store: &'a S, clock: &'a dyn Clock, settings: SweepSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    fn dispatcher(&self) -> NotificationDispatcher<'_> {
        NotificationDispatcher::new(self.store, self.store)
            .with_roles(self.settings.recipient_roles.clone())
    }

    /// Non-expired contracts across every stored class, in creation order.
    fn live_contracts(&self) -> Result<Vec<Contract>> {
        let mut contracts = Vec::new();
        for class in ContractClass::STORED {
            contracts.extend(
                self.store
                    .fetch_contracts_by_status(class, ContractStatus::Expired)?,
            );
        }
        Ok(contracts)
    }

    /// Contracts due within `window_days` of today, without side effects.
    pub fn due_soon(&self, window_days: u64) -> Result<Vec<Contract>> {
        let today = self.clock.today();
        Ok(self
            .live_contracts()?
            .into_iter()
            .filter(|c| is_due_within(c, today, window_days))
            .collect())
    }

    /// Run `body` while holding the lease for `kind`.
    ///
    /// # Errors
    /// `SweepInProgress` if another holder owns a live lease.
    fn with_lease<T>(&self, kind: SweepKind, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let holder = self.settings.holder_id.as_str();
        let now = self.clock.now();
        if !self
            .store
            .try_acquire(kind, holder, now, self.settings.lease_ttl)?
        {
            let current = self
                .store
                .current_holder(kind, now)?
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(kind = kind.as_str(), holder = %current, "sweep skipped, lease held");
            return Err(CoreError::SweepInProgress {
                kind: kind.as_str().to_string(),
                holder: current,
            });
        }

        let result = body();
        if let Err(e) = self.store.release(kind, holder, self.clock.now()) {
            tracing::error!(kind = kind.as_str(), "failed to release sweep lease: {e}");
        }
        result
    }

    /// Send one reminder per operational user for every contract due within
    /// `window_days`.
    ///
    /// Contracts already reminded today are skipped, so a run cut short by
    /// `max_contracts_per_sweep` resumes with the rest on the next run.
    pub fn run_due_soon_scan(&self, window_days: u64) -> Result<DueSoonReport> {
        self.with_lease(SweepKind::DueSoon, || {
            let today = self.clock.today();
            let mut matched: Vec<Contract> = self
                .due_soon(window_days)?
                .into_iter()
                .filter(|c| c.last_reminded_on != Some(today))
                .collect();
            let truncated = matched.len() > self.settings.max_contracts_per_sweep;
            matched.truncate(self.settings.max_contracts_per_sweep);

            let mut notifications = DispatchReport::default();
            let mut notified = 0;
            let mut failed = 0;
            if self.settings.notifications_enabled {
                let dispatcher = self.dispatcher();
                let batch_size = self.settings.batch_size.max(1);
                for (batch_no, batch) in matched.chunks(batch_size).enumerate() {
                    for contract in batch {
                        let payload = NotificationPayload::maintenance_reminder(contract);
                        match dispatcher.dispatch(&payload) {
                            Ok(report) => {
                                notified += 1;
                                notifications.merge(report);
                                self.mark_reminded(contract, today);
                            }
                            Err(e) => {
                                failed += 1;
                                tracing::error!(
                                    contract_id = %contract.id,
                                    "due-soon notification failed: {e}"
                                );
                            }
                        }
                    }
                    tracing::debug!(batch = batch_no, size = batch.len(), "due-soon batch done");
                }
            }

            if truncated {
                tracing::info!(
                    limit = self.settings.max_contracts_per_sweep,
                    "due-soon sweep hit its limit, unreminded contracts go out on the next run"
                );
            }
            tracing::info!(
                window_days,
                matched = matched.len(),
                notified,
                failed,
                "due-soon sweep finished"
            );
            Ok(DueSoonReport {
                window_days,
                matched,
                notified,
                failed,
                notifications,
                truncated,
                finished_at: self.clock.now(),
            })
        })
    }

    fn mark_reminded(&self, contract: &Contract, today: NaiveDate) {
        let patch = ContractPatch::reminded(today);
        if let Err(e) = self.store.update_contract_fields(&contract.id, &patch) {
            tracing::warn!(contract_id = %contract.id, "failed to record reminder: {e}");
        }
    }

    /// Mark every non-expired contract whose end date has passed as
    /// `Expired`. Running it twice expires nothing the second time.
    pub fn run_expiry_scan(&self) -> Result<ExpiryReport> {
        self.with_lease(SweepKind::Expiry, || {
            let today = self.clock.today();
            let mut candidates: Vec<Contract> = self
                .live_contracts()?
                .into_iter()
                .filter(|c| is_past_end(c, today))
                .collect();
            let truncated = candidates.len() > self.settings.max_contracts_per_sweep;
            candidates.truncate(self.settings.max_contracts_per_sweep);

            let dispatcher = self.dispatcher();
            let mut notifications = DispatchReport::default();
            let mut expired_ids = Vec::new();
            let mut failed = 0;
            let batch_size = self.settings.batch_size.max(1);
            for (batch_no, batch) in candidates.chunks(batch_size).enumerate() {
                for contract in batch {
                    let patch = ContractPatch::status(ContractStatus::Expired);
                    match self.store.update_contract_fields(&contract.id, &patch) {
                        Ok(updated) => {
                            tracing::info!(
                                contract_id = %updated.id,
                                class = updated.class.as_str(),
                                sq = %updated.sq,
                                "contract expired"
                            );
                            if self.settings.notifications_enabled {
                                let payload = NotificationPayload::contract_expired(&updated);
                                match dispatcher.dispatch(&payload) {
                                    Ok(report) => notifications.merge(report),
                                    Err(e) => tracing::error!(
                                        contract_id = %updated.id,
                                        "expiry notification failed: {e}"
                                    ),
                                }
                            }
                            expired_ids.push(updated.id);
                        }
                        Err(e) => {
                            failed += 1;
                            tracing::error!(
                                contract_id = %contract.id,
                                "failed to expire contract: {e}"
                            );
                        }
                    }
                }
                tracing::debug!(batch = batch_no, size = batch.len(), "expiry batch done");
            }

            tracing::info!(
                expired = expired_ids.len(),
                failed,
                truncated,
                "expiry sweep finished"
            );
            Ok(ExpiryReport {
                expired_count: expired_ids.len(),
                expired_ids,
                failed,
                notifications,
                truncated,
                finished_at: self.clock.now(),
            })
        })
    }

    /// Count service events from the past seven days and send the total to
    /// operational users.
    pub fn run_weekly_report(&self) -> Result<WeeklyReportSummary> {
        self.with_lease(SweepKind::WeeklyReport, || {
            let today = self.clock.today();
            let since = today.checked_sub_days(Days::new(7)).unwrap_or(today);
            let completed = self.store.count_service_events_since(since)?;

            let notifications = if self.settings.notifications_enabled {
                self.dispatcher()
                    .dispatch(&NotificationPayload::weekly_report(completed))?
            } else {
                DispatchReport::default()
            };

            tracing::info!(
                completed,
                delivered = notifications.delivered,
                "weekly report sent"
            );
            Ok(WeeklyReportSummary {
                since,
                completed_last_week: completed,
                notifications,
                finished_at: self.clock.now(),
            })
        })
    }

    /// Run one sweep by kind, using `window_days` for the due-soon scan.
    /// Returns a one-line summary for logs.
    pub fn run(&self, kind: SweepKind, window_days: u64) -> Result<String> {
        match kind {
            SweepKind::DueSoon => self.run_due_soon_scan(window_days).map(|r| {
                format!("{} contract(s) due within {window_days} day(s)", r.matched.len())
            }),
            SweepKind::Expiry => self.run_expiry_scan().map(|r| {
                format!("{} contract(s) expired, {} failed", r.expired_count, r.failed)
            }),
            SweepKind::WeeklyReport => self
                .run_weekly_report()
                .map(|r| format!("{} service event(s) last week", r.completed_last_week)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::contract::NewContract;
    use crate::storage::PmsDb;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn contract_due(
        db: &PmsDb,
        class: ContractClass,
        due: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Contract {
        let mut new = NewContract::new(class, "Acme");
        new.next_due_date = due;
        new.contract_end_date = end;
        db.create_contract(&new, d(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap().and_utc())
            .unwrap()
    }

    fn settings() -> SweepSettings {
        SweepSettings::default().with_holder("test-holder")
    }

    #[test]
    fn settings_from_unvalidated_config_stay_usable() {
        let mut config = Config::default();
        config.sweep.max_contracts_per_sweep = 0;
        config.sweep.lease_ttl_secs = i64::MAX as u64;
        let settings = SweepSettings::from_config(&config);
        assert_eq!(settings.max_contracts_per_sweep, 1);
        assert_eq!(settings.lease_ttl, Duration::days(1));
    }

    #[test]
    fn due_within_predicate() {
        let db = PmsDb::open_memory().unwrap();
        let today = d(2024, 3, 1);
        let soon = contract_due(&db, ContractClass::Hardware, Some(d(2024, 3, 8)), None);
        let late = contract_due(&db, ContractClass::Hardware, Some(d(2024, 3, 9)), None);
        let overdue = contract_due(&db, ContractClass::Label, Some(d(2024, 2, 1)), None);
        let undated = contract_due(&db, ContractClass::Label, None, None);

        assert!(is_due_within(&soon, today, 7));
        assert!(!is_due_within(&late, today, 7));
        assert!(is_due_within(&overdue, today, 7));
        assert!(!is_due_within(&undated, today, 7));
    }

    #[test]
    fn due_soon_excludes_expired_but_keeps_inactive() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 3, 1));
        let active = contract_due(&db, ContractClass::Hardware, Some(d(2024, 3, 3)), None);
        let expired = contract_due(&db, ContractClass::Hardware, Some(d(2024, 3, 3)), None);
        let inactive = contract_due(&db, ContractClass::Label, Some(d(2024, 3, 4)), None);
        db.set_contract_status(&expired.id, ContractStatus::Expired).unwrap();
        db.set_contract_status(&inactive.id, ContractStatus::Inactive).unwrap();

        let monitor = LifecycleMonitor::new(&db, &clock, settings());
        let ids: Vec<String> = monitor.due_soon(7).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![active.id, inactive.id]);
    }

    #[test]
    fn due_soon_scan_notifies_operational_users() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 3, 1));
        let now = clock.now();
        db.create_user("a@example.com", "Ann", Role::Admin, now).unwrap();
        db.create_user("t@example.com", "Tom", Role::Technician, now).unwrap();
        db.create_user("v@example.com", "Vic", Role::Viewer, now).unwrap();
        contract_due(&db, ContractClass::Hardware, Some(d(2024, 3, 5)), None);

        let report = LifecycleMonitor::new(&db, &clock, settings())
            .run_due_soon_scan(7)
            .unwrap();
        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.notifications.delivered, 2);
        assert_eq!(db.list_notifications(None, true).unwrap().len(), 2);
    }

    #[test]
    fn limited_due_soon_scan_reaches_every_contract() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 3, 1));
        db.create_user("a@example.com", "Ann", Role::Admin, clock.now()).unwrap();
        let first = contract_due(&db, ContractClass::Label, Some(d(2024, 3, 3)), None);
        let second = contract_due(&db, ContractClass::Label, Some(d(2024, 3, 3)), None);
        let mut limited = settings();
        limited.max_contracts_per_sweep = 1;
        let monitor = LifecycleMonitor::new(&db, &clock, limited);

        let run = |monitor: &LifecycleMonitor<'_, PmsDb>| {
            let report = monitor.run_due_soon_scan(7).unwrap();
            let ids: Vec<String> = report.matched.iter().map(|c| c.id.clone()).collect();
            (ids, report.truncated)
        };
        assert_eq!(run(&monitor), (vec![first.id.clone()], true));
        assert_eq!(run(&monitor), (vec![second.id.clone()], false));
        assert_eq!(run(&monitor), (Vec::<String>::new(), false));
        assert_eq!(
            db.fetch_contract(&second.id).unwrap().last_reminded_on,
            Some(d(2024, 3, 1))
        );

        clock.advance(Duration::days(1));
        assert_eq!(run(&monitor), (vec![first.id.clone()], true));
        assert_eq!(run(&monitor), (vec![second.id], false));
        assert_eq!(db.list_notifications(None, false).unwrap().len(), 4);
    }

    #[test]
    fn expiry_scan_is_idempotent() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2025, 1, 2));
        let past = contract_due(&db, ContractClass::Hardware, None, Some(d(2024, 12, 31)));
        let today_end = contract_due(&db, ContractClass::Label, None, Some(d(2025, 1, 2)));
        contract_due(&db, ContractClass::Label, None, None);

        let monitor = LifecycleMonitor::new(&db, &clock, settings());
        let first = monitor.run_expiry_scan().unwrap();
        assert_eq!(first.expired_ids, vec![past.id.clone()]);
        let second = monitor.run_expiry_scan().unwrap();
        assert_eq!(second.expired_count, 0);

        assert!(db.fetch_contract(&past.id).unwrap().is_expired());
        assert!(!db.fetch_contract(&today_end.id).unwrap().is_expired());
    }

    #[test]
    fn expiry_scan_respects_per_sweep_limit() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2025, 1, 2));
        for _ in 0..5 {
            contract_due(&db, ContractClass::Label, None, Some(d(2024, 6, 1)));
        }
        let mut limited = settings();
        limited.batch_size = 2;
        limited.max_contracts_per_sweep = 3;

        let monitor = LifecycleMonitor::new(&db, &clock, limited);
        let first = monitor.run_expiry_scan().unwrap();
        assert_eq!(first.expired_count, 3);
        assert!(first.truncated);
        let second = monitor.run_expiry_scan().unwrap();
        assert_eq!(second.expired_count, 2);
        assert!(!second.truncated);
    }

    #[test]
    fn held_lease_skips_sweep() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2025, 1, 2));
        db.try_acquire(SweepKind::Expiry, "other", clock.now(), Duration::minutes(15))
            .unwrap();

        let err = LifecycleMonitor::new(&db, &clock, settings())
            .run_expiry_scan()
            .unwrap_err();
        assert!(matches!(err, CoreError::SweepInProgress { ref holder, .. } if holder == "other"));

        clock.advance(Duration::minutes(16));
        assert!(LifecycleMonitor::new(&db, &clock, settings())
            .run_expiry_scan()
            .is_ok());
        assert!(db.last_run(SweepKind::Expiry).unwrap().is_some());
    }

    #[test]
    fn weekly_report_counts_last_seven_days() {
        use crate::pms::{CompletionReconciler, CompletionRequest};

        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2024, 3, 11));
        let user = db.create_user("a@example.com", "Ann", Role::Admin, clock.now()).unwrap();
        let contract = contract_due(&db, ContractClass::Label, Some(d(2024, 3, 1)), None);
        let reconciler = CompletionReconciler::new(&db, &clock);
        for date in ["2024-03-01", "2024-03-04", "2024-03-10"] {
            reconciler
                .record_completion(
                    &CompletionRequest::new(&contract.id, ContractClass::Label).completed_on(date),
                )
                .unwrap();
        }

        let summary = LifecycleMonitor::new(&db, &clock, settings())
            .run_weekly_report()
            .unwrap();
        assert_eq!(summary.completed_last_week, 2);
        let inbox = db.list_notifications(Some(user.id.as_str()), false).unwrap();
        assert_eq!(
            inbox[0].message,
            "Weekly report: 2 maintenance tasks completed this week"
        );
    }

    #[test]
    fn disabled_notifications_still_expire() {
        let db = PmsDb::open_memory().unwrap();
        let clock = FixedClock::at_date(d(2025, 1, 2));
        db.create_user("a@example.com", "Ann", Role::Admin, clock.now()).unwrap();
        contract_due(&db, ContractClass::Hardware, None, Some(d(2024, 1, 1)));

        let mut quiet = settings();
        quiet.notifications_enabled = false;
        let report = LifecycleMonitor::new(&db, &clock, quiet).run_expiry_scan().unwrap();
        assert_eq!(report.expired_count, 1);
        assert!(db.list_notifications(None, false).unwrap().is_empty());
    }
}
