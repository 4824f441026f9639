//! Narrow store interfaces the scheduling engine consumes.
//!
//! [`PmsDb`](super::PmsDb) implements all of them over SQLite; tests swap in
//! doubles where a failure has to be injected.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::contract::{
    Contract, ContractClass, ContractPatch, ContractStatus, ServiceEvent, ServiceOutcome,
};
use crate::error::Result;
use crate::lifecycle::SweepKind;
use crate::notify::{NotificationPayload, Role};

pub trait ContractStore {
    /// # Errors
    /// `NotFound` if no contract has this id.
    fn fetch_contract(&self, id: &str) -> Result<Contract>;

    /// Contracts of `class` whose status is anything but `excluded`.
    fn fetch_contracts_by_status(
        &self,
        class: ContractClass,
        excluded: ContractStatus,
    ) -> Result<Vec<Contract>>;

    /// Every contract of `class`, in creation order.
    fn list_contracts(&self, class: ContractClass) -> Result<Vec<Contract>>;

    /// # Errors
    /// `NotFound` if no contract has this id.
    fn update_contract_fields(&self, id: &str, patch: &ContractPatch) -> Result<Contract>;
}

pub trait HistoryStore {
    /// Append a service event and return its id.
    fn append_service_event(&self, event: &ServiceEvent) -> Result<String>;

    /// Most recently recorded completed event for a contract.
    ///
    /// Ordered by insertion, not service date, so a back-dated visit entered
    /// last is the one the stored due date was computed from.
    fn latest_completion(&self, contract_id: &str) -> Result<Option<ServiceEvent>>;

    fn count_service_events_with_outcome(&self, outcome: ServiceOutcome) -> Result<usize>;

    /// Number of service events with a service date on or after `since`.
    fn count_service_events_since(&self, since: NaiveDate) -> Result<usize>;
}

/// Records a completed visit and advances the due date as one unit.
pub trait CompletionLedger {
    /// Append `event` and set the contract's next due date, atomically.
    ///
    /// # Errors
    /// `NotFound` if the contract is gone; any error leaves both the history
    /// and the contract untouched.
    fn commit_completion(
        &self,
        event: &ServiceEvent,
        next_due: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<String>;
}

pub trait NotificationSink {
    fn enqueue_notification(&self, recipient_id: &str, payload: &NotificationPayload) -> Result<()>;
}

pub trait RecipientDirectory {
    /// Ids of users holding any of `roles`.
    fn list_users_with_role(&self, roles: &[Role]) -> Result<Vec<String>>;
}

/// Mutual exclusion for periodic sweeps.
pub trait SweepLock {
    /// Take the lease for `kind` if it is free, expired, or already ours.
    fn try_acquire(
        &self,
        kind: SweepKind,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Drop the lease and stamp the last completed run.
    fn release(&self, kind: SweepKind, holder: &str, finished_at: DateTime<Utc>) -> Result<()>;

    /// Current holder, if the lease is live at `now`.
    fn current_holder(&self, kind: SweepKind, now: DateTime<Utc>) -> Result<Option<String>>;

    fn last_run(&self, kind: SweepKind) -> Result<Option<DateTime<Utc>>>;
}
