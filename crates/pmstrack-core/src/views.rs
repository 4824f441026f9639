//! Read-only "upcoming maintenance" views.
//!
//! Three consumers look ahead with their own window: the daily monitor,
//! the quarterly notifications page and the dashboard counter. All of them
//! skip expired contracts and include overdue ones.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::contract::sequence::sq_sort_key;
use crate::contract::{Contract, ContractClass, ContractStatus, ServiceOutcome};
use crate::error::Result;
use crate::lifecycle::is_due_within;
use crate::storage::{ContractStore, HistoryStore};

/// Label of the bucket holding overdue contracts.
pub const OVERDUE_BUCKET: &str = "Overdue";

/// One contract in an upcoming-maintenance list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingEntry {
    pub id: String,
    pub class: ContractClass,
    pub sq: String,
    pub end_user: String,
    pub serial: String,
    pub branch: String,
    pub status: ContractStatus,
    pub next_due_date: NaiveDate,
    /// Whole days from today; negative when overdue.
    pub days_until: i64,
    pub is_overdue: bool,
}

impl UpcomingEntry {
    fn from_contract(contract: &Contract, due: NaiveDate, today: NaiveDate) -> Self {
        let days_until = (due - today).num_days();
        Self {
            id: contract.id.clone(),
            class: contract.class,
            sq: contract.sq.clone(),
            end_user: contract.end_user.clone(),
            serial: contract.serial.clone(),
            branch: contract.branch.clone(),
            status: contract.status,
            next_due_date: due,
            days_until,
            is_overdue: days_until < 0,
        }
    }
}

/// Non-expired contracts due within `window_days`, most urgent first.
pub fn upcoming<S>(store: &S, today: NaiveDate, window_days: u64) -> Result<Vec<UpcomingEntry>>
where
    S: ContractStore + ?Sized,
{
    let mut entries = Vec::new();
    for class in ContractClass::STORED {
        for contract in store.fetch_contracts_by_status(class, ContractStatus::Expired)? {
            if !is_due_within(&contract, today, window_days) {
                continue;
            }
            if let Some(due) = contract.next_due_date {
                entries.push(UpcomingEntry::from_contract(&contract, due, today));
            }
        }
    }
    entries.sort_by_key(|e| (e.days_until, sq_sort_key(&e.sq)));
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    /// `Overdue` or `YYYY-MM` of the due date.
    pub bucket: String,
    pub hardware: usize,
    pub label: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterlyView {
    pub window_days: u64,
    pub total_due: usize,
    pub overdue_count: usize,
    /// Overdue first, then months in calendar order.
    pub by_month: Vec<BucketCounts>,
    pub items: Vec<UpcomingEntry>,
}

fn bucket_key(entry: &UpcomingEntry) -> String {
    if entry.is_overdue {
        OVERDUE_BUCKET.to_string()
    } else {
        entry.next_due_date.format("%Y-%m").to_string()
    }
}

/// Upcoming contracts grouped into an overdue bucket and month buckets.
pub fn quarterly_notifications<S>(
    store: &S,
    today: NaiveDate,
    window_days: u64,
) -> Result<QuarterlyView>
where
    S: ContractStore + ?Sized,
{
    let items = upcoming(store, today, window_days)?;

    let mut by_month: Vec<BucketCounts> = Vec::new();
    for entry in &items {
        let key = bucket_key(entry);
        let idx = match by_month.iter().position(|b| b.bucket == key) {
            Some(idx) => idx,
            None => {
                by_month.push(BucketCounts {
                    bucket: key,
                    hardware: 0,
                    label: 0,
                    total: 0,
                });
                by_month.len() - 1
            }
        };
        let bucket = &mut by_month[idx];
        match entry.class {
            ContractClass::Hardware => bucket.hardware += 1,
            ContractClass::Label => bucket.label += 1,
            ContractClass::Unrecognized => {}
        }
        bucket.total += 1;
    }
    // Overdue first; month keys sort as text.
    by_month.sort_by(|a, b| {
        (a.bucket != OVERDUE_BUCKET, &a.bucket).cmp(&(b.bucket != OVERDUE_BUCKET, &b.bucket))
    });

    Ok(QuarterlyView {
        window_days,
        total_due: items.len(),
        overdue_count: items.iter().filter(|e| e.is_overdue).count(),
        by_month,
        items,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_contracts: usize,
    pub active_contracts: usize,
    pub expired_contracts: usize,
    pub upcoming_maintenance: usize,
    pub completed_maintenance: usize,
    pub pending_maintenance: usize,
}

/// Headline counters for the dashboard.
pub fn dashboard_stats<S>(store: &S, today: NaiveDate, window_days: u64) -> Result<DashboardStats>
where
    S: ContractStore + HistoryStore + ?Sized,
{
    let mut stats = DashboardStats::default();
    for class in ContractClass::STORED {
        for contract in store.list_contracts(class)? {
            stats.total_contracts += 1;
            match contract.status {
                ContractStatus::Active => stats.active_contracts += 1,
                ContractStatus::Expired => stats.expired_contracts += 1,
                ContractStatus::Inactive | ContractStatus::Pending => {}
            }
            if is_due_within(&contract, today, window_days) {
                stats.upcoming_maintenance += 1;
            }
        }
    }
    stats.completed_maintenance =
        store.count_service_events_with_outcome(ServiceOutcome::Completed)?;
    stats.pending_maintenance = store.count_service_events_with_outcome(ServiceOutcome::Pending)?;
    Ok(stats)
}
