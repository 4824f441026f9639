//! # pmstrack Core Library
//!
//! Core logic for tracking preventive-maintenance (PMS) contracts: when
//! equipment is next due, the full maintenance calendar over a contract's
//! term, recording completed visits, and the periodic sweeps that remind
//! technicians and expire finished contracts. The `pmstrack` CLI is a thin
//! layer over this crate.
//!
//! ## Architecture
//!
//! - **Date arithmetic** and **schedule generation**: pure functions keyed by
//!   contract class (hardware every 90 days, label every 30)
//! - **Completion reconciler**: one atomic commit per completed visit
//! - **Lifecycle monitor**: due-soon, expiry and weekly-report sweeps behind
//!   per-sweep leases, fired by cron-like triggers with an injected clock
//! - **Storage**: SQLite via narrow store traits, TOML configuration
//!
//! ## Key Components
//!
//! - [`CompletionReconciler`]: records visits and advances due dates
//! - [`LifecycleMonitor`]: the periodic sweeps
//! - [`PmsDb`]: SQLite implementation of every store trait
//! - [`Config`]: application configuration management

pub mod clock;
pub mod contract;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod pms;
pub mod storage;
pub mod views;

pub use clock::{Clock, FixedClock, SystemClock};
pub use contract::{
    Contract, ContractClass, ContractPatch, ContractStatus, NewContract, ServiceEvent,
    ServiceOutcome,
};
pub use error::{ConfigError, CoreError, DatabaseError, Result};
pub use lifecycle::{LifecycleMonitor, SweepKind, SweepSettings};
pub use notify::{Notification, NotificationKind, Role, User};
pub use pms::{
    compute_next_due, generate_schedule, CompletionOutcome, CompletionReconciler,
    CompletionRequest,
};
pub use storage::{Config, PmsDb};
