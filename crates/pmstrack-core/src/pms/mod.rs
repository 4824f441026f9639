//! PMS scheduling engine.
//!
//! Date arithmetic and calendar projection are pure. Completion
//! reconciliation and drift checks go through the store traits in
//! [`crate::storage`].

pub mod dates;
pub mod drift;
pub mod reconcile;
pub mod schedule;

pub use dates::{
    add_cadence, cadence_days, compute_next_due, next_due_from_anchor, next_due_from_schedule,
    parse_date, parse_optional_date, DateInputError,
};
pub use drift::{detect_drift, repair_drift, DriftFinding, DriftSummary};
pub use reconcile::{CompletionOutcome, CompletionReconciler, CompletionRequest};
pub use schedule::{
    generate_schedule, schedule_between, ContractSchedule, ScheduleEntry, ScheduleIter,
};
