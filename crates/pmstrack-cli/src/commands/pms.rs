//! PMS date arithmetic and completion commands for CLI.

use clap::Subcommand;
use pmstrack_core::pms::{
    cadence_days, compute_next_due, generate_schedule, CompletionReconciler, CompletionRequest,
};
use pmstrack_core::storage::PmsDb;
use pmstrack_core::{ContractClass, SystemClock};
use serde_json::json;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum PmsAction {
    /// Next due date from an anchor date
    NextDue {
        /// Anchor date (YYYY-MM-DD or RFC 3339)
        anchor: String,
        /// Contract class; anything but hardware uses the monthly cadence
        #[arg(long)]
        class: String,
    },
    /// Every due date after the anchor up to the end date
    Schedule {
        anchor: String,
        end: String,
        #[arg(long)]
        class: String,
    },
    /// Record a completed visit and advance the due date
    Complete {
        /// Contract ID
        id: String,
        /// Expected class; omitted means the contract's own class
        #[arg(long)]
        class: Option<String>,
        /// Completion date (defaults to today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        technician: Option<String>,
        /// Service report text
        #[arg(long)]
        report: Option<String>,
        /// Service request number
        #[arg(long)]
        sr: Option<String>,
    },
}

pub fn run(action: PmsAction) -> CmdResult {
    match action {
        PmsAction::NextDue { anchor, class } => {
            let class = ContractClass::parse(&class);
            let due = compute_next_due(Some(anchor.as_str()), class)?;
            print_json(&json!({
                "class": class,
                "cadence_days": cadence_days(class),
                "next_due_date": due,
            }))?;
        }
        PmsAction::Schedule { anchor, end, class } => {
            let class = ContractClass::parse(&class);
            let dates: Vec<_> =
                generate_schedule(Some(anchor.as_str()), Some(end.as_str()), class).collect();
            print_json(&dates)?;
        }
        PmsAction::Complete {
            id,
            class,
            date,
            technician,
            report,
            sr,
        } => {
            let db = PmsDb::open()?;
            let request = CompletionRequest {
                contract_id: id,
                class: class.as_deref().map(ContractClass::parse),
                completion_date: date,
                technician,
                service_report: report,
                sr_number: sr,
            };
            let outcome = CompletionReconciler::new(&db, &SystemClock).record_completion(&request)?;
            print_json(&outcome)?;
        }
    }
    Ok(())
}
