//! Contract administration commands for CLI.

use chrono::Utc;
use clap::Subcommand;
use pmstrack_core::pms::ContractSchedule;
use pmstrack_core::storage::{ContractStore, PmsDb};
use pmstrack_core::{ContractStatus, NewContract};

use super::{date_arg, print_json, stored_class_arg, CmdResult};

#[derive(Subcommand)]
pub enum ContractAction {
    /// Create a contract (SQ and first due date are derived when omitted)
    Create {
        /// Contract class: hardware or label
        #[arg(long)]
        class: String,
        /// End user (customer) name
        #[arg(long)]
        end_user: String,
        /// Model (hardware) or part number (label)
        #[arg(long, default_value = "")]
        equipment: String,
        #[arg(long, default_value = "")]
        serial: String,
        #[arg(long, default_value = "")]
        branch: String,
        /// Assigned technical specialist
        #[arg(long, default_value = "")]
        technician: String,
        #[arg(long, default_value = "")]
        po_number: String,
        /// Contract start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// Contract end date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Explicit SQ
        #[arg(long)]
        sq: Option<String>,
    },
    /// Get contract details
    Get {
        /// Contract ID
        id: String,
    },
    /// List contracts sorted by SQ
    List {
        /// Filter by class
        #[arg(long)]
        class: Option<String>,
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// Change a contract's status
    Status {
        /// Contract ID
        id: String,
        /// active, inactive, pending or expired
        status: String,
    },
    /// Delete a contract (service history is kept)
    Delete {
        /// Contract ID
        id: String,
    },
    /// Renumber every SQ in a class to 1..N by creation order
    Resequence {
        #[arg(long)]
        class: String,
    },
    /// Assign SQs to rows with a missing or non-numeric SQ
    BackfillSq {
        #[arg(long)]
        class: String,
    },
    /// Full maintenance calendar over the contract term
    Schedule {
        /// Contract ID
        id: String,
    },
}

fn status_arg(raw: &str) -> Result<ContractStatus, Box<dyn std::error::Error>> {
    Ok(ContractStatus::parse(raw).ok_or_else(|| format!("unknown status: {raw}"))?)
}

pub fn run(action: ContractAction) -> CmdResult {
    let db = PmsDb::open()?;

    match action {
        ContractAction::Create {
            class,
            end_user,
            equipment,
            serial,
            branch,
            technician,
            po_number,
            start,
            end,
            sq,
        } => {
            let mut new = NewContract::new(stored_class_arg(&class)?, end_user);
            new.equipment_ref = equipment;
            new.serial = serial;
            new.branch = branch;
            new.technical_specialist = technician;
            new.po_number = po_number;
            new.sq = sq;
            new.contract_date = start.as_deref().map(date_arg).transpose()?;
            new.contract_end_date = end.as_deref().map(date_arg).transpose()?;

            let contract = db.create_contract(&new, Utc::now())?;
            eprintln!("Contract created: {}", contract.id);
            print_json(&contract)?;
        }
        ContractAction::Get { id } => {
            let contract = db.fetch_contract(&id)?;
            print_json(&contract)?;
        }
        ContractAction::List { class, status } => {
            let class = class.as_deref().map(stored_class_arg).transpose()?;
            let status = status.as_deref().map(status_arg).transpose()?;
            let contracts = db.list_contracts_by(class, status)?;
            print_json(&contracts)?;
        }
        ContractAction::Status { id, status } => {
            let contract = db.set_contract_status(&id, status_arg(&status)?)?;
            print_json(&contract)?;
        }
        ContractAction::Delete { id } => {
            db.delete_contract(&id)?;
            println!("ok");
        }
        ContractAction::Resequence { class } => {
            let report = db.resequence_sq(stored_class_arg(&class)?)?;
            print_json(&report)?;
        }
        ContractAction::BackfillSq { class } => {
            let report = db.backfill_sq(stored_class_arg(&class)?)?;
            print_json(&report)?;
        }
        ContractAction::Schedule { id } => {
            let contract = db.fetch_contract(&id)?;
            print_json(&ContractSchedule::for_contract(&contract))?;
        }
    }
    Ok(())
}
