use chrono::Utc;
use clap::Subcommand;
use pmstrack_core::storage::PmsDb;
use pmstrack_core::Role;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum UserAction {
    /// Add a user
    Add {
        email: String,
        #[arg(long, default_value = "")]
        name: String,
        /// admin, technician or viewer
        #[arg(long, default_value = "technician")]
        role: String,
    },
    /// List all users
    List,
}

pub fn run(action: UserAction) -> CmdResult {
    let db = PmsDb::open()?;

    match action {
        UserAction::Add { email, name, role } => {
            let role = Role::parse(&role).ok_or_else(|| format!("unknown role: {role}"))?;
            let user = db.create_user(&email, &name, role, Utc::now())?;
            print_json(&user)?;
        }
        UserAction::List => {
            print_json(&db.list_users()?)?;
        }
    }
    Ok(())
}
