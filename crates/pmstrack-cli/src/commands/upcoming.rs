//! Upcoming maintenance views for CLI.

use chrono::Utc;
use clap::Subcommand;
use pmstrack_core::storage::PmsDb;
use pmstrack_core::views::{dashboard_stats, quarterly_notifications, upcoming};
use pmstrack_core::Config;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum UpcomingAction {
    /// Contracts due within a window, most urgent first
    List {
        /// Window in days (default: windows.monitor_days)
        #[arg(long)]
        days: Option<u64>,
    },
    /// Due contracts grouped by month, overdue first
    Quarterly {
        /// Window in days (default: windows.quarterly_days)
        #[arg(long)]
        days: Option<u64>,
    },
    /// Headline counters
    Dashboard,
}

pub fn run(action: UpcomingAction) -> CmdResult {
    let config = Config::load_or_default();
    let db = PmsDb::open()?;
    let today = Utc::now().date_naive();

    match action {
        UpcomingAction::List { days } => {
            let window = days.unwrap_or_else(|| config.windows.monitor());
            print_json(&upcoming(&db, today, window)?)?;
        }
        UpcomingAction::Quarterly { days } => {
            let window = days.unwrap_or_else(|| config.windows.quarterly());
            print_json(&quarterly_notifications(&db, today, window)?)?;
        }
        UpcomingAction::Dashboard => {
            let stats = dashboard_stats(&db, today, config.windows.dashboard())?;
            print_json(&stats)?;
        }
    }
    Ok(())
}
