//! Lifecycle sweep commands for CLI.

use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;
use pmstrack_core::lifecycle::runner::SweepRunner;
use pmstrack_core::lifecycle::trigger::sweep_plan;
use pmstrack_core::pms::{detect_drift, repair_drift};
use pmstrack_core::storage::PmsDb;
use pmstrack_core::{Config, LifecycleMonitor, SweepKind, SweepSettings, SystemClock};

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum SweepAction {
    /// Notify operational users about contracts due soon
    DueSoon {
        /// Look-ahead window in days (default: windows.monitor_days)
        #[arg(long)]
        window: Option<u64>,
    },
    /// Expire contracts whose end date has passed
    Expire,
    /// Send the weekly completed-service report
    WeeklyReport,
    /// Find contracts whose due date lags their service history
    Drift {
        /// Advance lagging due dates
        #[arg(long)]
        repair: bool,
    },
    /// Fire every sweep on its schedule until interrupted
    Run,
}

pub fn run(action: SweepAction) -> CmdResult {
    let config = Config::load_or_default();
    let settings = SweepSettings::from_config(&config);

    match action {
        SweepAction::DueSoon { window } => {
            let db = PmsDb::open()?;
            let window = window.unwrap_or_else(|| config.windows.monitor());
            let report =
                LifecycleMonitor::new(&db, &SystemClock, settings).run_due_soon_scan(window)?;
            print_json(&report)?;
        }
        SweepAction::Expire => {
            let db = PmsDb::open()?;
            let report = LifecycleMonitor::new(&db, &SystemClock, settings).run_expiry_scan()?;
            print_json(&report)?;
        }
        SweepAction::WeeklyReport => {
            let db = PmsDb::open()?;
            let report = LifecycleMonitor::new(&db, &SystemClock, settings).run_weekly_report()?;
            print_json(&report)?;
        }
        SweepAction::Drift { repair } => {
            let db = PmsDb::open()?;
            let mut summary = detect_drift(&db, Utc::now())?;
            if repair && summary.has_drift() {
                // Partial failures are already counted in the summary.
                if let Err(e) = repair_drift(&db, &mut summary) {
                    tracing::warn!("drift repair incomplete: {e}");
                }
            }
            eprintln!("{}", summary.message());
            print_json(&summary)?;
        }
        SweepAction::Run => run_daemon(&config, settings)?,
    }
    Ok(())
}

fn run_daemon(config: &Config, settings: SweepSettings) -> CmdResult {
    let plan = sweep_plan(&config.sweep)?;
    let window = config.windows.monitor();
    let db = PmsDb::open()?;

    let handler = move |kind: SweepKind| {
        LifecycleMonitor::new(&db, &SystemClock, settings.clone()).run(kind, window)
    };
    let runner = SweepRunner::new(plan, Arc::new(SystemClock), handler);
    for (kind, at) in runner.upcoming() {
        eprintln!("{kind}: next run at {at}");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(runner.run(async {
        let _ = tokio::signal::ctrl_c().await;
    }));
    Ok(())
}
