mod config;
pub mod migrations;
pub mod pms_db;
mod traits;

pub use config::{Config, NotificationsConfig, SweepConfig, WindowsConfig};
pub use pms_db::PmsDb;
pub use traits::{
    CompletionLedger, ContractStore, HistoryStore, NotificationSink, RecipientDirectory, SweepLock,
};

use std::path::PathBuf;

use crate::error::Result;

/// Returns `~/.config/pmstrack[-dev]/` based on PMSTRACK_ENV.
///
/// Set PMSTRACK_ENV=dev to use the development data directory, or
/// PMSTRACK_HOME to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os("PMSTRACK_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("PMSTRACK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("pmstrack-dev")
            } else {
                base_dir.join("pmstrack")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
