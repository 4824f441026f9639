use clap::Subcommand;
use pmstrack_core::storage::PmsDb;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum NotificationAction {
    /// List notifications, newest first
    List {
        /// Only this user's inbox
        #[arg(long)]
        user: Option<String>,
        /// Hide read notifications
        #[arg(long)]
        unread: bool,
    },
    /// Mark a notification as read
    Read {
        /// Notification ID
        id: String,
    },
}

pub fn run(action: NotificationAction) -> CmdResult {
    let db = PmsDb::open()?;

    match action {
        NotificationAction::List { user, unread } => {
            let rows = db.list_notifications(user.as_deref(), unread)?;
            print_json(&rows)?;
        }
        NotificationAction::Read { id } => {
            db.mark_notification_read(&id)?;
            println!("ok");
        }
    }
    Ok(())
}
