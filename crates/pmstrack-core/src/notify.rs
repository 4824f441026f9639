//! Notification fan-out.
//!
//! Due-soon, expiry and weekly-report events become one inbox row per
//! recipient. Delivery is best-effort: a failed row is counted and logged,
//! never retried, and does not stop the rest of the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::error::{CoreError, Result};
use crate::storage::{NotificationSink, RecipientDirectory};

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Technician,
    Viewer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "technician" => Some(Role::Technician),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Technician => "technician",
            Role::Viewer => "viewer",
        }
    }
}

/// Roles that receive maintenance notifications unless configured otherwise.
pub const OPERATIONAL_ROLES: [Role; 2] = [Role::Technician, Role::Admin];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    MaintenanceReminder,
    ContractExpired,
    WeeklyReport,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::MaintenanceReminder => "maintenance_reminder",
            NotificationKind::ContractExpired => "contract_expired",
            NotificationKind::WeeklyReport => "weekly_report",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "maintenance_reminder" => Some(NotificationKind::MaintenanceReminder),
            "contract_expired" => Some(NotificationKind::ContractExpired),
            "weekly_report" => Some(NotificationKind::WeeklyReport),
            _ => None,
        }
    }
}

/// What gets written to each recipient's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub contract_id: Option<String>,
}

impl NotificationPayload {
    pub fn maintenance_reminder(contract: &Contract) -> Self {
        let due = contract
            .next_due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "an unscheduled date".to_string());
        Self {
            title: format!("Upcoming Maintenance - {}", contract.sq),
            message: format!(
                "Maintenance is due for {} contract {} on {}",
                contract.class, contract.sq, due
            ),
            kind: NotificationKind::MaintenanceReminder,
            contract_id: Some(contract.id.clone()),
        }
    }

    pub fn contract_expired(contract: &Contract) -> Self {
        let ended = contract
            .contract_end_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        Self {
            title: format!("Contract Expired - {}", contract.sq),
            message: format!(
                "{} contract {} ({}) passed its end date {} and was marked expired",
                contract.class, contract.sq, contract.end_user, ended
            ),
            kind: NotificationKind::ContractExpired,
            contract_id: Some(contract.id.clone()),
        }
    }

    pub fn weekly_report(completed: usize) -> Self {
        Self {
            title: "Weekly Maintenance Report".to_string(),
            message: format!("Weekly report: {completed} maintenance tasks completed this week"),
            kind: NotificationKind::WeeklyReport,
            contract_id: None,
        }
    }
}

/// A stored inbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub contract_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Counts from one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.recipients += other.recipients;
        self.delivered += other.delivered;
        self.failed += other.failed;
    }

    /// `PartialFailure` when any row failed, otherwise the report itself.
    pub fn into_result(self, operation: &str) -> Result<Self> {
        if self.failed > 0 {
            Err(CoreError::PartialFailure {
                operation: operation.to_string(),
                succeeded: self.delivered,
                failed: self.failed,
            })
        } else {
            Ok(self)
        }
    }
}

/// Sends a payload to every user holding one of the configured roles.
pub struct NotificationDispatcher<'a> {
    directory: &'a dyn RecipientDirectory,
    sink: &'a dyn NotificationSink,
    roles: Vec<Role>,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(directory: &'a dyn RecipientDirectory, sink: &'a dyn NotificationSink) -> Self {
        Self {
            directory,
            sink,
            roles: OPERATIONAL_ROLES.to_vec(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    /// Fan `payload` out to all recipients.
    ///
    /// # Errors
    /// Only when the recipient list itself cannot be read. Per-recipient
    /// failures are counted in the report.
    pub fn dispatch(&self, payload: &NotificationPayload) -> Result<DispatchReport> {
        let recipients = self.directory.list_users_with_role(&self.roles)?;
        let mut report = DispatchReport {
            recipients: recipients.len(),
            ..DispatchReport::default()
        };

        for recipient in &recipients {
            match self.sink.enqueue_notification(recipient, payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        recipient = %recipient,
                        kind = payload.kind.as_str(),
                        "failed to enqueue notification: {e}"
                    );
                }
            }
        }

        tracing::debug!(
            kind = payload.kind.as_str(),
            delivered = report.delivered,
            failed = report.failed,
            "notification fan-out finished"
        );
        Ok(report)
    }
}
