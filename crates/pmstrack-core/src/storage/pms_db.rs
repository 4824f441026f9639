//! SQLite-based storage for contracts, service history, users,
//! notifications and sweep leases.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::data_dir;
use super::migrations;
use super::traits::{
    CompletionLedger, ContractStore, HistoryStore, NotificationSink, RecipientDirectory, SweepLock,
};
use crate::contract::sequence::{
    next_sq, plan_backfill, plan_resequence, sq_sort_key, SequenceReport, SqRow,
};
use crate::contract::{
    Contract, ContractClass, ContractPatch, ContractStatus, NewContract, ServiceEvent,
    ServiceOutcome,
};
use crate::error::{CoreError, DatabaseError, Result};
use crate::lifecycle::SweepKind;
use crate::notify::{Notification, NotificationKind, NotificationPayload, Role, User};
use crate::pms::dates::{add_cadence, parse_date};

const CONTRACT_COLUMNS: &str = "id, class, sq, end_user, equipment_ref, serial, branch, \
     technical_specialist, po_number, contract_date, contract_end_date, next_due_date, \
     status, created_at, updated_at, last_reminded_on";

const EVENT_COLUMNS: &str = "id, contract_id, contract_class, service_date, service_type, \
     description, technician, outcome, service_report, sr_number, created_at";

// === Helper Functions ===

/// Parse contract status from database string
fn parse_contract_status(status_str: &str) -> ContractStatus {
    ContractStatus::parse(status_str).unwrap_or_default()
}

/// Parse service outcome from database string
fn parse_outcome(outcome_str: &str) -> ServiceOutcome {
    match outcome_str {
        "completed" => ServiceOutcome::Completed,
        _ => ServiceOutcome::Pending,
    }
}

/// Parse role from database string
fn parse_role(role_str: &str) -> Role {
    Role::parse(role_str).unwrap_or(Role::Viewer)
}

/// Parse notification type from database string
fn parse_notification_kind(kind_str: &str) -> NotificationKind {
    NotificationKind::parse(kind_str).unwrap_or(NotificationKind::MaintenanceReminder)
}

/// Format a calendar date for database storage
fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse an optional date column, tolerating legacy date-time text
fn parse_date_column(raw: Option<String>) -> Option<NaiveDate> {
    raw.as_deref().and_then(parse_date)
}

/// Format a timestamp so that text order matches time order
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse datetime from RFC3339 string with fallback to current time
fn parse_datetime_fallback(dt_str: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Build a Contract from a row selected with `CONTRACT_COLUMNS`
fn row_to_contract(row: &rusqlite::Row) -> Result<Contract, rusqlite::Error> {
    let class_str: String = row.get(1)?;
    let status_str: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok(Contract {
        id: row.get(0)?,
        class: ContractClass::parse(&class_str),
        sq: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        end_user: row.get(3)?,
        equipment_ref: row.get(4)?,
        serial: row.get(5)?,
        branch: row.get(6)?,
        technical_specialist: row.get(7)?,
        po_number: row.get(8)?,
        contract_date: parse_date_column(row.get(9)?),
        contract_end_date: parse_date_column(row.get(10)?),
        next_due_date: parse_date_column(row.get(11)?),
        status: parse_contract_status(&status_str),
        created_at: parse_datetime_fallback(&created_at),
        updated_at: parse_datetime_fallback(&updated_at),
        last_reminded_on: parse_date_column(row.get(15)?),
    })
}

/// Build a ServiceEvent from a row selected with `EVENT_COLUMNS`
fn row_to_service_event(row: &rusqlite::Row) -> Result<ServiceEvent, rusqlite::Error> {
    let class_str: String = row.get(2)?;
    let service_date: String = row.get(3)?;
    let outcome_str: String = row.get(7)?;
    let created_at: String = row.get(10)?;

    Ok(ServiceEvent {
        id: row.get(0)?,
        contract_id: row.get(1)?,
        contract_class: ContractClass::parse(&class_str),
        service_date: parse_date(&service_date).unwrap_or_default(),
        service_type: row.get(4)?,
        description: row.get(5)?,
        technician: row.get(6)?,
        outcome: parse_outcome(&outcome_str),
        service_report: row.get(8)?,
        sr_number: row.get(9)?,
        created_at: parse_datetime_fallback(&created_at),
    })
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    let role_str: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        role: parse_role(&role_str),
        is_active: row.get(4)?,
        created_at: parse_datetime_fallback(&created_at),
    })
}

fn row_to_notification(row: &rusqlite::Row) -> Result<Notification, rusqlite::Error> {
    let kind_str: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        kind: parse_notification_kind(&kind_str),
        contract_id: row.get(5)?,
        is_read: row.get(6)?,
        created_at: parse_datetime_fallback(&created_at),
    })
}

fn contract_not_found(class: Option<ContractClass>, id: &str) -> CoreError {
    match class {
        Some(class) => CoreError::not_found(format!("{class} contract"), id),
        None => CoreError::not_found("contract", id),
    }
}

/// SQLite database for PMS contract storage.
///
/// Implements every store trait the scheduling engine consumes.
pub struct PmsDb {
    conn: Connection,
}

impl PmsDb {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/pmstrack/pmstrack.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(data_dir()?.join("pmstrack.db"))
    }

    /// Open the database at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|source| DatabaseError::OpenFailed { path, source })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        migrations::migrate(&self.conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()).into())
    }

    /// Run `body` inside `BEGIN IMMEDIATE`, committing on success and
    /// rolling back on any error.
    fn in_transaction<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        match body() {
            Ok(value) => {
                if let Err(err) = self.conn.execute_batch("COMMIT;") {
                    let _ = self.conn.execute_batch("ROLLBACK;");
                    return Err(err.into());
                }
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }

    // === Contract CRUD ===

    /// Create a contract, assigning the next SQ and seeding the first due
    /// date from the contract date when the caller did not supply them.
    ///
    /// # Errors
    /// `InvalidInput` for a class that cannot be stored.
    pub fn create_contract(&self, new: &NewContract, now: DateTime<Utc>) -> Result<Contract> {
        if !new.class.is_stored() {
            return Err(CoreError::invalid_input(format!(
                "contracts must be hardware or label, got {}",
                new.class
            )));
        }

        let next_due = new
            .next_due_date
            .or_else(|| new.contract_date.and_then(|d| add_cadence(d, new.class)));

        let contract = self.in_transaction(|| {
            let sq = match new.sq.as_deref().map(str::trim) {
                Some(sq) if !sq.is_empty() => sq.to_string(),
                _ => next_sq(self.last_sq(new.class)?.as_deref()),
            };

            let contract = Contract {
                id: Uuid::new_v4().to_string(),
                class: new.class,
                sq,
                end_user: new.end_user.clone(),
                equipment_ref: new.equipment_ref.clone(),
                serial: new.serial.clone(),
                branch: new.branch.clone(),
                technical_specialist: new.technical_specialist.clone(),
                po_number: new.po_number.clone(),
                contract_date: new.contract_date,
                contract_end_date: new.contract_end_date,
                next_due_date: next_due,
                last_reminded_on: None,
                status: new.status.unwrap_or_default(),
                created_at: now,
                updated_at: now,
            };

            self.conn.execute(
                &format!(
                    "INSERT INTO contracts ({CONTRACT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    contract.id,
                    contract.class.as_str(),
                    contract.sq,
                    contract.end_user,
                    contract.equipment_ref,
                    contract.serial,
                    contract.branch,
                    contract.technical_specialist,
                    contract.po_number,
                    contract.contract_date.map(format_date),
                    contract.contract_end_date.map(format_date),
                    contract.next_due_date.map(format_date),
                    contract.status.as_str(),
                    format_datetime(contract.created_at),
                    format_datetime(contract.updated_at),
                    contract.last_reminded_on.map(format_date),
                ],
            )?;
            Ok(contract)
        })?;

        tracing::info!(
            contract_id = %contract.id,
            class = contract.class.as_str(),
            sq = %contract.sq,
            "contract created"
        );
        Ok(contract)
    }

    /// Get a contract by id.
    pub fn get_contract(&self, id: &str) -> Result<Option<Contract>> {
        let contract = self
            .conn
            .query_row(
                &format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = ?1"),
                params![id],
                row_to_contract,
            )
            .optional()?;
        Ok(contract)
    }

    /// List contracts sorted by numeric SQ (non-numeric SQs last), then
    /// creation order.
    pub fn list_contracts_by(
        &self,
        class: Option<ContractClass>,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts
             WHERE (?1 IS NULL OR class = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at, rowid"
        ))?;
        let mut contracts = stmt
            .query_map(
                params![class.map(|c| c.as_str()), status.map(|s| s.as_str())],
                row_to_contract,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // Stable sort keeps creation order among equal keys.
        contracts.sort_by_key(|c| (c.class.as_str(), sq_sort_key(&c.sq)));
        Ok(contracts)
    }

    /// Every contract of every stored class, in creation order.
    pub fn list_all_contracts(&self) -> Result<Vec<Contract>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts ORDER BY created_at, rowid"
        ))?;
        let contracts = stmt
            .query_map([], row_to_contract)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contracts)
    }

    /// Delete a contract. Its service history is left in place.
    ///
    /// # Errors
    /// `NotFound` if no contract has this id.
    pub fn delete_contract(&self, id: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM contracts WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(contract_not_found(None, id));
        }
        tracing::info!(contract_id = %id, "contract deleted");
        Ok(())
    }

    /// Administrative status change.
    pub fn set_contract_status(&self, id: &str, status: ContractStatus) -> Result<Contract> {
        let contract = self.update_contract_fields(id, &ContractPatch::status(status))?;
        tracing::info!(contract_id = %id, status = status.as_str(), "contract status changed");
        Ok(contract)
    }

    // === SQ allocation ===

    /// SQ of the most recently created contract in `class`.
    pub fn last_sq(&self, class: ContractClass) -> Result<Option<String>> {
        let sq = self
            .conn
            .query_row(
                "SELECT sq FROM contracts WHERE class = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![class.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(sq.flatten())
    }

    /// SQ to hand out to the next contract of `class`.
    pub fn next_sq(&self, class: ContractClass) -> Result<String> {
        Ok(next_sq(self.last_sq(class)?.as_deref()))
    }

    /// Ids and SQs of `class`, in creation order.
    pub fn sq_rows(&self, class: ContractClass) -> Result<Vec<SqRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sq FROM contracts WHERE class = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map(params![class.as_str()], |row| {
                Ok(SqRow {
                    id: row.get(0)?,
                    sq: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn write_sq(&self, id: &str, sq: &str, now: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE contracts SET sq = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, sq, now],
        )?;
        Ok(changed > 0)
    }

    /// Give numbers to rows with a missing or non-numeric SQ. All or nothing.
    pub fn backfill_sq(&self, class: ContractClass) -> Result<SequenceReport> {
        let rows = self.sq_rows(class)?;
        let plan = plan_backfill(&rows);
        let now = format_datetime(Utc::now());

        let updated = self.in_transaction(|| {
            let mut updated = 0;
            for (id, sq) in &plan {
                if self.write_sq(id, sq, &now)? {
                    updated += 1;
                }
            }
            Ok(updated)
        })?;

        tracing::info!(class = class.as_str(), updated, total = rows.len(), "SQ backfill finished");
        Ok(SequenceReport {
            updated,
            failed: 0,
            total: rows.len(),
        })
    }

    /// Rewrite every SQ in `class` to `1..N` by creation order.
    ///
    /// Rows are written one at a time.
    ///
    /// # Errors
    /// `PartialFailure` if any row could not be rewritten.
    pub fn resequence_sq(&self, class: ContractClass) -> Result<SequenceReport> {
        let rows = self.sq_rows(class)?;
        let plan = plan_resequence(&rows);
        let now = format_datetime(Utc::now());

        let mut report = SequenceReport {
            total: rows.len(),
            ..SequenceReport::default()
        };
        for (id, sq) in &plan {
            match self.write_sq(id, sq, &now) {
                Ok(true) => report.updated += 1,
                Ok(false) => {
                    report.failed += 1;
                    tracing::error!(contract_id = %id, "contract vanished during resequence");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(contract_id = %id, "failed to resequence contract: {e}");
                }
            }
        }

        tracing::info!(
            class = class.as_str(),
            updated = report.updated,
            failed = report.failed,
            "SQ resequence finished"
        );
        if report.failed > 0 {
            return Err(CoreError::PartialFailure {
                operation: format!("{class} resequence"),
                succeeded: report.updated,
                failed: report.failed,
            });
        }
        Ok(report)
    }

    // === Service history ===

    /// A contract's service events, oldest first.
    pub fn list_service_events(&self, contract_id: &str) -> Result<Vec<ServiceEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM service_events WHERE contract_id = ?1
             ORDER BY service_date, created_at"
        ))?;
        let events = stmt
            .query_map(params![contract_id], row_to_service_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    // === Users ===

    /// # Errors
    /// `InvalidInput` if the email is blank or already registered.
    pub fn create_user(
        &self,
        email: &str,
        full_name: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(CoreError::invalid_input("email is required"));
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            role,
            is_active: true,
            created_at: now,
        };
        self.conn
            .execute(
                "INSERT INTO users (id, email, full_name, role, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.email,
                    user.full_name,
                    user.role.as_str(),
                    user.is_active,
                    format_datetime(user.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    CoreError::invalid_input(format!("user {email} already exists"))
                } else {
                    e.into()
                }
            })?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, full_name, role, is_active, created_at
             FROM users ORDER BY created_at, rowid",
        )?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    // === Notifications ===

    /// Inbox rows, newest first.
    pub fn list_notifications(
        &self,
        user_id: Option<&str>,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, message, notification_type, contract_id, is_read, created_at
             FROM notifications
             WHERE (?1 IS NULL OR user_id = ?1) AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id, unread_only], row_to_notification)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// # Errors
    /// `NotFound` if no notification has this id.
    pub fn mark_notification_read(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(CoreError::not_found("notification", id));
        }
        Ok(())
    }
}

impl ContractStore for PmsDb {
    fn fetch_contract(&self, id: &str) -> Result<Contract> {
        self.get_contract(id)?
            .ok_or_else(|| contract_not_found(None, id))
    }

    fn fetch_contracts_by_status(
        &self,
        class: ContractClass,
        excluded: ContractStatus,
    ) -> Result<Vec<Contract>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts
             WHERE class = ?1 AND status != ?2
             ORDER BY created_at, rowid"
        ))?;
        let contracts = stmt
            .query_map(params![class.as_str(), excluded.as_str()], row_to_contract)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contracts)
    }

    fn list_contracts(&self, class: ContractClass) -> Result<Vec<Contract>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE class = ?1 ORDER BY created_at, rowid"
        ))?;
        let contracts = stmt
            .query_map(params![class.as_str()], row_to_contract)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contracts)
    }

    fn update_contract_fields(&self, id: &str, patch: &ContractPatch) -> Result<Contract> {
        if patch.is_empty() {
            return self.fetch_contract(id);
        }
        let changed = self.conn.execute(
            "UPDATE contracts SET
                sq = COALESCE(?2, sq),
                status = COALESCE(?3, status),
                next_due_date = COALESCE(?4, next_due_date),
                contract_end_date = COALESCE(?5, contract_end_date),
                last_reminded_on = COALESCE(?6, last_reminded_on),
                updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                patch.sq,
                patch.status.map(|s| s.as_str()),
                patch.next_due_date.map(format_date),
                patch.contract_end_date.map(format_date),
                patch.last_reminded_on.map(format_date),
                format_datetime(Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(contract_not_found(None, id));
        }
        self.fetch_contract(id)
    }
}

impl PmsDb {
    fn insert_service_event(&self, event: &ServiceEvent) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO service_events ({EVENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                event.id,
                event.contract_id,
                event.contract_class.as_str(),
                format_date(event.service_date),
                event.service_type,
                event.description,
                event.technician,
                event.outcome.as_str(),
                event.service_report,
                event.sr_number,
                format_datetime(event.created_at),
            ],
        )?;
        Ok(())
    }
}

impl HistoryStore for PmsDb {
    fn append_service_event(&self, event: &ServiceEvent) -> Result<String> {
        self.insert_service_event(event)?;
        Ok(event.id.clone())
    }

    fn latest_completion(&self, contract_id: &str) -> Result<Option<ServiceEvent>> {
        let event = self
            .conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM service_events
                     WHERE contract_id = ?1 AND outcome = ?2
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![contract_id, ServiceOutcome::Completed.as_str()],
                row_to_service_event,
            )
            .optional()?;
        Ok(event)
    }

    fn count_service_events_with_outcome(&self, outcome: ServiceOutcome) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM service_events WHERE outcome = ?1",
            params![outcome.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_service_events_since(&self, since: NaiveDate) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM service_events WHERE service_date >= ?1",
            params![format_date(since)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl CompletionLedger for PmsDb {
    fn commit_completion(
        &self,
        event: &ServiceEvent,
        next_due: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<String> {
        self.in_transaction(|| {
            self.insert_service_event(event)?;
            let changed = self.conn.execute(
                "UPDATE contracts SET next_due_date = ?2, updated_at = ?3
                 WHERE id = ?1 AND class = ?4",
                params![
                    event.contract_id,
                    format_date(next_due),
                    format_datetime(at),
                    event.contract_class.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(contract_not_found(
                    Some(event.contract_class),
                    &event.contract_id,
                ));
            }
            Ok(event.id.clone())
        })
    }
}

impl NotificationSink for PmsDb {
    fn enqueue_notification(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO notifications
                (id, user_id, title, message, notification_type, contract_id, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                Uuid::new_v4().to_string(),
                recipient_id,
                payload.title,
                payload.message,
                payload.kind.as_str(),
                payload.contract_id,
                format_datetime(Utc::now()),
            ],
        )?;
        Ok(())
    }
}

impl RecipientDirectory for PmsDb {
    fn list_users_with_role(&self, roles: &[Role]) -> Result<Vec<String>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; roles.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM users WHERE role IN ({placeholders}) ORDER BY created_at, rowid"
        ))?;
        let ids = stmt
            .query_map(params_from_iter(roles.iter().map(|r| r.as_str())), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

impl SweepLock for PmsDb {
    fn try_acquire(
        &self,
        kind: SweepKind,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            CoreError::InvalidInput(format!("lease ttl of {}s overflows", ttl.num_seconds()))
        })?;
        let changed = self.conn.execute(
            "INSERT INTO sweep_leases (kind, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
             WHERE sweep_leases.holder IS NULL
                OR sweep_leases.holder = excluded.holder
                OR sweep_leases.expires_at IS NULL
                OR sweep_leases.expires_at <= ?4",
            params![
                kind.as_str(),
                holder,
                format_datetime(expires_at),
                format_datetime(now),
            ],
        )?;
        Ok(changed > 0)
    }

    fn release(&self, kind: SweepKind, holder: &str, finished_at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sweep_leases SET holder = NULL, expires_at = NULL, last_run_at = ?3
             WHERE kind = ?1 AND holder = ?2",
            params![kind.as_str(), holder, format_datetime(finished_at)],
        )?;
        if changed == 0 {
            tracing::warn!(
                kind = kind.as_str(),
                holder,
                "lease was taken over before release"
            );
        }
        Ok(())
    }

    fn current_holder(&self, kind: SweepKind, now: DateTime<Utc>) -> Result<Option<String>> {
        let holder = self
            .conn
            .query_row(
                "SELECT holder FROM sweep_leases
                 WHERE kind = ?1 AND holder IS NOT NULL AND expires_at > ?2",
                params![kind.as_str(), format_datetime(now)],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(holder)
    }

    fn last_run(&self, kind: SweepKind) -> Result<Option<DateTime<Utc>>> {
        let last = self
            .conn
            .query_row(
                "SELECT last_run_at FROM sweep_leases WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(last.flatten().map(|s| parse_datetime_fallback(&s)))
    }
}
