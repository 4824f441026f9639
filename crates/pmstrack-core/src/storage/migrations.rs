//! Database schema migrations for pmstrack.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 4;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }
    if current_version < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!("failed to read schema_version: {e}");
        }
        0
    })
}

fn set_schema_version(tx: &rusqlite::Transaction<'_>, version: i32) -> SqliteResult<()> {
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: contracts and their append-only service history.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS contracts (
            id                   TEXT PRIMARY KEY,
            class                TEXT NOT NULL,
            sq                   TEXT,
            end_user             TEXT NOT NULL DEFAULT '',
            equipment_ref        TEXT NOT NULL DEFAULT '',
            serial               TEXT NOT NULL DEFAULT '',
            branch               TEXT NOT NULL DEFAULT '',
            technical_specialist TEXT NOT NULL DEFAULT '',
            po_number            TEXT NOT NULL DEFAULT '',
            contract_date        TEXT,
            contract_end_date    TEXT,
            next_due_date        TEXT,
            status               TEXT NOT NULL DEFAULT 'active',
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS service_events (
            id             TEXT PRIMARY KEY,
            contract_id    TEXT NOT NULL,
            contract_class TEXT NOT NULL,
            service_date   TEXT NOT NULL,
            service_type   TEXT NOT NULL DEFAULT 'PMS',
            description    TEXT NOT NULL,
            technician     TEXT NOT NULL,
            outcome        TEXT NOT NULL,
            service_report TEXT,
            sr_number      TEXT,
            created_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_contracts_class_created ON contracts(class, created_at);
        CREATE INDEX IF NOT EXISTS idx_contracts_next_due ON contracts(next_due_date);
        CREATE INDEX IF NOT EXISTS idx_service_events_contract
            ON service_events(contract_id, service_date);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: users and the notification inbox.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id         TEXT PRIMARY KEY,
            email      TEXT NOT NULL UNIQUE,
            full_name  TEXT NOT NULL DEFAULT '',
            role       TEXT NOT NULL,
            is_active  INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id                TEXT PRIMARY KEY,
            user_id           TEXT NOT NULL,
            title             TEXT NOT NULL,
            message           TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            contract_id       TEXT,
            is_read           INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: sweep leases guarding the periodic lifecycle jobs.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sweep_leases (
            kind        TEXT PRIMARY KEY,
            holder      TEXT,
            expires_at  TEXT,
            last_run_at TEXT
        );",
    )?;

    set_schema_version(&tx, 3)?;
    tx.commit()
}

/// Migration v4: per-contract reminder marker for the due-soon sweep.
fn migrate_v4(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    let has_column: bool = tx
        .prepare("PRAGMA table_info(contracts)")?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<SqliteResult<Vec<_>>>()?
        .iter()
        .any(|name| name == "last_reminded_on");
    if !has_column {
        tx.execute_batch("ALTER TABLE contracts ADD COLUMN last_reminded_on TEXT;")?;
    }

    set_schema_version(&tx, 4)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('contracts', 'service_events', 'users', 'notifications',
                              'sweep_leases')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn partial_database_only_runs_missing_steps() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn v4_adds_reminder_column_to_existing_contracts() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();
        migrate_v3(&conn).unwrap();
        conn.execute(
            "INSERT INTO contracts (id, class, sq, created_at, updated_at)
             VALUES ('c1', 'label', '1', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 4);
        let reminded: Option<String> = conn
            .query_row("SELECT last_reminded_on FROM contracts WHERE id = 'c1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(reminded.is_none());
    }
}
