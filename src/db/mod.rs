pub mod attachments;
pub mod invoices;

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use tracing::info;

use crate::error::Result;

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err.into())
    }

    // Several reads inside one transaction observe one snapshot.
    pub(crate) fn snapshot(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 && self.column_exists("invoices", "original_filename")? {
            self.migrate_legacy_schema_to_v1(true)?;
        } else if version == 0 && self.table_exists("invoices_legacy")? {
            self.migrate_legacy_schema_to_v1(false)?;
        } else if version == 0 {
            let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
            tx.execute_batch(SCHEMA_V1)?;
            tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
            tx.commit()?;
        } else if version == SCHEMA_VERSION {
            self.conn.execute_batch(SCHEMA_V1)?;
        } else {
            return Err(rusqlite::Error::InvalidQuery);
        }
        Ok(())
    }

    fn column_exists(&self, table: &str, column: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn table_exists(&self, table: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // First-generation databases kept the blob key in `filename`, the user's
    // name in `original_filename` and free-text labels in `attachments`.
    // `rename_first` is false when an earlier run already moved the table
    // aside and stopped before copying.
    fn migrate_legacy_schema_to_v1(&self, rename_first: bool) -> rusqlite::Result<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        if rename_first {
            tx.execute_batch("ALTER TABLE invoices RENAME TO invoices_legacy;")?;
        }
        tx.execute_batch(SCHEMA_V1)?;
        let copied = tx.execute(
            "INSERT OR IGNORE INTO invoices (
                id, stored_key, display_name, file_type, status, category, amount,
                manual_attachment_labels, notes, created_at, updated_at
            )
            SELECT
                id,
                filename,
                original_filename,
                file_type,
                COALESCE(status, 'pending'),
                category,
                amount,
                attachments,
                notes,
                created_at,
                updated_at
            FROM invoices_legacy",
            [],
        )?;
        tx.execute_batch(&format!(
            "DROP TABLE invoices_legacy;
            PRAGMA user_version = {SCHEMA_VERSION};"
        ))?;
        tx.commit()?;
        info!(rows = copied, "migrated legacy invoice table");
        Ok(())
    }
}

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS invoices (
        id TEXT PRIMARY KEY,
        stored_key TEXT NOT NULL,
        display_name TEXT NOT NULL,
        file_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        category TEXT,
        amount REAL,
        manual_attachment_labels TEXT,
        notes TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_invoices_status_created
        ON invoices(status, created_at);

    CREATE TABLE IF NOT EXISTS attachment_edges (
        id TEXT PRIMARY KEY,
        invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
        attachment_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        CHECK (invoice_id <> attachment_id),
        UNIQUE(invoice_id, attachment_id)
    );

    CREATE INDEX IF NOT EXISTS idx_attachment_edges_attachment
        ON attachment_edges(attachment_id);
";

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
