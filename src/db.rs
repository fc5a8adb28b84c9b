use std::path::Path;

use rusqlite::Connection;

use crate::categorizer::CategoryTable;
use crate::error::{Result, SyncError};
use crate::models::{CategoryRule, LedgerColumn, LedgerRow};
use crate::reconciler::LedgerStore;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger_rows (
    id INTEGER PRIMARY KEY,
    email_date TEXT NOT NULL,
    date_of_use TEXT NOT NULL,
    amount INTEGER NOT NULL,
    store TEXT NOT NULL DEFAULT '',
    mf_status TEXT NOT NULL DEFAULT '',
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS ledger_rows_email_date ON ledger_rows (email_date);

CREATE TABLE IF NOT EXISTS category_rules (
    id INTEGER PRIMARY KEY,
    store TEXT NOT NULL,
    major_category TEXT NOT NULL,
    minor_category TEXT NOT NULL,
    display_label TEXT NOT NULL
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// The persisted ledger and category table, in one SQLite file.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = get_connection(db_path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn row_id(&self, row: usize) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT id FROM ledger_rows ORDER BY id LIMIT 1 OFFSET ?1",
                [row as i64],
                |r| r.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => SyncError::CorruptRow {
                    row,
                    reason: "no such row".to_string(),
                },
                other => SyncError::Db(other),
            })
    }
}

impl LedgerStore for SqliteLedger {
    fn read_rows(&self) -> Result<Vec<LedgerRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT email_date, date_of_use, amount, store, mf_status FROM ledger_rows ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerRow {
                    email_date: row.get(0)?,
                    date_of_use: row.get(1)?,
                    amount: row.get(2)?,
                    store: row.get(3)?,
                    mf_status: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn append_row(&mut self, row: &LedgerRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ledger_rows (email_date, date_of_use, amount, store, mf_status) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![row.email_date, row.date_of_use, row.amount, row.store, row.mf_status],
        )?;
        Ok(())
    }

    fn update_cell(&mut self, row: usize, column: LedgerColumn, value: &str) -> Result<()> {
        let id = self.row_id(row)?;
        let sql = format!("UPDATE ledger_rows SET {} = ?1 WHERE id = ?2", column.name());
        self.conn.execute(&sql, rusqlite::params![value, id])?;
        Ok(())
    }
}

impl CategoryTable for SqliteLedger {
    fn category_rules(&self) -> Result<Vec<CategoryRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT store, major_category, minor_category, display_label FROM category_rules ORDER BY id",
        )?;
        let rules = stmt
            .query_map([], |row| {
                Ok(CategoryRule {
                    merchant: row.get(0)?,
                    major_category: row.get(1)?,
                    minor_category: row.get(2)?,
                    display_label: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}
