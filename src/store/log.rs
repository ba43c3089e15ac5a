//! SQLite-backed logs for the store and for datasets.
//!
//! Both logs live in a `log.db` file next to the images they describe. The store
//! log has one boolean column per registered conversion; a dataset log only keeps
//! `Index`, `File` and `Class`. Mutations run inside a transaction, so a failed
//! batch leaves the log as it was. Only one writer per log is supported.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use super::data::{unconverted_flags, DatasetRow, ImageRecord};
use crate::class::Class;
use crate::error::Result;
use crate::ops::Conversion;

/// File name of a log inside its root directory
pub const LOG_FILE: &str = "log.db";

fn quoted(column: &str) -> String {
    format!("\"{}\"", column)
}

/// Comma separated, quoted conversion flag columns in registry order
fn flag_columns() -> String {
    Conversion::ALL
        .iter()
        .map(|c| quoted(c.key()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The store's image registry
pub struct StoreLog {
    conn: Connection,
    db_path: PathBuf,
}

impl StoreLog {
    /// Open the log, creating the table if it does not exist yet.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut log = StoreLog {
            conn,
            db_path: db_path.to_path_buf(),
        };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&mut self) -> Result<()> {
        let flags = Conversion::ALL
            .iter()
            .map(|c| format!("{} INTEGER NOT NULL DEFAULT 0", quoted(c.key())))
            .collect::<Vec<_>>()
            .join(",\n                ");

        // AUTOINCREMENT keeps indices from ever being reused
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS log (
                \"Index\"       INTEGER PRIMARY KEY AUTOINCREMENT,
                \"File\"        TEXT NOT NULL UNIQUE,
                \"Class\"       TEXT NOT NULL,
                {}
            )",
                flags
            ),
            [],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM log", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Append new images with every flag false, returning the created records
    pub fn append(&mut self, rows: &[(String, Class)]) -> Result<Vec<ImageRecord>> {
        let tx = self.conn.transaction()?;
        let mut records = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare("INSERT INTO log (\"File\", \"Class\") VALUES (?1, ?2)")?;
            for (file, class) in rows {
                stmt.execute(params![file, class.name()])?;
                records.push(ImageRecord {
                    index: tx.last_insert_rowid(),
                    file: file.clone(),
                    class: *class,
                    flags: unconverted_flags(),
                });
            }
        }
        tx.commit()?;
        Ok(records)
    }

    /// Rename records and mark conversions as applied, keyed by index
    pub fn mark_converted(&mut self, updates: &[(i64, String, Vec<Conversion>)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (index, file, applied) in updates {
            let mut sets = vec![format!("{} = ?1", quoted("File"))];
            sets.extend(applied.iter().map(|c| format!("{} = 1", quoted(c.key()))));
            tx.execute(
                &format!("UPDATE log SET {} WHERE \"Index\" = ?2", sets.join(", ")),
                params![file, index],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Change the label of a stored image. Returns false if no such file.
    pub fn set_class(&self, file: &str, class: Class) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE log SET \"Class\" = ?1 WHERE \"File\" = ?2",
            params![class.name(), file],
        )?;
        Ok(changed > 0)
    }

    /// All records in index order
    pub fn scan(&self) -> Result<Vec<ImageRecord>> {
        let sql = format!(
            "SELECT \"Index\", \"File\", \"Class\", {} FROM log ORDER BY \"Index\"",
            flag_columns()
        );
        self.query_records(&sql, [])
    }

    pub fn get(&self, file: &str) -> Result<Option<ImageRecord>> {
        let sql = format!(
            "SELECT \"Index\", \"File\", \"Class\", {} FROM log WHERE \"File\" = ?1",
            flag_columns()
        );
        Ok(self.query_records(&sql, [file])?.pop())
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            let mut flags = Vec::with_capacity(Conversion::ALL.len());
            for i in 0..Conversion::ALL.len() {
                flags.push(row.get::<_, bool>(3 + i)?);
            }
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                flags,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (index, file, class, flags) = row?;
            records.push(ImageRecord {
                index,
                file,
                class: class.parse()?,
                flags: Conversion::ALL.into_iter().zip(flags).collect(),
            });
        }
        Ok(records)
    }
}

/// A dataset's private log
pub struct DatasetLog {
    conn: Connection,
}

impl DatasetLog {
    /// Open (or create) the log of the dataset rooted at `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let conn = Connection::open(dir.join(LOG_FILE))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS log (
                \"Index\"       INTEGER PRIMARY KEY,
                \"File\"        TEXT NOT NULL,
                \"Class\"       TEXT NOT NULL
            )",
            [],
        )?;
        Ok(DatasetLog { conn })
    }

    /// Append rows; a `None` index takes the next free one
    pub fn append(&mut self, rows: &[(Option<i64>, String, Class)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO log (\"Index\", \"File\", \"Class\") VALUES (?1, ?2, ?3)")?;
            for (index, file, class) in rows {
                stmt.execute(params![index, file, class.name()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// File names in log order
    pub fn files(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT \"File\" FROM log ORDER BY \"Index\"")?;
        let files = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(files)
    }

    /// All rows in log order. Fails on a label outside the class set.
    pub fn scan(&self) -> Result<Vec<DatasetRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT \"Index\", \"File\", \"Class\" FROM log ORDER BY \"Index\"")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(index, file, class)| -> Result<DatasetRow> {
                Ok(DatasetRow {
                    index,
                    file,
                    class: class.parse()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
impl DatasetLog {
    /// Write a label string as is, bypassing the class set
    pub(crate) fn set_class_raw(&self, file: &str, class: &str) {
        self.conn
            .execute(
                "UPDATE log SET \"Class\" = ?1 WHERE \"File\" = ?2",
                params![class, file],
            )
            .unwrap();
    }
}

impl std::fmt::Debug for StoreLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLog").field("db_path", &self.db_path).finish()
    }
}
