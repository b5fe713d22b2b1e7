//! Analytics store writer.
//!
//! The analytics store is a self-contained, read-optimized SQLite file
//! rebuilt from scratch on every export. It is a projection of the
//! canonical store, never a source of truth, so durability pragmas are
//! traded away for write speed.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::domain::{AppError, Result};

/// Rows per insert transaction.
pub const INSERT_BATCH: usize = 5_000;

/// One projected frequency row for the `monthly` or `yearly` table.
#[derive(Debug, Clone)]
pub struct FreqOut {
    pub term_id: i64,
    pub min_sent_len: u8,
    /// Unix seconds of the bucket start; 0 is the all-time sentinel.
    pub day: i64,
    pub hits: u64,
    pub authors: u64,
}

/// One projected totals row.
#[derive(Debug, Clone)]
pub struct TotalOut {
    pub day: i64,
    pub term_len: u8,
    pub min_sent_len: u8,
    pub hits: u64,
    pub authors: u64,
}

/// Writer over a fresh analytics file.
pub struct AnalyticsStore {
    conn: Connection,
    path: PathBuf,
}

impl AnalyticsStore {
    /// Create the analytics store at `path`, replacing any previous file.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| AppError::io("failed to replace analytics file", e))?;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::io("failed to create analytics directory", e))?;
            }
        }

        let conn = Connection::open(path).map_err(AppError::database)?;
        // page_size must land before the first table is created
        conn.execute_batch(
            "PRAGMA page_size = 65536;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = OFF;
             PRAGMA journal_mode = MEMORY;
             PRAGMA cache_size = 20000;",
        )
        .map_err(AppError::database)?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing analytics file (for postprocessing the trimmed copy).
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open(path).map_err(AppError::database)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = OFF;
             PRAGMA journal_mode = MEMORY;
             PRAGMA cache_size = 20000;",
        )
        .map_err(AppError::database)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            CREATE TABLE term (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                len INTEGER NOT NULL,
                text TEXT UNIQUE NOT NULL
            );

            CREATE TABLE monthly (
                term_id INTEGER NOT NULL REFERENCES term(id),
                min_sent_len INTEGER NOT NULL,
                day INTEGER NOT NULL,
                hits INTEGER NOT NULL,
                authors INTEGER NOT NULL,
                PRIMARY KEY (term_id, min_sent_len, day)
            ) WITHOUT ROWID;

            -- day 0 is the all-time sentinel
            CREATE TABLE yearly (
                term_id INTEGER NOT NULL REFERENCES term(id),
                min_sent_len INTEGER NOT NULL,
                day INTEGER NOT NULL,
                hits INTEGER NOT NULL,
                authors INTEGER NOT NULL,
                PRIMARY KEY (term_id, min_sent_len, day)
            ) WITHOUT ROWID;

            CREATE TABLE total_monthly (
                day INTEGER NOT NULL,
                term_len INTEGER NOT NULL,
                min_sent_len INTEGER NOT NULL,
                hits INTEGER NOT NULL,
                authors INTEGER NOT NULL,
                PRIMARY KEY (term_len, min_sent_len, day)
            ) WITHOUT ROWID;

            CREATE TABLE total_yearly (
                day INTEGER NOT NULL,
                term_len INTEGER NOT NULL,
                min_sent_len INTEGER NOT NULL,
                hits INTEGER NOT NULL,
                authors INTEGER NOT NULL,
                PRIMARY KEY (term_len, min_sent_len, day)
            ) WITHOUT ROWID;
            ",
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Upsert a term, returning its analytics-store id.
    pub fn upsert_term(&mut self, text: &str, len: u8) -> Result<i64> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO term (len, text) VALUES (?1, ?2)",
                params![i64::from(len), text],
            )
            .map_err(AppError::database)?;
        self.conn
            .query_row("SELECT id FROM term WHERE text = ?1", [text], |row| {
                row.get(0)
            })
            .map_err(AppError::database)
    }

    /// Insert frequency rows into `monthly` or `yearly`, batched into
    /// transactions.
    pub fn insert_freqs(&mut self, table: FreqTable, rows: &[FreqOut]) -> Result<()> {
        let sql = match table {
            FreqTable::Monthly => {
                "INSERT OR REPLACE INTO monthly (term_id, min_sent_len, day, hits, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            }
            FreqTable::Yearly => {
                "INSERT OR REPLACE INTO yearly (term_id, min_sent_len, day, hits, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            }
        };
        for batch in rows.chunks(INSERT_BATCH) {
            let tx = self.conn.transaction().map_err(AppError::database)?;
            {
                let mut stmt = tx.prepare_cached(sql).map_err(AppError::database)?;
                for row in batch {
                    stmt.execute(params![
                        row.term_id,
                        i64::from(row.min_sent_len),
                        row.day,
                        row.hits as i64,
                        row.authors as i64,
                    ])
                    .map_err(AppError::database)?;
                }
            }
            tx.commit().map_err(AppError::database)?;
        }
        Ok(())
    }

    /// Insert one totals row.
    pub fn insert_total(&mut self, table: FreqTable, row: &TotalOut) -> Result<()> {
        let sql = match table {
            FreqTable::Monthly => {
                "INSERT OR REPLACE INTO total_monthly (day, term_len, min_sent_len, hits, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            }
            FreqTable::Yearly => {
                "INSERT OR REPLACE INTO total_yearly (day, term_len, min_sent_len, hits, authors)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            }
        };
        self.conn
            .execute(
                sql,
                params![
                    row.day,
                    i64::from(row.term_len),
                    i64::from(row.min_sent_len),
                    row.hits as i64,
                    row.authors as i64,
                ],
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Execute one postprocessing script.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(AppError::database)
    }

    /// Flush and close, returning the file path.
    pub fn close(self) -> Result<PathBuf> {
        let path = self.path.clone();
        self.conn
            .close()
            .map_err(|(_, e)| AppError::database(e))?;
        Ok(path)
    }

    #[cfg(test)]
    pub(crate) fn query_i64(&self, sql: &str) -> i64 {
        self.conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }
}

/// Which frequency axis a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqTable {
    Monthly,
    Yearly,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_and_batched_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.sqlite");
        let mut store = AnalyticsStore::create(&path).unwrap();

        let term = store.upsert_term("toki", 1).unwrap();
        assert_eq!(store.upsert_term("toki", 1).unwrap(), term);

        let rows: Vec<FreqOut> = (0..3)
            .map(|i| FreqOut {
                term_id: term,
                min_sent_len: 1,
                day: 1000 + i,
                hits: 10,
                authors: 2,
            })
            .collect();
        store.insert_freqs(FreqTable::Monthly, &rows).unwrap();
        store
            .insert_freqs(
                FreqTable::Yearly,
                &[FreqOut {
                    term_id: term,
                    min_sent_len: 1,
                    day: 0,
                    hits: 30,
                    authors: 2,
                }],
            )
            .unwrap();
        store
            .insert_total(
                FreqTable::Monthly,
                &TotalOut {
                    day: 1000,
                    term_len: 1,
                    min_sent_len: 1,
                    hits: 10,
                    authors: 2,
                },
            )
            .unwrap();

        assert_eq!(store.query_i64("SELECT COUNT(*) FROM monthly"), 3);
        assert_eq!(store.query_i64("SELECT hits FROM yearly WHERE day = 0"), 30);
        assert_eq!(store.query_i64("SELECT COUNT(*) FROM total_monthly"), 1);

        // recreating replaces the file wholesale
        drop(store);
        let store = AnalyticsStore::create(&path).unwrap();
        assert_eq!(store.query_i64("SELECT COUNT(*) FROM monthly"), 0);
    }

    #[test]
    fn test_page_size_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.sqlite");
        let store = AnalyticsStore::create(&path).unwrap();
        assert_eq!(store.query_i64("PRAGMA page_size"), 65536);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.sqlite");
        assert!(matches!(
            AnalyticsStore::open(&missing),
            Err(AppError::StoreNotFound { .. })
        ));
    }
}
