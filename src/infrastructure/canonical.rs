//! Canonical store gateway.
//!
//! The canonical store is the write-optimized source of truth for every
//! persisted entity: platforms, communities, authors, messages with their
//! sentences, and accumulated frequencies. This gateway exposes typed
//! operations over an embedded SQLite backend and owns process-local
//! read-through caches for the natural-key upserts, so ingesting a million
//! messages doesn't make a million community lookups.
//!
//! All writes are idempotent under the natural keys: message conflicts are
//! absorbed, frequency hits are replaced and author sets unioned. Reruns
//! resume cleanly from whatever state is already present.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::application::counter::{LONG_SENTENCE_LEN, MIN_HITS_NEEDED, MIN_SENTS_NEEDED};
use crate::domain::{
    AppError, Author, CommSentence, Community, FrequencyRow, Message, Platform, RawMessage,
    Result, StoreId, PASSING_SCORE,
};

/// Transient failures are retried with exponential backoff before the run
/// gives up.
const MAX_RETRIES: u32 = 25;
const RETRY_BASE_MS: u64 = 10;
const RETRY_CAP_MS: u64 = 5_000;

/// Store a 128-bit id as a big-endian blob; SQLite integers stop at 64 bits.
fn id_blob(id: u128) -> [u8; 16] {
    id.to_be_bytes()
}

/// Run a store write, retrying transient failures.
fn with_retries<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = RETRY_BASE_MS;
    for attempt in 1..=MAX_RETRIES {
        match f() {
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                tracing::debug!("transient store error (attempt {attempt}): {e}");
                std::thread::sleep(Duration::from_millis(delay));
                delay = (delay * 2).min(RETRY_CAP_MS);
            }
            other => return other,
        }
    }
    unreachable!("retry loop always returns on the last attempt")
}

/// Aggregated frequency for one term over a date range.
#[derive(Debug, Clone)]
pub struct TermFreq {
    pub text: String,
    pub len: u8,
    pub hits: u64,
    /// Distinct non-trivial authors in the range.
    pub authors: u64,
}

/// Typed gateway over the canonical store.
pub struct CanonicalStore {
    conn: Connection,
    platform_cache: HashSet<Platform>,
    community_cache: HashMap<(Platform, u128), StoreId>,
    author_cache: HashMap<(Platform, u128, String), StoreId>,
}

impl CanonicalStore {
    /// Open or create the canonical store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("failed to create store directory", e))?;
        }
        let conn = Connection::open(path).map_err(AppError::database)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::database)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(AppError::database)?;

        let store = Self {
            conn,
            platform_cache: HashSet::new(),
            community_cache: HashMap::new(),
            author_cache: HashMap::new(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            CREATE TABLE IF NOT EXISTS platform (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS community (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform INTEGER NOT NULL REFERENCES platform(id),
                ext_id BLOB NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (platform, ext_id)
            );

            -- name participates in the key: the same numeric id under a
            -- changed display name is treated as a distinct author row
            CREATE TABLE IF NOT EXISTS author (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform INTEGER NOT NULL REFERENCES platform(id),
                ext_id BLOB NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                is_bot INTEGER NOT NULL DEFAULT 0,
                is_webhook INTEGER NOT NULL DEFAULT 0,
                num_tp_sentences INTEGER NOT NULL DEFAULT 0,
                UNIQUE (platform, ext_id, name)
            );

            CREATE TABLE IF NOT EXISTS message (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                community INTEGER NOT NULL REFERENCES community(id),
                ext_id BLOB NOT NULL,
                container BLOB NOT NULL,
                author INTEGER NOT NULL REFERENCES author(id),
                postdate INTEGER NOT NULL,
                content TEXT NOT NULL,
                score REAL NOT NULL,
                is_counted INTEGER NOT NULL,
                UNIQUE (community, ext_id)
            );
            CREATE INDEX IF NOT EXISTS idx_message_postdate ON message(postdate);
            CREATE INDEX IF NOT EXISTS idx_message_author ON message(author);

            CREATE TABLE IF NOT EXISTS sentence (
                message INTEGER NOT NULL REFERENCES message(id) ON DELETE CASCADE,
                pos INTEGER NOT NULL,
                words TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY (message, pos)
            );

            CREATE TABLE IF NOT EXISTS term (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL UNIQUE,
                len INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS frequency (
                term INTEGER NOT NULL REFERENCES term(id),
                community INTEGER NOT NULL REFERENCES community(id),
                attr INTEGER NOT NULL,
                min_sent_len INTEGER NOT NULL,
                day INTEGER NOT NULL,
                hits INTEGER NOT NULL,
                PRIMARY KEY (term, community, attr, min_sent_len, day)
            ) WITHOUT ROWID;

            CREATE TABLE IF NOT EXISTS frequency_author (
                term INTEGER NOT NULL,
                community INTEGER NOT NULL,
                attr INTEGER NOT NULL,
                min_sent_len INTEGER NOT NULL,
                day INTEGER NOT NULL,
                author INTEGER NOT NULL REFERENCES author(id),
                PRIMARY KEY (term, community, attr, min_sent_len, day, author)
            ) WITHOUT ROWID;
            ",
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Stored platform id, or none if the platform was never inserted.
    pub fn select_platform(&self, platform: Platform) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM platform WHERE id = ?1",
                [i64::from(platform)],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::database)
    }

    /// Upsert a platform; cheap after the first call thanks to the cache.
    pub fn insert_platform(&mut self, platform: Platform) -> Result<i64> {
        if !self.platform_cache.contains(&platform) {
            if self.select_platform(platform)?.is_none() {
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO platform (id, name) VALUES (?1, ?2)",
                        params![i64::from(platform), platform.to_string()],
                    )
                    .map_err(AppError::database)?;
            }
            self.platform_cache.insert(platform);
        }
        Ok(i64::from(platform))
    }

    /// Upsert a community under its `(platform, id)` key.
    pub fn insert_community(&mut self, community: &Community) -> Result<StoreId> {
        let key = (community.platform, community.id);
        if let Some(&id) = self.community_cache.get(&key) {
            return Ok(id);
        }
        let platform = self.insert_platform(community.platform)?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO community (platform, ext_id, name) VALUES (?1, ?2, ?3)",
                params![platform, id_blob(community.id), community.name],
            )
            .map_err(AppError::database)?;
        let id: StoreId = self
            .conn
            .query_row(
                "SELECT id FROM community WHERE platform = ?1 AND ext_id = ?2",
                params![platform, id_blob(community.id)],
                |row| row.get(0),
            )
            .map_err(AppError::database)?;

        self.community_cache.insert(key, id);
        Ok(id)
    }

    /// Upsert an author under its `(platform, id, name)` key.
    pub fn insert_author(&mut self, author: &Author) -> Result<StoreId> {
        let name = author.name.clone().unwrap_or_default();
        let key = (author.platform, author.id, name.clone());
        if let Some(&id) = self.author_cache.get(&key) {
            return Ok(id);
        }
        let platform = self.insert_platform(author.platform)?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO author (platform, ext_id, name, is_bot, is_webhook)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    platform,
                    id_blob(author.id),
                    name,
                    author.is_bot,
                    author.is_webhook
                ],
            )
            .map_err(AppError::database)?;
        let id: StoreId = self
            .conn
            .query_row(
                "SELECT id FROM author WHERE platform = ?1 AND ext_id = ?2 AND name = ?3",
                params![platform, id_blob(author.id), name],
                |row| row.get(0),
            )
            .map_err(AppError::database)?;

        self.author_cache.insert(key, id);
        Ok(id)
    }

    /// Existence check under the message unique key.
    pub fn message_in_db(&mut self, pre: &RawMessage) -> Result<bool> {
        let key = (pre.community.platform, pre.community.id);
        let community = match self.community_cache.get(&key) {
            Some(&id) => id,
            None => {
                let platform = i64::from(pre.community.platform);
                let found: Option<StoreId> = self
                    .conn
                    .query_row(
                        "SELECT id FROM community WHERE platform = ?1 AND ext_id = ?2",
                        params![platform, id_blob(pre.community.id)],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(AppError::database)?;
                match found {
                    Some(id) => {
                        self.community_cache.insert(key, id);
                        id
                    }
                    None => return Ok(false),
                }
            }
        };

        self.conn
            .query_row(
                "SELECT 1 FROM message WHERE community = ?1 AND ext_id = ?2",
                params![community, id_blob(pre.id)],
                |_| Ok(()),
            )
            .optional()
            .map_err(AppError::database)
            .map(|found| found.is_some())
    }

    /// Insert a scored message with its sentences in one transaction.
    ///
    /// Returns the stored message id, or `None` when the message was
    /// already present and the conflict was absorbed.
    pub fn insert_message(&mut self, message: &Message) -> Result<Option<StoreId>> {
        let community = self.insert_community(&message.raw.community)?;
        let author = self.insert_author(&message.raw.author)?;

        with_retries(|| {
            let tx = self.conn.transaction().map_err(AppError::database)?;

            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO message
                        (community, ext_id, container, author, postdate, content, score, is_counted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        community,
                        id_blob(message.raw.id),
                        id_blob(message.raw.container),
                        author,
                        message.raw.postdate.timestamp_millis(),
                        message.raw.content,
                        message.score,
                        message.is_counted,
                    ],
                )
                .map_err(AppError::database)?;

            if inserted == 0 {
                // conflict absorbed; sentence rows were written with the
                // original insert
                tx.commit().map_err(AppError::database)?;
                return Ok(None);
            }

            let message_id = tx.last_insert_rowid();
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO sentence (message, pos, words, word_count, score)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(AppError::database)?;
                for (pos, sentence) in message.sentences.iter().enumerate() {
                    // empty sentences are never persisted
                    if sentence.words.is_empty() {
                        continue;
                    }
                    stmt.execute(params![
                        message_id,
                        pos as i64,
                        sentence.words.join(" "),
                        sentence.words.len() as i64,
                        sentence.score,
                    ])
                    .map_err(AppError::database)?;
                }
            }

            tx.commit().map_err(AppError::database)?;
            Ok(Some(message_id))
        })
    }

    /// Append one sentence to a stored message. Sentences are append-only;
    /// empty sentences are never persisted.
    pub fn insert_sentence(&mut self, message: StoreId, words: &[String], score: f64) -> Result<()> {
        if words.is_empty() {
            return Ok(());
        }
        let pos: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(pos) + 1, 0) FROM sentence WHERE message = ?1",
                [message],
                |row| row.get(0),
            )
            .map_err(AppError::database)?;
        self.conn
            .execute(
                "INSERT INTO sentence (message, pos, words, word_count, score)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![message, pos, words.join(" "), words.len() as i64, score],
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Earliest and latest message postdate, if any messages exist.
    pub fn get_msg_date_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let range: (Option<i64>, Option<i64>) = self
            .conn
            .query_row(
                "SELECT MIN(postdate), MAX(postdate) FROM message",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(AppError::database)?;

        Ok(match range {
            (Some(min), Some(max)) => DateTime::from_timestamp_millis(min)
                .zip(DateTime::from_timestamp_millis(max)),
            _ => None,
        })
    }

    /// Sentences of counted messages in `[start, end)`, filtered to the
    /// passing stream (`score >= 0.8`) or the failing one.
    pub fn counted_sents_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        passing: bool,
    ) -> Result<Vec<CommSentence>> {
        let cmp = if passing { ">=" } else { "<" };
        let sql = format!(
            "SELECT s.words, m.community, m.author
             FROM sentence s
             JOIN message m ON s.message = m.id
             WHERE m.is_counted = 1
               AND m.postdate >= ?1 AND m.postdate < ?2
               AND s.score {cmp} ?3"
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(AppError::database)?;
        let rows = stmt
            .query_map(
                params![start.timestamp_millis(), end.timestamp_millis(), PASSING_SCORE],
                |row| {
                    let words: String = row.get(0)?;
                    Ok(CommSentence {
                        words: words.split(' ').map(ToString::to_string).collect(),
                        community: row.get(1)?,
                        author: row.get(2)?,
                    })
                },
            )
            .map_err(AppError::database)?;

        let mut sentences = Vec::new();
        for row in rows {
            sentences.push(row.map_err(AppError::database)?);
        }
        Ok(sentences)
    }

    /// Upsert terms and return their store ids.
    fn upsert_terms(&mut self, rows: &[FrequencyRow]) -> Result<HashMap<String, StoreId>> {
        let tx = self.conn.transaction().map_err(AppError::database)?;
        let mut ids = HashMap::new();
        {
            let mut insert = tx
                .prepare_cached("INSERT OR IGNORE INTO term (text, len) VALUES (?1, ?2)")
                .map_err(AppError::database)?;
            let mut select = tx
                .prepare_cached("SELECT id FROM term WHERE text = ?1")
                .map_err(AppError::database)?;
            for row in rows {
                if ids.contains_key(&row.term) {
                    continue;
                }
                insert
                    .execute(params![row.term, i64::from(row.term_len)])
                    .map_err(AppError::database)?;
                let id: StoreId = select
                    .query_row([&row.term], |r| r.get(0))
                    .map_err(AppError::database)?;
                ids.insert(row.term.clone(), id);
            }
        }
        tx.commit().map_err(AppError::database)?;
        Ok(ids)
    }

    /// Upsert a batch of frequency rows: hit counts are replaced, author
    /// sets are unioned.
    pub fn insert_frequencies(&mut self, rows: &[FrequencyRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let term_ids = self.upsert_terms(rows)?;

        with_retries(|| {
            let tx = self.conn.transaction().map_err(AppError::database)?;
            {
                let mut freq = tx
                    .prepare_cached(
                        "INSERT INTO frequency (term, community, attr, min_sent_len, day, hits)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(term, community, attr, min_sent_len, day)
                         DO UPDATE SET hits = excluded.hits",
                    )
                    .map_err(AppError::database)?;
                let mut freq_author = tx
                    .prepare_cached(
                        "INSERT OR IGNORE INTO frequency_author
                            (term, community, attr, min_sent_len, day, author)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(AppError::database)?;

                for row in rows {
                    let Some(&term) = term_ids.get(&row.term) else {
                        continue;
                    };
                    freq.execute(params![
                        term,
                        row.community,
                        i64::from(u8::from(row.attr)),
                        i64::from(row.min_sent_len),
                        row.day,
                        row.hits as i64,
                    ])
                    .map_err(AppError::database)?;
                    for &author in &row.authors {
                        freq_author
                            .execute(params![
                                term,
                                row.community,
                                i64::from(u8::from(row.attr)),
                                i64::from(row.min_sent_len),
                                row.day,
                                author,
                            ])
                            .map_err(AppError::database)?;
                    }
                }
            }
            tx.commit().map_err(AppError::database)?;
            Ok(())
        })
    }

    /// Single-row convenience over [`Self::insert_frequencies`].
    pub fn insert_frequency(&mut self, row: &FrequencyRow) -> Result<()> {
        self.insert_frequencies(std::slice::from_ref(row))
    }

    /// Recompute each author's derived count of in-language long-form
    /// sentences. Runs once after ingestion.
    pub fn update_author_num_tp_sentences(&self) -> Result<()> {
        self.conn
            .execute(
                "UPDATE author SET num_tp_sentences = (
                     SELECT COUNT(*)
                     FROM sentence s
                     JOIN message m ON s.message = m.id
                     WHERE m.author = author.id
                       AND m.is_counted = 1
                       AND s.score >= ?1
                       AND s.word_count >= ?2
                 )",
                params![PASSING_SCORE, LONG_SENTENCE_LEN as i64],
            )
            .map_err(AppError::database)?;
        Ok(())
    }

    /// Terms whose cumulative all-time hits fall below the cutoff.
    ///
    /// A term's total is its hit count at `min_sent_len = len`, the least
    /// restrictive axis that sees every occurrence.
    pub fn prunable_terms(&self) -> Result<HashSet<StoreId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT f.term
                 FROM frequency f
                 JOIN term t ON f.term = t.id
                 WHERE f.attr = 0 AND f.min_sent_len = t.len
                 GROUP BY f.term
                 HAVING SUM(f.hits) < ?1",
            )
            .map_err(AppError::database)?;
        let rows = stmt
            .query_map([MIN_HITS_NEEDED as i64], |row| row.get::<_, StoreId>(0))
            .map_err(AppError::database)?;

        let mut pruned = HashSet::new();
        for row in rows {
            pruned.insert(row.map_err(AppError::database)?);
        }
        Ok(pruned)
    }

    /// Per-term aggregation over `[start, end)` for one `(len, msl)` pair:
    /// hits summed across communities and days, authors counted distinct
    /// after the non-trivial-author filter.
    pub fn term_freqs_in_range(
        &self,
        term_len: u8,
        min_sent_len: u8,
        start: i64,
        end: i64,
        exclude: &HashSet<StoreId>,
    ) -> Result<Vec<TermFreq>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT f.term, t.text, SUM(f.hits)
                 FROM frequency f
                 JOIN term t ON f.term = t.id
                 WHERE t.len = ?1 AND f.min_sent_len = ?2 AND f.attr = 0
                   AND f.day >= ?3 AND f.day < ?4
                 GROUP BY f.term",
            )
            .map_err(AppError::database)?;
        let rows = stmt
            .query_map(
                params![i64::from(term_len), i64::from(min_sent_len), start, end],
                |row| {
                    Ok((
                        row.get::<_, StoreId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map_err(AppError::database)?;

        let mut hits_by_term: Vec<(StoreId, String, u64)> = Vec::new();
        for row in rows {
            let (term, text, hits) = row.map_err(AppError::database)?;
            if exclude.contains(&term) {
                continue;
            }
            hits_by_term.push((term, text, hits.max(0) as u64));
        }

        let mut authors_stmt = self
            .conn
            .prepare_cached(
                "SELECT fa.term, COUNT(DISTINCT fa.author)
                 FROM frequency_author fa
                 JOIN term t ON fa.term = t.id
                 JOIN author a ON fa.author = a.id
                 WHERE t.len = ?1 AND fa.min_sent_len = ?2 AND fa.attr = 0
                   AND fa.day >= ?3 AND fa.day < ?4
                   AND a.num_tp_sentences >= ?5
                 GROUP BY fa.term",
            )
            .map_err(AppError::database)?;
        let rows = authors_stmt
            .query_map(
                params![
                    i64::from(term_len),
                    i64::from(min_sent_len),
                    start,
                    end,
                    MIN_SENTS_NEEDED
                ],
                |row| Ok((row.get::<_, StoreId>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(AppError::database)?;

        let mut authors_by_term: HashMap<StoreId, u64> = HashMap::new();
        for row in rows {
            let (term, count) = row.map_err(AppError::database)?;
            authors_by_term.insert(term, count.max(0) as u64);
        }

        Ok(hits_by_term
            .into_iter()
            .map(|(term, text, hits)| TermFreq {
                text,
                len: term_len,
                hits,
                authors: authors_by_term.get(&term).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Total hits across all terms of one `(len, msl)` pair in `[start, end)`.
    pub fn total_hits_in_range(
        &self,
        term_len: u8,
        min_sent_len: u8,
        start: i64,
        end: i64,
    ) -> Result<u64> {
        let total: Option<i64> = self
            .conn
            .query_row(
                "SELECT SUM(f.hits)
                 FROM frequency f
                 JOIN term t ON f.term = t.id
                 WHERE t.len = ?1 AND f.min_sent_len = ?2 AND f.attr = 0
                   AND f.day >= ?3 AND f.day < ?4",
                params![i64::from(term_len), i64::from(min_sent_len), start, end],
                |row| row.get(0),
            )
            .map_err(AppError::database)?;
        Ok(total.unwrap_or(0).max(0) as u64)
    }

    /// Distinct non-trivial authors across all terms of one `(len, msl)`
    /// pair in `[start, end)`.
    pub fn total_authors_in_range(
        &self,
        term_len: u8,
        min_sent_len: u8,
        start: i64,
        end: i64,
    ) -> Result<u64> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(DISTINCT fa.author)
                 FROM frequency_author fa
                 JOIN term t ON fa.term = t.id
                 JOIN author a ON fa.author = a.id
                 WHERE t.len = ?1 AND fa.min_sent_len = ?2 AND fa.attr = 0
                   AND fa.day >= ?3 AND fa.day < ?4
                   AND a.num_tp_sentences >= ?5",
                params![
                    i64::from(term_len),
                    i64::from(min_sent_len),
                    start,
                    end,
                    MIN_SENTS_NEEDED
                ],
                |row| row.get(0),
            )
            .map_err(AppError::database)?;
        Ok(total.max(0) as u64)
    }

    /// Message count, for run summaries.
    pub fn message_count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get::<_, i64>(0))
            .map(|c| c.max(0) as u64)
            .map_err(AppError::database)
    }

    /// Drop per-run caches so author sets and key maps don't accumulate
    /// across buckets.
    pub fn flush_caches(&mut self) {
        self.community_cache.clear();
        self.author_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timeline::ymd_utc;
    use crate::domain::{Attr, Sentence};

    fn community() -> Community {
        Community {
            id: 42,
            name: "ma pona".into(),
            platform: Platform::Discord,
        }
    }

    fn author(id: u128) -> Author {
        Author {
            id,
            name: Some(format!("jan {id}")),
            platform: Platform::Discord,
            is_bot: false,
            is_webhook: false,
        }
    }

    fn message(id: u128, author_id: u128, words: &str, score: f64) -> Message {
        Message {
            raw: RawMessage {
                id,
                community: community(),
                container: 0,
                author: author(author_id),
                postdate: ymd_utc(2023, 5, 10),
                content: words.to_string(),
            },
            score,
            is_counted: true,
            sentences: vec![Sentence {
                words: words.split_whitespace().map(ToString::to_string).collect(),
                score,
            }],
        }
    }

    #[test]
    fn test_duplicate_message_absorbed() {
        let mut store = CanonicalStore::open_in_memory().unwrap();

        let first = store.insert_message(&message(1, 7, "toki pona li pona", 0.9)).unwrap();
        assert!(first.is_some());
        assert!(store.message_in_db(&message(1, 7, "toki pona li pona", 0.9).raw).unwrap());

        let second = store.insert_message(&message(1, 7, "toki pona li pona", 0.9)).unwrap();
        assert!(second.is_none());

        // sentence rows were inserted exactly once
        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM sentence", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_counted_sents_roundtrip() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        store.insert_message(&message(1, 7, "toki pona li pona", 0.95)).unwrap();
        store.insert_message(&message(2, 8, "not the language", 0.2)).unwrap();
        let mut uncounted = message(3, 7, "mi moku e kili", 0.9);
        uncounted.is_counted = false;
        store.insert_message(&uncounted).unwrap();

        let start = ymd_utc(2023, 5, 1);
        let end = ymd_utc(2023, 6, 1);
        let passing = store.counted_sents_in_range(start, end, true).unwrap();
        assert_eq!(passing.len(), 1);
        assert_eq!(passing[0].words, vec!["toki", "pona", "li", "pona"]);

        let failing = store.counted_sents_in_range(start, end, false).unwrap();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].words[0], "not");

        // out of range
        let later = store
            .counted_sents_in_range(ymd_utc(2023, 6, 1), ymd_utc(2023, 7, 1), true)
            .unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn test_insert_sentence_appends() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        let id = store
            .insert_message(&message(1, 7, "toki pona li pona", 0.9))
            .unwrap()
            .unwrap();

        store
            .insert_sentence(id, &["mi".into(), "moku".into()], 0.85)
            .unwrap();
        store.insert_sentence(id, &[], 0.85).unwrap();

        let (count, last_pos): (i64, i64) = store
            .conn
            .query_row(
                "SELECT COUNT(*), MAX(pos) FROM sentence WHERE message = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(last_pos, 1);
    }

    #[test]
    fn test_date_range() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        assert!(store.get_msg_date_range().unwrap().is_none());

        let mut early = message(1, 7, "toki", 0.9);
        early.raw.postdate = ymd_utc(2020, 1, 5);
        let mut late = message(2, 7, "pona", 0.9);
        late.raw.postdate = ymd_utc(2024, 3, 5);
        store.insert_message(&early).unwrap();
        store.insert_message(&late).unwrap();

        let (min, max) = store.get_msg_date_range().unwrap().unwrap();
        assert_eq!(min, ymd_utc(2020, 1, 5));
        assert_eq!(max, ymd_utc(2024, 3, 5));
    }

    #[test]
    fn test_frequency_upsert_replaces_hits_unions_authors() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        let comm = store.insert_community(&community()).unwrap();
        let a1 = store.insert_author(&author(1)).unwrap();
        let a2 = store.insert_author(&author(2)).unwrap();

        let row = |hits, authors: Vec<StoreId>| FrequencyRow {
            term: "toki".into(),
            term_len: 1,
            attr: Attr::All,
            community: comm,
            min_sent_len: 1,
            day: 1000,
            hits,
            authors,
        };

        store.insert_frequency(&row(5, vec![a1])).unwrap();
        store.insert_frequency(&row(9, vec![a2])).unwrap();

        let hits: i64 = store
            .conn
            .query_row("SELECT hits FROM frequency", [], |r| r.get(0))
            .unwrap();
        assert_eq!(hits, 9);
        let authors: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM frequency_author", [], |r| r.get(0))
            .unwrap();
        assert_eq!(authors, 2);
    }

    #[test]
    fn test_author_num_tp_sentences_and_filter() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        // author 1 writes 20 long passing sentences, author 2 only 19
        for i in 0..20u128 {
            store
                .insert_message(&message(i, 1, "toki pona li pona mute", 0.9))
                .unwrap();
        }
        for i in 100..119u128 {
            store
                .insert_message(&message(i, 2, "mi olin e toki pona", 0.9))
                .unwrap();
        }
        // short and failing sentences don't move the needle
        store.insert_message(&message(500, 2, "toki", 0.9)).unwrap();
        store
            .insert_message(&message(501, 2, "some english sentence here", 0.1))
            .unwrap();

        store.update_author_num_tp_sentences().unwrap();

        let counts: Vec<i64> = {
            let mut stmt = store
                .conn
                .prepare("SELECT num_tp_sentences FROM author ORDER BY id")
                .unwrap();
            stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
        };
        assert_eq!(counts, vec![20, 19]);

        // project a frequency touched by both authors; only author 1 counts
        let comm = store.insert_community(&community()).unwrap();
        store
            .insert_frequency(&FrequencyRow {
                term: "toki".into(),
                term_len: 1,
                attr: Attr::All,
                community: comm,
                min_sent_len: 1,
                day: 1000,
                hits: 39,
                authors: vec![1, 2],
            })
            .unwrap();

        let freqs = store
            .term_freqs_in_range(1, 1, 0, 2000, &HashSet::new())
            .unwrap();
        assert_eq!(freqs.len(), 1);
        assert_eq!(freqs[0].hits, 39);
        assert_eq!(freqs[0].authors, 1);

        assert_eq!(store.total_hits_in_range(1, 1, 0, 2000).unwrap(), 39);
        assert_eq!(store.total_authors_in_range(1, 1, 0, 2000).unwrap(), 1);
    }

    #[test]
    fn test_prunable_terms() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        let comm = store.insert_community(&community()).unwrap();

        let row = |term: &str, hits| FrequencyRow {
            term: term.into(),
            term_len: 1,
            attr: Attr::All,
            community: comm,
            min_sent_len: 1,
            day: 1000,
            hits,
            authors: vec![],
        };
        store.insert_frequency(&row("common", 40)).unwrap();
        store.insert_frequency(&row("rare", 39)).unwrap();

        let pruned = store.prunable_terms().unwrap();
        assert_eq!(pruned.len(), 1);

        let kept = store.term_freqs_in_range(1, 1, 0, 2000, &pruned).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "common");
    }

    #[test]
    fn test_platform_select_and_author_name_in_key() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        assert!(store.select_platform(Platform::Discord).unwrap().is_none());
        store.insert_platform(Platform::Discord).unwrap();
        assert_eq!(store.select_platform(Platform::Discord).unwrap(), Some(1));

        // same numeric id under a different display name is a new row
        let first = store.insert_author(&author(9)).unwrap();
        let renamed = Author {
            name: Some("jan sin".into()),
            ..author(9)
        };
        let second = store.insert_author(&renamed).unwrap();
        assert_ne!(first, second);
        // and the same key comes back from the cache
        assert_eq!(store.insert_author(&author(9)).unwrap(), first);
    }
}
