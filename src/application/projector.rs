//! Analytics projection: canonical frequencies to the read-optimized store.
//!
//! The projection walks every `(term_len, min_sent_len)` pair and, for each,
//! materializes the all-time rollup, one rollup per anniversary epoch, and
//! one row set per month. Hits are summed across communities; author counts
//! are distinct-author cardinalities after the non-trivial-author filter.
//! Terms below the all-time hit cutoff never enter the output.
//!
//! Two files are produced: the full store, then a byte-identical copy that
//! the postprocessing scripts trim down and index.

use std::collections::HashMap;
use std::path::Path;

use crate::application::counter::{MAX_MIN_SENT_LEN, MAX_TERM_LEN};
use crate::domain::timeline::{epochs_in_range, months_in_range};
use crate::domain::{AppError, Result};
use crate::infrastructure::analytics::{AnalyticsStore, FreqOut, FreqTable, TotalOut};
use crate::infrastructure::canonical::{CanonicalStore, TermFreq};

/// Sentinel day for the all-time rollup in the yearly tables.
const ALL_TIME_DAY: i64 = 0;

/// Outcome counts for one export run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectionSummary {
    pub terms: u64,
    pub pruned_terms: u64,
    pub monthly_rows: u64,
    pub yearly_rows: u64,
    pub scripts_applied: u64,
}

/// Memoized term-id assignment in the analytics store.
struct TermIds {
    ids: HashMap<String, i64>,
}

impl TermIds {
    fn get(&mut self, analytics: &mut AnalyticsStore, freq: &TermFreq) -> Result<i64> {
        if let Some(&id) = self.ids.get(&freq.text) {
            return Ok(id);
        }
        let id = analytics.upsert_term(&freq.text, freq.len)?;
        self.ids.insert(freq.text.clone(), id);
        Ok(id)
    }
}

fn freq_rows(
    analytics: &mut AnalyticsStore,
    terms: &mut TermIds,
    freqs: &[TermFreq],
    min_sent_len: u8,
    day: i64,
) -> Result<Vec<FreqOut>> {
    freqs
        .iter()
        .map(|freq| {
            Ok(FreqOut {
                term_id: terms.get(analytics, freq)?,
                min_sent_len,
                day,
                hits: freq.hits,
                authors: freq.authors,
            })
        })
        .collect()
}

/// Build the full and trimmed analytics files from the canonical store.
pub fn project(
    store: &CanonicalStore,
    full_path: &Path,
    trimmed_path: &Path,
    postprocess_dir: &Path,
) -> Result<ProjectionSummary> {
    let Some((first, last)) = store.get_msg_date_range()? else {
        return Err(AppError::Config {
            message: "canonical store has no messages to project".into(),
        });
    };

    let mut summary = ProjectionSummary::default();
    let mut analytics = AnalyticsStore::create(full_path)?;
    let mut terms = TermIds {
        ids: HashMap::new(),
    };

    let pruned = store.prunable_terms()?;
    summary.pruned_terms = pruned.len() as u64;

    let range_end = last.timestamp() + 1;
    for term_len in 1..=MAX_TERM_LEN as u8 {
        tracing::info!("projecting terms of length {term_len}");
        for min_sent_len in term_len..=MAX_MIN_SENT_LEN as u8 {
            // all-time rollup, day 0
            let alltime =
                store.term_freqs_in_range(term_len, min_sent_len, 0, range_end, &pruned)?;
            let rows = freq_rows(&mut analytics, &mut terms, &alltime, min_sent_len, ALL_TIME_DAY)?;
            summary.yearly_rows += rows.len() as u64;
            analytics.insert_freqs(FreqTable::Yearly, &rows)?;
            analytics.insert_total(
                FreqTable::Yearly,
                &TotalOut {
                    day: ALL_TIME_DAY,
                    term_len,
                    min_sent_len,
                    hits: store.total_hits_in_range(term_len, min_sent_len, 0, range_end)?,
                    authors: store.total_authors_in_range(term_len, min_sent_len, 0, range_end)?,
                },
            )?;

            // one rollup per anniversary epoch
            for (start, end) in epochs_in_range(first, last) {
                let (start, end) = (start.timestamp(), end.timestamp());
                let freqs = store.term_freqs_in_range(term_len, min_sent_len, start, end, &pruned)?;
                let rows = freq_rows(&mut analytics, &mut terms, &freqs, min_sent_len, start)?;
                summary.yearly_rows += rows.len() as u64;
                analytics.insert_freqs(FreqTable::Yearly, &rows)?;
                analytics.insert_total(
                    FreqTable::Yearly,
                    &TotalOut {
                        day: start,
                        term_len,
                        min_sent_len,
                        hits: store.total_hits_in_range(term_len, min_sent_len, start, end)?,
                        authors: store.total_authors_in_range(term_len, min_sent_len, start, end)?,
                    },
                )?;
            }

            // periodic frequency data; the totals exist so absolute hits can
            // be rendered as shares of the month
            for (start, end) in months_in_range(first, last) {
                let (start, end) = (start.timestamp(), end.timestamp());
                let freqs = store.term_freqs_in_range(term_len, min_sent_len, start, end, &pruned)?;
                let rows = freq_rows(&mut analytics, &mut terms, &freqs, min_sent_len, start)?;
                summary.monthly_rows += rows.len() as u64;
                analytics.insert_freqs(FreqTable::Monthly, &rows)?;
                analytics.insert_total(
                    FreqTable::Monthly,
                    &TotalOut {
                        day: start,
                        term_len,
                        min_sent_len,
                        hits: store.total_hits_in_range(term_len, min_sent_len, start, end)?,
                        authors: store.total_authors_in_range(term_len, min_sent_len, start, end)?,
                    },
                )?;
            }
        }
    }

    summary.terms = terms.ids.len() as u64;

    // the trimmed copy only exists once the full file is complete
    analytics.close()?;
    std::fs::copy(full_path, trimmed_path)
        .map_err(|e| AppError::io("failed to copy analytics file", e))?;
    summary.scripts_applied = postprocess(trimmed_path, postprocess_dir)?;

    Ok(summary)
}

/// Apply `*.sql` postprocessing scripts to the trimmed file in lexicographic
/// filename order.
fn postprocess(trimmed_path: &Path, dir: &Path) -> Result<u64> {
    if !dir.is_dir() {
        tracing::info!("no postprocess directory at {}, skipping", dir.display());
        return Ok(0);
    }

    let mut scripts: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| AppError::io("failed to read postprocess directory", e))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    scripts.sort();

    let analytics = AnalyticsStore::open(trimmed_path)?;
    let mut applied = 0u64;
    for script in scripts {
        tracing::info!("executing {}", script.display());
        let sql = std::fs::read_to_string(&script)
            .map_err(|e| AppError::io(format!("failed to read {}", script.display()), e))?;
        analytics.execute_script(&sql)?;
        applied += 1;
    }
    analytics.close()?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timeline::ymd_utc;
    use crate::domain::{Attr, Author, Community, FrequencyRow, Message, Platform, RawMessage, Sentence};

    /// Stand up a canonical store with one prolific author, one casual one,
    /// and enough hits on "toki" to clear the pruning cutoff.
    fn seeded_store() -> CanonicalStore {
        let mut store = CanonicalStore::open_in_memory().unwrap();

        let make = |id: u128, author: u128, date| Message {
            raw: RawMessage {
                id,
                community: Community {
                    id: 1,
                    name: "ma".into(),
                    platform: Platform::Discord,
                },
                container: 0,
                author: Author {
                    id: author,
                    name: Some(format!("jan {author}")),
                    platform: Platform::Discord,
                    is_bot: false,
                    is_webhook: false,
                },
                postdate: date,
                content: "toki pona li pona mute".into(),
            },
            score: 0.9,
            is_counted: true,
            sentences: vec![Sentence {
                words: "toki pona li pona mute"
                    .split_whitespace()
                    .map(ToString::to_string)
                    .collect(),
                score: 0.9,
            }],
        };

        // author 1 clears the 20-sentence bar, author 2 does not; 45 total
        // hits keep every term above the pruning cutoff
        for i in 0..40 {
            store.insert_message(&make(i, 1, ymd_utc(2023, 7, 10))).unwrap();
        }
        for i in 100..105 {
            store.insert_message(&make(i, 2, ymd_utc(2023, 8, 10))).unwrap();
        }
        store.update_author_num_tp_sentences().unwrap();

        crate::application::aggregator::generate_frequencies(&mut store, true).unwrap();
        store
    }

    #[test]
    fn test_projection_end_to_end() {
        let store = seeded_store();
        let dir = tempfile::tempdir().unwrap();
        let full = dir.path().join("full.sqlite");
        let trimmed = dir.path().join("trimmed.sqlite");
        let scripts = dir.path().join("postprocess");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(
            scripts.join("00-drop-monthly.sql"),
            "DELETE FROM monthly;",
        )
        .unwrap();

        let summary = project(&store, &full, &trimmed, &scripts).unwrap();
        assert!(summary.terms > 0);
        assert!(summary.monthly_rows > 0);
        assert!(summary.yearly_rows > 0);
        assert_eq!(summary.scripts_applied, 1);

        // "toki" was seen 45 times all-time: hits land in yearly day=0,
        // but only the prolific author counts
        let full_store = AnalyticsStore::open(&full).unwrap();
        let hits = full_store.query_i64(
            "SELECT y.hits FROM yearly y JOIN term t ON y.term_id = t.id
             WHERE t.text = 'toki' AND y.min_sent_len = 1 AND y.day = 0",
        );
        assert_eq!(hits, 45);
        let authors = full_store.query_i64(
            "SELECT y.authors FROM yearly y JOIN term t ON y.term_id = t.id
             WHERE t.text = 'toki' AND y.min_sent_len = 1 AND y.day = 0",
        );
        assert_eq!(authors, 1);

        // July 2023 and August 2023 land in different epochs
        let epoch_2022 = ymd_utc(2022, 8, 1).timestamp();
        let epoch_2023 = ymd_utc(2023, 8, 1).timestamp();
        let early: i64 = full_store.query_i64(&format!(
            "SELECT y.hits FROM yearly y JOIN term t ON y.term_id = t.id
             WHERE t.text = 'toki' AND y.min_sent_len = 1 AND y.day = {epoch_2022}"
        ));
        let late: i64 = full_store.query_i64(&format!(
            "SELECT y.hits FROM yearly y JOIN term t ON y.term_id = t.id
             WHERE t.text = 'toki' AND y.min_sent_len = 1 AND y.day = {epoch_2023}"
        ));
        assert_eq!(early, 40);
        assert_eq!(late, 5);

        // monthly table has both buckets in the full file
        assert!(full_store.query_i64("SELECT COUNT(*) FROM monthly") > 0);
        assert!(full_store.query_i64("SELECT COUNT(*) FROM total_monthly") > 0);
        drop(full_store);

        // the trimmed copy ran the script
        let trimmed_store = AnalyticsStore::open(&trimmed).unwrap();
        assert_eq!(trimmed_store.query_i64("SELECT COUNT(*) FROM monthly"), 0);
        // but kept everything else
        assert!(trimmed_store.query_i64("SELECT COUNT(*) FROM yearly") > 0);
    }

    #[test]
    fn test_low_hit_terms_pruned() {
        let mut store = CanonicalStore::open_in_memory().unwrap();
        // a store with one message, so every term has hits far below 40
        let msg = Message {
            raw: RawMessage {
                id: 1,
                community: Community {
                    id: 1,
                    name: "ma".into(),
                    platform: Platform::Discord,
                },
                container: 0,
                author: Author {
                    id: 1,
                    name: None,
                    platform: Platform::Discord,
                    is_bot: false,
                    is_webhook: false,
                },
                postdate: ymd_utc(2023, 7, 10),
                content: "toki pona".into(),
            },
            score: 0.9,
            is_counted: true,
            sentences: vec![Sentence {
                words: vec!["toki".into(), "pona".into()],
                score: 0.9,
            }],
        };
        store.insert_message(&msg).unwrap();
        crate::application::aggregator::generate_frequencies(&mut store, true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let summary = project(
            &store,
            &dir.path().join("full.sqlite"),
            &dir.path().join("trimmed.sqlite"),
            &dir.path().join("missing-postprocess"),
        )
        .unwrap();
        assert_eq!(summary.terms, 0);
        assert!(summary.pruned_terms > 0);
        assert_eq!(summary.scripts_applied, 0);
    }

    #[test]
    fn test_empty_store_is_config_error() {
        let store = CanonicalStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = project(
            &store,
            &dir.path().join("full.sqlite"),
            &dir.path().join("trimmed.sqlite"),
            &dir.path().join("postprocess"),
        );
        assert!(matches!(result, Err(AppError::Config { .. })));
    }

    #[test]
    fn test_frequency_row_helper_types() {
        // FrequencyRow and Attr stay in sync with what the projector reads
        let row = FrequencyRow {
            term: "toki".into(),
            term_len: 1,
            attr: Attr::All,
            community: 1,
            min_sent_len: 1,
            day: 0,
            hits: 1,
            authors: vec![],
        };
        assert_eq!(u8::from(row.attr), 0);
    }
}
