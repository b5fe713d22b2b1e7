//! Time-bucket aggregation: drives the counter over monthly windows.
//!
//! Buckets are processed strictly serially, oldest first. Within a bucket,
//! sentences are grouped by community so each community's author sets stay
//! bounded, counted, and flushed to the canonical store before the next
//! bucket starts. The counter is consumed by the flush, which releases its
//! intern table and author sets.

use std::collections::HashMap;

use crate::application::counter::{ScoredSentence, StatsCounter};
use crate::domain::timeline::months_in_range;
use crate::domain::{CommSentence, FrequencyRow, Result, StoreId};
use crate::infrastructure::canonical::CanonicalStore;

/// Frequency rows per store write.
const WRITE_BATCH: usize = 1_000;

/// Outcome counts for one frequency generation run.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrequencySummary {
    pub buckets: u64,
    pub sentences: u64,
    pub rows: u64,
}

/// Count one bucket's sentences for one community into frequency rows.
fn count_community(
    community: StoreId,
    day: i64,
    sentences: Vec<CommSentence>,
) -> Vec<FrequencyRow> {
    let mut counter = StatsCounter::default();
    counter.add_all(sentences.into_iter().map(|s| ScoredSentence {
        words: s.words,
        author: s.author,
    }));
    tracing::debug!(keys = counter.len(), "community counted");

    counter
        .into_entries()
        .map(|(key, stats)| {
            let mut authors: Vec<StoreId> = stats.authors.into_iter().collect();
            authors.sort_unstable();
            FrequencyRow {
                term: key.term.to_string(),
                term_len: key.len,
                attr: key.attr,
                community,
                min_sent_len: key.min_sent_len,
                day,
                hits: stats.hits,
                authors,
            }
        })
        .collect()
}

/// Regenerate frequency rows for every monthly bucket in the store.
///
/// `passing` selects the in-language stream; the failing stream is
/// supported for contrastive analyses.
pub fn generate_frequencies(store: &mut CanonicalStore, passing: bool) -> Result<FrequencySummary> {
    let mut summary = FrequencySummary::default();
    let Some((first, last)) = store.get_msg_date_range()? else {
        tracing::info!("no messages in store, nothing to count");
        return Ok(summary);
    };

    for (start, end) in months_in_range(first, last) {
        let sentences = store.counted_sents_in_range(start, end, passing)?;
        if sentences.is_empty() {
            continue;
        }
        summary.buckets += 1;
        summary.sentences += sentences.len() as u64;
        tracing::info!(
            bucket = %start.date_naive(),
            sentences = sentences.len(),
            "counting bucket"
        );

        let mut by_community: HashMap<StoreId, Vec<CommSentence>> = HashMap::new();
        for sentence in sentences {
            by_community.entry(sentence.community).or_default().push(sentence);
        }

        let day = start.timestamp();
        for (community, sentences) in by_community {
            let rows = count_community(community, day, sentences);
            summary.rows += rows.len() as u64;
            for chunk in rows.chunks(WRITE_BATCH) {
                store.insert_frequencies(chunk)?;
            }
        }

        // bound resident memory across buckets
        store.flush_caches();
    }

    tracing::info!(
        buckets = summary.buckets,
        rows = summary.rows,
        "frequency generation finished"
    );
    Ok(summary)
}
