//! Ingestion normalizer.
//!
//! Consumes a source adapter's message stream in fixed-size batches,
//! scores each new message, and persists it to the canonical store.
//! Scoring is CPU-bound and runs on blocking workers so a batch of
//! messages is scored concurrently; store writes stay on the driving
//! task. Messages already in the store are skipped, which is also what
//! makes interrupted runs resumable.

use std::path::Path;

use crate::application::scorecard::{self, message_score};
use crate::domain::{AppError, Message, RawMessage, Result, Sentence};
use crate::infrastructure::canonical::CanonicalStore;
use crate::infrastructure::sources::{is_countable, Source};

/// Messages per ingestion batch; bounds in-flight scoring work and memory.
pub const BATCH_SIZE: usize = 150;

/// Outcome counts for one ingested source.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestSummary {
    pub seen: u64,
    pub inserted: u64,
    pub already_present: u64,
}

/// U+00AD and U+0000 are the only characters stripped from content;
/// everything else is the platform's own text.
fn clean_content(content: &str) -> String {
    content.replace(['\u{00ad}', '\u{0}'], "")
}

/// Produce the immutable scored message for a raw one.
fn score_message(raw: RawMessage) -> Message {
    let content = clean_content(&raw.content);
    let cards = scorecard::scorecards(&content);

    let score = message_score(&cards);
    let sentences: Vec<Sentence> = cards
        .into_iter()
        .filter(|card| !card.cleaned.is_empty())
        .map(|card| Sentence {
            words: card.cleaned,
            score: card.score,
        })
        .collect();
    let is_counted = is_countable(&raw);

    Message {
        raw: RawMessage { content, ..raw },
        score,
        is_counted,
        sentences,
    }
}

/// Ingest one source into the canonical store.
pub async fn ingest_source(
    store: &mut CanonicalStore,
    source: Box<dyn Source>,
) -> Result<IngestSummary> {
    let platform = source.platform();
    tracing::info!("ingesting {platform} messages");

    let mut summary = IngestSummary::default();
    let mut stream = source.messages();

    loop {
        // fill one batch, surfacing adapter invariant violations immediately
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        for raw in stream.by_ref() {
            batch.push(raw?);
            if batch.len() == BATCH_SIZE {
                break;
            }
        }
        if batch.is_empty() {
            break;
        }
        summary.seen += batch.len() as u64;

        let mut to_score = Vec::new();
        for raw in batch {
            if store.message_in_db(&raw)? {
                summary.already_present += 1;
                continue;
            }
            to_score.push(raw);
        }

        let handles: Vec<_> = to_score
            .into_iter()
            .map(|raw| tokio::task::spawn_blocking(move || score_message(raw)))
            .collect();
        for handle in handles {
            let message = handle
                .await
                .map_err(|e| AppError::invariant(format!("scoring task failed: {e}")))?;
            match store.insert_message(&message)? {
                Some(_) => summary.inserted += 1,
                None => summary.already_present += 1,
            }
        }
    }

    tracing::info!(
        seen = summary.seen,
        inserted = summary.inserted,
        already_present = summary.already_present,
        "finished ingesting {platform}"
    );
    Ok(summary)
}

/// Dump a source's normalized stream to a JSON-lines file instead of the
/// store.
pub fn export_source_json(source: Box<dyn Source>, output: &Path) -> Result<u64> {
    use std::io::Write;

    let file = std::fs::File::create(output)
        .map_err(|e| AppError::io(format!("failed to create {}", output.display()), e))?;
    let mut writer = std::io::BufWriter::new(file);

    let mut written = 0u64;
    for raw in source.messages() {
        let raw = raw?;
        let line = serde_json::to_string(&raw).map_err(AppError::json_parse)?;
        writeln!(writer, "{line}").map_err(|e| AppError::io("failed to write export", e))?;
        written += 1;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::io("failed to flush export", e.into_error()))?;
    Ok(written)
}
