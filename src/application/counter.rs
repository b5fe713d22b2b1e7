//! The n-gram counting engine.
//!
//! For every sentence, every window of 1..=`MAX_TERM_LEN` tokens is a term
//! observation. Each observation is recorded under every minimum-sentence-
//! length axis the sentence qualifies for, and under positional attributes
//! when the window touches a sentence edge. Counting is commutative: the
//! same sentences in any order produce the same counter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::{Attr, StoreId};

/// Longest term (in tokens) the pipeline tracks.
pub const MAX_TERM_LEN: usize = 6;

/// Largest minimum-sentence-length axis.
pub const MAX_MIN_SENT_LEN: usize = 6;

/// Terms with fewer all-time hits than this never reach the analytics store.
pub const MIN_HITS_NEEDED: u64 = 40;

/// Authors with fewer in-language sentences than this don't count toward
/// author cardinalities.
pub const MIN_SENTS_NEEDED: i64 = 20;

/// Sentence length at which a sentence is considered long-form.
pub const LONG_SENTENCE_LEN: usize = 4;

/// Mean sentence length across the corpus; anchors the nonsense filter.
pub const AVG_SENT_LEN: f64 = 4.13557;

/// A sentence ready for counting: cleaned lowercase tokens plus the store
/// id of its author.
#[derive(Debug, Clone)]
pub struct ScoredSentence {
    pub words: Vec<String>,
    pub author: StoreId,
}

/// Counter key: interned term text plus its axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermKey {
    pub term: Arc<str>,
    pub len: u8,
    pub attr: Attr,
    pub min_sent_len: u8,
}

/// Accumulated hits and distinct authors for one key.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub hits: u64,
    pub authors: HashSet<StoreId>,
}

/// Spam heuristic: walls of copy-paste and single-token floods are not
/// language use. A sentence is rejected outright past 50x the mean length,
/// or when it is 5x the mean and one token fills half of it.
#[must_use]
pub fn is_nonsense(words: &[String]) -> bool {
    let n = words.len();
    if n as f64 >= 50.0 * AVG_SENT_LEN {
        return true;
    }
    if n as f64 > 5.0 * AVG_SENT_LEN {
        let mut freqs: HashMap<&str, usize> = HashMap::new();
        for word in words {
            *freqs.entry(word.as_str()).or_default() += 1;
        }
        let most = freqs.values().copied().max().unwrap_or(0);
        if most * 2 >= n {
            return true;
        }
    }
    false
}

/// In-memory frequency counter for one community within one time bucket.
///
/// Term strings are interned for the counter's lifetime: the same term is
/// produced once per window position per sentence, and a large bucket
/// revisits each common term millions of times.
pub struct StatsCounter {
    max_term_len: usize,
    max_min_sent_len: usize,
    interned: HashSet<Arc<str>>,
    counts: HashMap<TermKey, Stats>,
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new(MAX_TERM_LEN, MAX_MIN_SENT_LEN)
    }
}

impl StatsCounter {
    #[must_use]
    pub fn new(max_term_len: usize, max_min_sent_len: usize) -> Self {
        Self {
            max_term_len,
            max_min_sent_len,
            interned: HashSet::new(),
            counts: HashMap::new(),
        }
    }

    /// Number of distinct keys accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn intern(&mut self, term: String) -> Arc<str> {
        if let Some(found) = self.interned.get(term.as_str()) {
            return Arc::clone(found);
        }
        let arc: Arc<str> = Arc::from(term);
        self.interned.insert(Arc::clone(&arc));
        arc
    }

    fn bump(&mut self, term: &Arc<str>, len: u8, attr: Attr, min_sent_len: u8, author: StoreId) {
        let stats = self
            .counts
            .entry(TermKey {
                term: Arc::clone(term),
                len,
                attr,
                min_sent_len,
            })
            .or_default();
        stats.hits += 1;
        stats.authors.insert(author);
    }

    /// Count every term window of one sentence.
    pub fn add_sentence(&mut self, words: &[String], author: StoreId) {
        if words.is_empty() || is_nonsense(words) {
            return;
        }

        let n = words.len();
        for len in 1..=self.max_term_len.min(n) {
            for start in 0..=(n - len) {
                let end = start + len;
                let term = self.intern(words[start..end].join(" "));
                let is_start = start == 0;
                let is_end = end == n;

                for msl in len..=self.max_min_sent_len.min(n) {
                    self.bump(&term, len as u8, Attr::All, msl as u8, author);
                    if is_start {
                        self.bump(&term, len as u8, Attr::SentenceStart, msl as u8, author);
                    }
                    if is_end {
                        self.bump(&term, len as u8, Attr::SentenceEnd, msl as u8, author);
                    }
                }
            }
        }
    }

    /// Count a whole stream.
    pub fn add_all(&mut self, sentences: impl IntoIterator<Item = ScoredSentence>) {
        for sentence in sentences {
            self.add_sentence(&sentence.words, sentence.author);
        }
    }

    /// Fold another counter in. Equivalent to having counted the
    /// concatenation of both streams.
    pub fn merge(&mut self, other: Self) {
        for (key, stats) in other.counts {
            let entry = self.counts.entry(key).or_default();
            entry.hits += stats.hits;
            entry.authors.extend(stats.authors);
        }
    }

    /// Read access for lookups in tests and assertions.
    #[must_use]
    pub fn get(&self, term: &str, len: u8, attr: Attr, min_sent_len: u8) -> Option<&Stats> {
        // lookup key without interning
        let key = TermKey {
            term: Arc::from(term),
            len,
            attr,
            min_sent_len,
        };
        self.counts.get(&key)
    }

    /// Consume the counter, releasing the intern table and author sets.
    pub fn into_entries(self) -> impl Iterator<Item = (TermKey, Stats)> {
        self.counts.into_iter()
    }
}
