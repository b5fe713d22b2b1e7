//! Domain models for the analytics pipeline.
//!
//! These records describe the canonical shape of messages after source
//! normalization, independent of which platform dump they came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel container id for platforms without channels or threads.
pub const NULL_CONTAINER: u128 = 0;

/// Sentinel author id for content with no attributable author.
pub const NULL_AUTHOR: u128 = 0;

/// Score at or above which a sentence counts as in-language.
pub const PASSING_SCORE: f64 = 0.8;

/// Platforms with a dedicated source adapter.
///
/// Ids are stable across runs and are part of the canonical store's keys,
/// so variants must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Platform {
    Other = 0,
    Discord = 1,
    Telegram = 2,
    Reddit = 4,
    YouTube = 5,
    Forum = 100,
    Publication = 200,
}

impl From<Platform> for i64 {
    fn from(p: Platform) -> Self {
        p as Self
    }
}

impl TryFrom<i64> for Platform {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Other),
            1 => Ok(Self::Discord),
            2 => Ok(Self::Telegram),
            4 => Ok(Self::Reddit),
            5 => Ok(Self::YouTube),
            100 => Ok(Self::Forum),
            200 => Ok(Self::Publication),
            _ => Err(format!("unknown platform id: {value}")),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Other => "Other",
            Self::Discord => "Discord",
            Self::Telegram => "Telegram",
            Self::Reddit => "Reddit",
            Self::YouTube => "YouTube",
            Self::Forum => "Forum",
            Self::Publication => "Publication",
        };
        write!(f, "{name}")
    }
}

/// A community (guild, chat, subreddit, channel...) scoped to a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    /// Platform-scoped id. 128 bits because synthesized ids are MD5 hashes.
    pub id: u128,
    pub name: String,
    pub platform: Platform,
}

/// A message author scoped to a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u128,
    /// Display name; absent for deleted or anonymous authors.
    pub name: Option<String>,
    pub platform: Platform,
    pub is_bot: bool,
    /// Webhook-relayed content is authored by a human behind the hook,
    /// so it stays countable even when `is_bot` is set.
    pub is_webhook: bool,
}

/// A platform message as emitted by a source adapter, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Unique per community, stable across runs.
    pub id: u128,
    pub community: Community,
    /// Channel or thread id; [`NULL_CONTAINER`] when the platform has none.
    pub container: u128,
    pub author: Author,
    pub postdate: DateTime<Utc>,
    pub content: String,
}

/// One segmented sentence with its language score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    /// Non-empty, lowercased cleaned tokens.
    pub words: Vec<String>,
    /// Language score in `[0, 1]`.
    pub score: f64,
}

/// A scored message, produced exactly once from a [`RawMessage`].
#[derive(Debug, Clone)]
pub struct Message {
    pub raw: RawMessage,
    /// Token-weighted mean of sentence scores.
    pub score: f64,
    /// Whether this message participates in frequency counting.
    pub is_counted: bool,
    pub sentences: Vec<Sentence>,
}

/// Positional attribute of an observed term window inside a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Attr {
    All = 0,
    SentenceStart = 1,
    SentenceEnd = 2,
}

impl From<Attr> for u8 {
    fn from(a: Attr) -> Self {
        a as Self
    }
}

impl TryFrom<u8> for Attr {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::All),
            1 => Ok(Self::SentenceStart),
            2 => Ok(Self::SentenceEnd),
            _ => Err(format!("unknown attribute: {value}")),
        }
    }
}

/// Surrogate row id handed out by the canonical store.
pub type StoreId = i64;

/// A counted sentence as read back from the canonical store.
#[derive(Debug, Clone)]
pub struct CommSentence {
    pub words: Vec<String>,
    pub community: StoreId,
    pub author: StoreId,
}

/// One accumulated frequency observation, keyed by
/// `(term, community, attr, min_sent_len, day)` in the canonical store.
#[derive(Debug, Clone)]
pub struct FrequencyRow {
    pub term: String,
    pub term_len: u8,
    pub attr: Attr,
    pub community: StoreId,
    pub min_sent_len: u8,
    /// Unix seconds of the month-bucket start.
    pub day: i64,
    pub hits: u64,
    pub authors: Vec<StoreId>,
}
