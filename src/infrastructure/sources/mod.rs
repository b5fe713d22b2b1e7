//! Source adapters - normalize platform dumps into the canonical message stream.
//!
//! Every adapter walks a root directory, parses whatever files it recognizes
//! and yields [`RawMessage`]s. Unrecognized files are skipped silently;
//! malformed files are logged and skipped. Message ids must be bit-exact
//! stable across runs, because the canonical store deduplicates on them.

pub mod discord;
pub mod forum;
pub mod publication;
pub mod reddit;
pub mod telegram;
pub mod youtube;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use md5::{Digest, Md5};
use serde::de::DeserializeOwned;

use crate::domain::{Platform, RawMessage, Result};

pub use discord::DiscordSource;
pub use forum::ForumSource;
pub use publication::PublicationSource;
pub use reddit::RedditSource;
pub use telegram::TelegramSource;
pub use youtube::YouTubeSource;

/// A finite, non-restartable stream of canonical messages from one dump.
///
/// Malformed files never surface here; they are logged and skipped inside
/// the adapter. An `Err` item is an invariant violation (a record shape the
/// pipeline refuses to guess about) and aborts the whole run.
pub trait Source {
    /// The platform this adapter normalizes.
    fn platform(&self) -> Platform;

    /// Consume the adapter and yield its messages lazily.
    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send>;
}

/// Platform selector for building adapters by name (CLI and sources.yml).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Discord,
    Telegram,
    Reddit,
    YouTube,
    Forum,
    Publication,
}

impl SourceKind {
    /// All selectable kinds, in menu order.
    pub const ALL: [Self; 6] = [
        Self::Discord,
        Self::Telegram,
        Self::Reddit,
        Self::YouTube,
        Self::Forum,
        Self::Publication,
    ];

    /// Lowercase name used in configs and prompts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Telegram => "telegram",
            Self::Reddit => "reddit",
            Self::YouTube => "youtube",
            Self::Forum => "forum",
            Self::Publication => "publication",
        }
    }

    /// Build the adapter for this kind over a dump root.
    #[must_use]
    pub fn build(self, root: &Path) -> Box<dyn Source> {
        match self {
            Self::Discord => Box::new(DiscordSource::new(root)),
            Self::Telegram => Box::new(TelegramSource::new(root)),
            Self::Reddit => Box::new(RedditSource::new(root)),
            Self::YouTube => Box::new(YouTubeSource::new(root)),
            Self::Forum => Box::new(ForumSource::new(root)),
            Self::Publication => Box::new(PublicationSource::new(root)),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown source: {s}. Use one of: discord, telegram, reddit, youtube, forum, publication"
                )
            })
    }
}

/// Deterministic 128-bit id for entities whose platform assigns none,
/// derived from the MD5 of the UTF-8 bytes.
#[must_use]
pub fn fake_id(s: &str) -> u128 {
    let digest = Md5::digest(s.as_bytes());
    u128::from_be_bytes(digest.into())
}

/// Containers whose messages are never counted, per platform.
///
/// The acrophobia bot is troublesome: users trigger it with an in-language
/// phrase, pushing every word of the trigger up by tens of thousands of hits.
fn ignored_containers(platform: Platform) -> &'static HashSet<u128> {
    static DISCORD: OnceLock<HashSet<u128>> = OnceLock::new();
    static EMPTY: OnceLock<HashSet<u128>> = OnceLock::new();
    match platform {
        Platform::Discord => DISCORD.get_or_init(|| {
            HashSet::from([
                316066233755631616,  // mapona/jaki
                786041291707777034,  // mapona/ako
                895303838662295572,  // maponasewi/tokinanpa, a pluralkit user
                1128714905932021821, // mamusi/ako
                1187212477155528804, // mapona/toki-suli/musitokipiantesitelenwan
            ])
        }),
        _ => EMPTY.get_or_init(HashSet::new),
    }
}

/// Authors whose messages are never counted, per platform.
fn ignored_authors(platform: Platform) -> &'static HashSet<u128> {
    static DISCORD: OnceLock<HashSet<u128>> = OnceLock::new();
    static EMPTY: OnceLock<HashSet<u128>> = OnceLock::new();
    match platform {
        Platform::Discord => DISCORD.get_or_init(|| {
            HashSet::from([
                937872123085602896,  // old wikipesija logger
                1074390249981096047, // wikipesija logger
                1135620786183491725, // old ma musi minecraft logger
                1135634171734261830, // ma musi minecraft logger
                1213156131006845020, // sona.pona.la logger
                950311805845139506,  // "o sitelen lon lipu sina"
            ])
        }),
        _ => EMPTY.get_or_init(HashSet::new),
    }
}

/// Whether a message participates in frequency counting.
///
/// Bots are excluded unless they are webhooks, which relay human content.
#[must_use]
pub fn is_countable(msg: &RawMessage) -> bool {
    let platform = msg.community.platform;
    if ignored_containers(platform).contains(&msg.container) {
        return false;
    }
    if ignored_authors(platform).contains(&msg.author.id) {
        return false;
    }
    if msg.author.is_bot && !msg.author.is_webhook {
        return false;
    }
    true
}

/// Walk `root` recursively and yield files whose name passes `pred`.
pub(crate) fn walk_files(
    root: &Path,
    pred: fn(&str) -> bool,
) -> impl Iterator<Item = PathBuf> + Send {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(move |e| e.file_name().to_str().is_some_and(pred))
        .map(walkdir::DirEntry::into_path)
}

/// Read a file and parse it as JSON. Syntax errors are logged and skipped;
/// the caller decides whether the value is a recognized dump shape.
pub(crate) fn try_load_json(path: &Path) -> Option<serde_json::Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("malformed JSON in {}: {}", path.display(), e);
            None
        }
    }
}

/// Narrow a recognized JSON value into its typed dump shape.
pub(crate) fn narrow_json<T: DeserializeOwned>(path: &Path, value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            tracing::warn!("unexpected dump shape in {}: {}", path.display(), e);
            None
        }
    }
}
