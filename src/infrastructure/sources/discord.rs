//! Discord source adapter.
//!
//! Consumes DiscordChatExporter-style JSON dumps: one file per channel with
//! top-level `guild`, `channel`, `messages` and a `messageCount` marker.
//! Discord ids are globally unique snowflakes, so deduplication is by
//! message id across all files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{narrow_json, try_load_json, walk_files, Source};
use crate::domain::{Author, Community, Platform, RawMessage, Result};

/// Message types that are system noise (boosts, pins, joins...), by numeric
/// id and by exporter event name.
const SYSTEM_TYPES: &[&str] = &[
    "4",
    "ChannelNameChange",
    "6",
    "ChannelPinnedMessage",
    "7",
    "GuildMemberJoin",
    "8", // boosts and boost tiers
    "GuildBoost",
    "9",
    "GuildBoostTier1",
    "10",
    "GuildBoostTier2",
    "11",
    "GuildBoostTier3",
    "12",
    "ChannelFollowAdd",
    "44",
    "PurchaseNotification",
    "46",
    "PollResult",
];

#[derive(Debug, Deserialize)]
struct RawGuild {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthor {
    id: String,
    name: String,
    #[serde(default)]
    discriminator: String,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    roles: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawDiscordMessage {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    timestamp: String,
    #[serde(default)]
    content: String,
    author: RawAuthor,
}

#[derive(Debug, Deserialize)]
struct DiscordFile {
    guild: RawGuild,
    channel: RawChannel,
    #[serde(default)]
    messages: Vec<RawDiscordMessage>,
}

/// Webhooks cannot have roles or a discriminator other than 0000.
/// Some webhooks are still not proxied users (discohook, for example).
fn is_webhook(author: &RawAuthor) -> bool {
    author.is_bot && author.roles.is_empty() && author.discriminator == "0000"
}

fn is_system(m: &RawDiscordMessage) -> bool {
    SYSTEM_TYPES.contains(&m.kind.as_str())
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // some exports omit the offset entirely
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Adapter over a directory of Discord channel exports.
pub struct DiscordSource {
    root: PathBuf,
}

impl DiscordSource {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Source for DiscordSource {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send> {
        let mut seen: HashSet<u128> = HashSet::new();
        let iter = walk_files(&self.root, |name| name.ends_with(".json"))
            .filter_map(|path| {
                let value = try_load_json(&path)?;
                // only channel exports carry a messageCount
                if value.get("messageCount").is_none() {
                    return None;
                }
                narrow_json::<DiscordFile>(&path, value)
            })
            .flat_map(move |file| file_messages(&file, &mut seen))
            .map(Ok);
        Box::new(iter)
    }
}

fn file_messages(file: &DiscordFile, seen: &mut HashSet<u128>) -> Vec<RawMessage> {
    let container: u128 = match file.channel.id.parse() {
        Ok(id) => id,
        Err(_) => {
            tracing::warn!("non-numeric channel id: {}", file.channel.id);
            return Vec::new();
        }
    };
    let community = match file.guild.id.parse::<u128>() {
        Ok(id) => Community {
            id,
            name: file.guild.name.clone(),
            platform: Platform::Discord,
        },
        Err(_) => {
            tracing::warn!("non-numeric guild id: {}", file.guild.id);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for m in &file.messages {
        if is_system(m) {
            // discord attributes these to a user author but they are
            // system events (boosts, pins, joins)
            continue;
        }

        let Ok(id) = m.id.parse::<u128>() else {
            tracing::warn!("non-numeric message id: {}", m.id);
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        let Ok(author_id) = m.author.id.parse::<u128>() else {
            tracing::warn!("non-numeric author id: {}", m.author.id);
            continue;
        };
        let Some(postdate) = parse_timestamp(&m.timestamp) else {
            tracing::warn!("unparseable timestamp: {}", m.timestamp);
            continue;
        };

        out.push(RawMessage {
            id,
            community: community.clone(),
            container,
            author: Author {
                id: author_id,
                name: Some(m.author.name.clone()),
                platform: Platform::Discord,
                is_bot: m.author.is_bot,
                is_webhook: is_webhook(&m.author),
            },
            postdate,
            content: m.content.clone(),
        });
    }
    out
}
