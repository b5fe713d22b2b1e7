//! Telegram source adapter.
//!
//! Consumes Telegram Desktop chat exports: one JSON file per chat with
//! top-level `name`, `type`, `id` and `messages`. Telegram message ids are
//! only unique per chat, so the canonical id is `chat_id * 2^64 + msg_id`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{narrow_json, try_load_json, walk_files, Source};
use crate::domain::{AppError, Author, Community, Platform, RawMessage, Result, NULL_CONTAINER};

/// The 1chat bridge relays messages from other platforms under its own
/// account, with the real author bolded in the first text entity.
const ONECHAT_BRIDGE_ID: u128 = 128_026_086;

/// The only known Telegram bot that speaks the language.
const TPT_RULES_BOT_ID: u128 = 1_534_630_115;

#[derive(Debug, Clone, Deserialize)]
struct TextEntity {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawTelegramMessage {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    date_unixtime: String,
    #[serde(default)]
    text_entities: Vec<TextEntity>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    forwarded_from: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    name: String,
    id: i64,
    #[serde(default)]
    messages: Vec<RawTelegramMessage>,
}

/// Split a typed actor id (`user123`, `channel456`) into its numeric part.
fn split_actor_id(id: &str) -> Result<u128> {
    let digits = id
        .strip_prefix("user")
        .or_else(|| id.strip_prefix("channel"));
    digits
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| AppError::invariant(format!("unknown telegram actor id: {id}")))
}

/// Render one text entity back into markdown-v2-flavored plain text.
fn format_entity(ent: &TextEntity) -> String {
    let text = &ent.text;
    match ent.kind.as_str() {
        "mention" => format!("<{text}>"),
        "mention_name" => format!("<@{text}>"),
        "blockquote" => format!("> {text}"),
        "code" => {
            if text.contains('\n') {
                format!("```\n{text}\n```")
            } else {
                format!("`{text}`")
            }
        }
        "bold" => format!("*{text}*"),
        "italic" => format!("_{text}_"),
        "underline" => format!("__{text}__"),
        "strikethrough" => format!("~{text}~"),
        "spoiler" => format!("||{text}||"),
        _ => text.clone(),
    }
}

fn coalesce_entities(entities: &[TextEntity]) -> String {
    entities.iter().map(format_entity).collect()
}

/// Adapter over a directory of Telegram chat exports.
pub struct TelegramSource {
    root: PathBuf,
}

impl TelegramSource {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Source for TelegramSource {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send> {
        let mut seen: HashSet<u128> = HashSet::new();
        let iter = walk_files(&self.root, |name| name.ends_with(".json"))
            .filter_map(|path| {
                let value = try_load_json(&path)?;
                // only chat exports carry both markers
                if value.get("name").is_none() || value.get("type").is_none() {
                    return None;
                }
                narrow_json::<TelegramFile>(&path, value)
            })
            .flat_map(move |file| file_messages(&file, &mut seen));
        Box::new(iter)
    }
}

fn file_messages(file: &TelegramFile, seen: &mut HashSet<u128>) -> Vec<Result<RawMessage>> {
    let community = Community {
        id: file.id.unsigned_abs().into(),
        name: file.name.clone(),
        platform: Platform::Telegram,
    };

    let mut out = Vec::new();
    for m in &file.messages {
        if m.kind == "service" {
            // join notifs, channel edits, etc.
            continue;
        }
        if m.kind != "message" {
            out.push(Err(AppError::invariant(format!(
                "unknown telegram message type {:?} (id {})",
                m.kind, m.id
            ))));
            continue;
        }
        if m.forwarded_from.is_some() {
            // ignore forwards entirely
            continue;
        }

        // per-chat ids, so the community id is folded into the high bits
        let id = community.id * (1u128 << 64) + u128::from(m.id.unsigned_abs());
        if !seen.insert(id) {
            continue;
        }

        let actor_id = match m.from_id.as_deref() {
            Some(raw) => match split_actor_id(raw) {
                Ok(actor_id) => actor_id,
                Err(e) => {
                    out.push(Err(e));
                    continue;
                }
            },
            None => {
                out.push(Err(AppError::invariant(format!(
                    "telegram message {} has no from_id",
                    m.id
                ))));
                continue;
            }
        };

        let mut author = Author {
            id: actor_id,
            name: m.from.clone(),
            platform: Platform::Telegram,
            // service messages are skipped, and otherwise we can't know
            is_bot: actor_id == TPT_RULES_BOT_ID,
            is_webhook: false,
        };

        let mut entities = m.text_entities.clone();
        if actor_id == ONECHAT_BRIDGE_ID && entities.len() > 1 {
            // the bridge always bolds the real author's name first,
            // followed by ": " at the head of the next entity
            author.name = Some(entities[0].text.clone());
            entities.remove(0);
            let rest = &mut entities[0].text;
            *rest = rest.chars().skip(2).collect();
        }

        let Some(postdate) = m
            .date_unixtime
            .parse::<i64>()
            .ok()
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        else {
            tracing::warn!("unparseable telegram date: {}", m.date_unixtime);
            continue;
        };

        out.push(Ok(RawMessage {
            id,
            community: community.clone(),
            container: NULL_CONTAINER,
            author,
            postdate,
            content: coalesce_entities(&entities),
        }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(messages: serde_json::Value) -> serde_json::Value {
        json!({
            "name": "kulupu pona",
            "type": "public_supergroup",
            "id": 111,
            "messages": messages
        })
    }

    fn plain(id: i64, from_id: &str, text: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "message",
            "date_unixtime": "1684000000",
            "from": "jan",
            "from_id": from_id,
            "text_entities": [{"type": "plain", "text": text}]
        })
    }

    fn collect(dir: &Path) -> Vec<RawMessage> {
        Box::new(TelegramSource::new(dir))
            .messages()
            .map(|m| m.unwrap())
            .collect()
    }

    #[test]
    fn test_composite_id_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = chat(json!([plain(5, "user42", "toki")]));
        std::fs::write(dir.path().join("chat.json"), file.to_string()).unwrap();

        let msgs = collect(dir.path());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, 111u128 * (1u128 << 64) + 5);
        assert_eq!(msgs[0].author.id, 42);
        assert_eq!(msgs[0].content, "toki");
    }

    #[test]
    fn test_skips_service_and_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut fwd = plain(2, "user42", "hi");
        fwd["forwarded_from"] = json!("someone");
        let service = json!({
            "id": 3,
            "type": "service",
            "date_unixtime": "1684000000",
            "actor_id": "user1",
            "action": "pin_message",
            "text_entities": []
        });
        let file = chat(json!([plain(1, "user42", "toki"), fwd, service]));
        std::fs::write(dir.path().join("chat.json"), file.to_string()).unwrap();

        let msgs = collect(dir.path());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id % (1u128 << 64), 1);
    }

    #[test]
    fn test_onechat_bridge_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let bridged = json!({
            "id": 9,
            "type": "message",
            "date_unixtime": "1684000000",
            "from": "1chat",
            "from_id": format!("user{ONECHAT_BRIDGE_ID}"),
            "text_entities": [
                {"type": "bold", "text": "jan Sonja"},
                {"type": "plain", "text": ": toki a"}
            ]
        });
        let file = chat(json!([bridged]));
        std::fs::write(dir.path().join("chat.json"), file.to_string()).unwrap();

        let msgs = collect(dir.path());
        assert_eq!(msgs[0].author.name.as_deref(), Some("jan Sonja"));
        assert_eq!(msgs[0].content, "toki a");
    }

    #[test]
    fn test_entity_formatting() {
        let ent = |kind: &str, text: &str| TextEntity {
            kind: kind.into(),
            text: text.into(),
        };
        assert_eq!(format_entity(&ent("bold", "a")), "*a*");
        assert_eq!(format_entity(&ent("italic", "a")), "_a_");
        assert_eq!(format_entity(&ent("strikethrough", "a")), "~a~");
        assert_eq!(format_entity(&ent("spoiler", "a")), "||a||");
        assert_eq!(format_entity(&ent("mention", "@jan")), "<@jan>");
        assert_eq!(format_entity(&ent("code", "x")), "`x`");
        assert_eq!(format_entity(&ent("code", "x\ny")), "```\nx\ny\n```");
        assert_eq!(format_entity(&ent("plain", "a")), "a");
    }

    #[test]
    fn test_unknown_actor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = chat(json!([plain(1, "gremlin7", "toki")]));
        std::fs::write(dir.path().join("chat.json"), file.to_string()).unwrap();

        let results: Vec<_> = Box::new(TelegramSource::new(dir.path())).messages().collect();
        assert!(matches!(results[0], Err(AppError::Invariant { .. })));
    }
}
