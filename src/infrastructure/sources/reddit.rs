//! Reddit source adapter.
//!
//! Consumes Pushshift-style archive files: newline-delimited JSON with one
//! submission or comment per line, in files named `*comments*` or
//! `*submissions*`. Reddit ids are base-36; typed ids (`t2_…`, `t5_…`)
//! carry an object-kind prefix.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{walk_files, Source};
use crate::domain::{Author, Community, Platform, RawMessage, Result, NULL_AUTHOR, NULL_CONTAINER};

#[derive(Debug, Deserialize)]
struct RawRedditRecord {
    id: String,
    subreddit: String,
    subreddit_id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    author_fullname: Option<String>,
    created_utc: serde_json::Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

fn b36_decode(id: &str) -> Option<u128> {
    u128::from_str_radix(id, 36).ok()
}

/// Split a typed id like `t5_2qh0y` into its base-36 payload.
fn split_typed_id(typed: &str) -> Option<u128> {
    let (_, b36) = typed.split_once('_')?;
    b36_decode(b36)
}

/// Submissions join title and selftext; comments are just the body.
/// The archive escapes a few entities that the scorer should not see.
fn format_post(record: &RawRedditRecord) -> String {
    let mut content = String::new();
    if let Some(title) = record.title.as_deref() {
        content.push_str(title);
    }
    if let Some(selftext) = record.selftext.as_deref() {
        if !selftext.is_empty() {
            content.push_str("\n\n");
            content.push_str(selftext);
        }
    }
    if let Some(body) = record.body.as_deref() {
        // only comments have a body
        content = body.to_string();
    }

    content
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
        .replace("#x200B", "\u{200b}")
}

fn parse_created(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let ts = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
}

/// Adapter over a directory of Reddit archive files.
pub struct RedditSource {
    root: PathBuf,
}

impl RedditSource {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Source for RedditSource {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send> {
        let files = walk_files(&self.root, |name| {
            (name.contains("comments") || name.contains("submissions")) && !name.ends_with(".zst")
        });
        Box::new(RedditIter {
            files: Box::new(files),
            current: None,
            seen: HashSet::new(),
        })
    }
}

/// Streams archive files line by line so multi-gigabyte dumps never load
/// into memory at once.
struct RedditIter {
    files: Box<dyn Iterator<Item = PathBuf> + Send>,
    current: Option<Lines<BufReader<File>>>,
    seen: HashSet<u128>,
}

impl Iterator for RedditIter {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(lines) = self.current.as_mut() {
                for line in lines.by_ref() {
                    let Ok(line) = line else { break };
                    if let Some(msg) = parse_line(&line, &mut self.seen) {
                        return Some(Ok(msg));
                    }
                }
                self.current = None;
            }

            let path = self.files.next()?;
            match File::open(&path) {
                Ok(file) => self.current = Some(BufReader::new(file).lines()),
                Err(e) => tracing::warn!("failed to open {}: {}", path.display(), e),
            }
        }
    }
}

fn parse_line(line: &str, seen: &mut HashSet<u128>) -> Option<RawMessage> {
    if line.trim().is_empty() {
        return None;
    }
    let record: RawRedditRecord = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!("malformed reddit record: {e}");
            return None;
        }
    };

    let id = b36_decode(&record.id)?;
    if !seen.insert(id) {
        return None;
    }

    let community_id = split_typed_id(&record.subreddit_id)?;
    let author_id = record
        .author_fullname
        .as_deref()
        .and_then(split_typed_id)
        .unwrap_or(NULL_AUTHOR);

    let postdate = parse_created(&record.created_utc)?;

    Some(RawMessage {
        id,
        community: Community {
            id: community_id,
            name: record.subreddit.clone(),
            platform: Platform::Reddit,
        },
        container: NULL_CONTAINER,
        author: Author {
            id: author_id,
            name: record.author.clone(),
            platform: Platform::Reddit,
            // there are bots, but the archive doesn't tell us
            is_bot: false,
            is_webhook: false,
        },
        postdate,
        content: format_post(&record),
    })
}
