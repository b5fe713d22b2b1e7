//! YouTube source adapter.
//!
//! Consumes yt-dlp metadata dumps: one JSON file per video (marked by a
//! `formats` key), carrying the video description and its comment thread.
//! YouTube has no community concept, so channels stand in: the video's
//! channel becomes the community for the video and all of its comments.
//!
//! Ids are base64url without padding. Channel ids are 24 chars with a fixed
//! `UC` prefix; top-level comment ids are 26 chars with a fixed `AaABAg`
//! suffix; both are stripped before decoding so the numeric id fits 128 bits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{narrow_json, try_load_json, walk_files, Source};
use crate::domain::{Author, Community, Platform, RawMessage, Result, NULL_CONTAINER};

/// YouTube ids are canonical base64url; trailing bits are tolerated because
/// 11-char video ids encode 64 bits in 66.
const YT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    #[serde(default)]
    parent: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    author: String,
    author_id: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    fulltitle: Option<String>,
    #[serde(default)]
    description: String,
    channel_id: String,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    uploader_id: Option<String>,
    timestamp: i64,
    #[serde(default)]
    comments: Vec<RawComment>,
}

/// Decode a base64url id into its numeric value.
fn youtube_id_to_int(yt_id: &str) -> Option<u128> {
    let bytes = YT_ENGINE.decode(yt_id).ok()?;
    if bytes.len() > 16 {
        return None;
    }
    let mut buf = [0u8; 16];
    buf[16 - bytes.len()..].copy_from_slice(&bytes);
    Some(u128::from_be_bytes(buf))
}

/// Every channel-shaped user id carries the fixed `UC` pad; chopping it
/// brings the id into range without changing uniqueness.
fn user_id_to_int(user_id: &str) -> Option<u128> {
    let trimmed = if user_id.len() == 24 {
        user_id.strip_prefix("UC").unwrap_or(user_id)
    } else {
        user_id
    };
    youtube_id_to_int(trimmed)
}

/// Top-level comment ids carry a fixed pad too; replies are `parent.child`.
fn comment_id_to_int(comment: &RawComment) -> Option<u128> {
    let mut id = comment.id.as_str();
    if comment.parent != "root" {
        id = id.rsplit('.').next().unwrap_or(id);
    }
    if id.len() == 26 {
        id = id.strip_suffix("AaABAg").unwrap_or(id);
    }
    youtube_id_to_int(id)
}

fn clean_username(raw: &str) -> String {
    raw.trim_start_matches('@').to_string()
}

/// Auto-uploaded music videos have no uploader id.
fn channel_name(video: &VideoFile) -> String {
    let raw = video
        .uploader_id
        .as_deref()
        .or(video.uploader.as_deref())
        .unwrap_or_default();
    clean_username(raw)
}

fn video_content(video: &VideoFile) -> String {
    let title = video
        .fulltitle
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&video.title);

    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(title);
    }
    if !video.description.is_empty() {
        out.push_str("\n\n");
        out.push_str(&video.description);
    }
    out
}

/// Adapter over a directory of yt-dlp video metadata files.
pub struct YouTubeSource {
    root: PathBuf,
}

impl YouTubeSource {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Source for YouTubeSource {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send> {
        // videos are never deduplicated: a later copy of the same video may
        // carry new comments, and the store absorbs the duplicate upsert
        let mut seen_comments: HashSet<u128> = HashSet::new();
        let iter = walk_files(&self.root, |name| name.ends_with(".json"))
            .filter_map(|path| {
                let value = try_load_json(&path)?;
                // only video metadata carries formats
                if value.get("formats").is_none() {
                    return None;
                }
                narrow_json::<VideoFile>(&path, value)
            })
            .flat_map(move |video| video_messages(&video, &mut seen_comments))
            .map(Ok);
        Box::new(iter)
    }
}

fn video_messages(video: &VideoFile, seen_comments: &mut HashSet<u128>) -> Vec<RawMessage> {
    let Some(channel_id) = user_id_to_int(&video.channel_id) else {
        tracing::warn!("undecodable channel id: {}", video.channel_id);
        return Vec::new();
    };
    let Some(video_id) = youtube_id_to_int(&video.id) else {
        tracing::warn!("undecodable video id: {}", video.id);
        return Vec::new();
    };
    let Some(video_postdate) = DateTime::<Utc>::from_timestamp(video.timestamp, 0) else {
        tracing::warn!("out-of-range video timestamp: {}", video.timestamp);
        return Vec::new();
    };

    let community = Community {
        id: channel_id,
        name: channel_name(video),
        platform: Platform::YouTube,
    };
    let channel_author = Author {
        id: channel_id,
        name: Some(channel_name(video)),
        platform: Platform::YouTube,
        // youtube has neither
        is_bot: false,
        is_webhook: false,
    };

    let mut out = vec![RawMessage {
        id: video_id,
        community: community.clone(),
        container: NULL_CONTAINER,
        author: channel_author,
        postdate: video_postdate,
        content: video_content(video),
    }];

    // comments may be omitted when they are disabled
    for comment in &video.comments {
        let Some(comment_id) = comment_id_to_int(comment) else {
            tracing::warn!("undecodable comment id: {}", comment.id);
            continue;
        };
        if !seen_comments.insert(comment_id) {
            continue;
        }
        let Some(author_id) = user_id_to_int(&comment.author_id) else {
            tracing::warn!("undecodable comment author id: {}", comment.author_id);
            continue;
        };
        let Some(postdate) = DateTime::<Utc>::from_timestamp(comment.timestamp, 0) else {
            continue;
        };

        out.push(RawMessage {
            id: comment_id,
            community: community.clone(),
            container: NULL_CONTAINER,
            author: Author {
                id: author_id,
                name: Some(clean_username(&comment.author)),
                platform: Platform::YouTube,
                is_bot: false,
                is_webhook: false,
            },
            postdate,
            content: comment.text.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_decoding() {
        // 11 chars of A is 64 zero bits
        assert_eq!(youtube_id_to_int("AAAAAAAAAAA"), Some(0));
        assert_eq!(youtube_id_to_int("AQ"), Some(1));
        assert_eq!(youtube_id_to_int("!!!"), None);
        // video ids always fit 64 bits
        let id = youtube_id_to_int("dQw4w9WgXcQ").unwrap();
        assert!(id < 1u128 << 64);
    }

    #[test]
    fn test_channel_prefix_strip() {
        let padded = format!("UC{}", "AAAAAAAAAAAAAAAAAAAAAA");
        assert_eq!(padded.len(), 24);
        assert_eq!(user_id_to_int(&padded), Some(0));
        // non-24-char ids pass through untouched
        assert_eq!(user_id_to_int("AQ"), Some(1));
    }

    #[test]
    fn test_comment_id_rules() {
        let top = RawComment {
            id: format!("{}AaABAg", "AAAAAAAAAAAAAAAAAAAA"),
            parent: "root".into(),
            text: String::new(),
            author: String::new(),
            author_id: "x".into(),
            timestamp: 0,
        };
        assert_eq!(top.id.len(), 26);
        assert_eq!(comment_id_to_int(&top), Some(0));

        let reply = RawComment {
            id: "parentpart.AQ".into(),
            parent: "parentpart".into(),
            ..top
        };
        assert_eq!(comment_id_to_int(&reply), Some(1));
    }

    #[test]
    fn test_video_and_comments_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let video = json!({
            "id": "AAAAAAAAAAB",
            "title": "toki pona lesson",
            "description": "mi pana e sona",
            "formats": [],
            "channel_id": "UCAAAAAAAAAAAAAAAAAAAAAB",
            "uploader": "jan Misali",
            "uploader_id": "@misali",
            "timestamp": 1600000000,
            "comments": [
                {
                    "id": "AAAAAAAAAAAAAAAAAAAQ",
                    "parent": "root",
                    "text": "pona!",
                    "author": "@jan",
                    "author_id": "UCAAAAAAAAAAAAAAAAAAAAAC",
                    "timestamp": 1600000100
                }
            ]
        });
        std::fs::write(dir.path().join("v.json"), video.to_string()).unwrap();

        let msgs: Vec<_> = Box::new(YouTubeSource::new(dir.path()))
            .messages()
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "toki pona lesson\n\nmi pana e sona");
        assert_eq!(msgs[0].community.name, "misali");
        assert_eq!(msgs[1].content, "pona!");
        assert_eq!(msgs[1].community, msgs[0].community);
    }
}
