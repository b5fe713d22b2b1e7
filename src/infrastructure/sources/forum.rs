//! Forum source adapter.
//!
//! Consumes scraped phpBB topic pages (`viewtopic.php*`). A page carries at
//! most ten `div.postbody` blocks; index pages carry none and are skipped.
//! Everything posted before October 2009 was migrated from the predecessor
//! Yahoo group and is attributed to that community instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{fake_id, walk_files, Source};
use crate::domain::{Author, Community, Platform, RawMessage, Result, NULL_CONTAINER};

const FORUM_NAME: &str = "forums.tokipona.org";
const YAHOO_GROUP_NAME: &str = "tokipona@yahoogroups.com";

/// The day the forum replaced the yahoo group.
fn move_date() -> DateTime<Utc> {
    crate::domain::timeline::ymd_utc(2009, 10, 1)
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::warn!("bad selector {css}: {e:?}");
            None
        }
    }
}

/// Pull a query parameter out of an href, tolerating percent-encoded
/// separators left behind by the archiver.
fn url_param(url: &str, key: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"(?:%3F|\?|%26|&)([a-z])=([a-zA-Z0-9]+)").ok())
        .as_ref()?;
    re.captures_iter(url)
        .find(|c| &c[1] == key)
        .map(|c| c[2].to_string())
}

/// Collect the visible text of an element, one text node per line, dropping
/// quoted replies and fencing code boxes.
fn post_text(el: ElementRef, out: &mut Vec<String>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push(text.to_string());
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let value = child_el.value();
        if value.name() == "blockquote" {
            // quoted replies re-count previously existing content
            continue;
        }
        if value.name() == "div" && value.classes().any(|c| c == "codebox") {
            let code: Vec<String> = child_el.text().map(ToString::to_string).collect();
            out.push(format!("```\n{}\n```", code.join("\n")));
            continue;
        }
        post_text(child_el, out);
    }
}

/// Adapter over a directory of scraped forum pages.
pub struct ForumSource {
    root: PathBuf,
}

impl ForumSource {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Source for ForumSource {
    fn platform(&self) -> Platform {
        Platform::Forum
    }

    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send> {
        let mut seen: HashSet<u128> = HashSet::new();
        let iter = walk_files(&self.root, |name| name.starts_with("viewtopic.php"))
            .flat_map(move |path| page_messages(&path, &mut seen))
            .map(Ok);
        Box::new(iter)
    }
}

fn page_messages(path: &Path, seen: &mut HashSet<u128>) -> Vec<RawMessage> {
    let html = match std::fs::read_to_string(path) {
        Ok(html) => html,
        Err(e) => {
            tracing::warn!("failed to read {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let document = Html::parse_document(&html);

    let (Some(post_sel), Some(content_sel), Some(author_sel), Some(id_sel), Some(date_sel)) = (
        selector("div.postbody"),
        selector("div.content"),
        selector(
            "span.responsive-hide > strong > .username, \
             span.responsive-hide > strong > .username-coloured",
        ),
        selector("h3 a"),
        selector("p.author > time"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    // there are at most ten posts per page
    for post in document.select(&post_sel).take(10) {
        let Some(id) = post
            .select(&id_sel)
            .next()
            .and_then(|a| a.attr("href"))
            .and_then(|href| url_param(href, "p"))
            .and_then(|p| p.parse::<u128>().ok())
        else {
            tracing::warn!("post without id in {}", path.display());
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        let Some(author_el) = post.select(&author_sel).next() else {
            tracing::warn!("post {id} without author in {}", path.display());
            continue;
        };
        let author_name: String = author_el.text().collect();
        if author_name.is_empty() {
            tracing::warn!("post {id} with empty author in {}", path.display());
            continue;
        }
        // forum members link to a profile; yahoo-era authors only have a name
        let author_id = author_el
            .attr("href")
            .and_then(|href| url_param(href, "u"))
            .and_then(|u| u.parse::<u128>().ok())
            .unwrap_or_else(|| fake_id(&author_name));

        let Some(postdate) = post
            .select(&date_sel)
            .next()
            .and_then(|t| t.attr("datetime"))
            .and_then(|dt| DateTime::parse_from_rfc3339(dt).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            tracing::warn!("post {id} without date in {}", path.display());
            continue;
        };

        let Some(content_el) = post.select(&content_sel).next() else {
            tracing::warn!("post {id} without content in {}", path.display());
            continue;
        };
        let mut segments = Vec::new();
        post_text(content_el, &mut segments);
        let content = segments.join("\n");

        let community_name = if postdate >= move_date() {
            FORUM_NAME
        } else {
            YAHOO_GROUP_NAME
        };

        out.push(RawMessage {
            id,
            community: Community {
                id: fake_id(community_name),
                name: community_name.to_string(),
                platform: Platform::Forum,
            },
            container: NULL_CONTAINER,
            author: Author {
                id: author_id,
                name: Some(author_name),
                platform: Platform::Forum,
                // there are bots, but the page doesn't tell us
                is_bot: false,
                is_webhook: false,
            },
            postdate,
            content,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_html(post_id: u32, date: &str, author: &str, profile: bool, content: &str) -> String {
        let author_html = if profile {
            format!(
                "<a class=\"username\" href=\"./memberlist.php?mode=viewprofile&u=77\">{author}</a>"
            )
        } else {
            format!("<span class=\"username\">{author}</span>")
        };
        format!(
            r#"<div class="postbody">
                <h3><a href="./viewtopic.php?f=1&t=2&p={post_id}#p{post_id}">Re: toki</a></h3>
                <p class="author"><span class="responsive-hide"><strong>{author_html}</strong></span>
                   <time datetime="{date}">whenever</time></p>
                <div class="content">{content}</div>
            </div>"#
        )
    }

    fn collect(html: &str) -> Vec<RawMessage> {
        let dir = tempfile::tempdir().unwrap();
        let page = format!("<html><body>{html}</body></html>");
        std::fs::write(dir.path().join("viewtopic.php?f=1&t=2"), page).unwrap();
        Box::new(ForumSource::new(dir.path()))
            .messages()
            .map(|m| m.unwrap())
            .collect()
    }

    #[test]
    fn test_forum_era_post() {
        let msgs = collect(&post_html(
            123,
            "2012-03-04T05:06:07+00:00",
            "jan Ante",
            true,
            "mi toki",
        ));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, 123);
        assert_eq!(msgs[0].author.id, 77);
        assert_eq!(msgs[0].community.name, FORUM_NAME);
        assert_eq!(msgs[0].content, "mi toki");
    }

    #[test]
    fn test_yahoo_era_author_gets_fake_id() {
        let msgs = collect(&post_html(
            5,
            "2004-01-01T00:00:00+00:00",
            "someone",
            false,
            "toki",
        ));
        assert_eq!(msgs[0].community.name, YAHOO_GROUP_NAME);
        assert_eq!(msgs[0].author.id, fake_id("someone"));
    }

    #[test]
    fn test_blockquote_dropped_codebox_fenced() {
        let content = r#"before<blockquote>quoted text</blockquote><div class="codebox">let x = 1;</div>after"#;
        let msgs = collect(&post_html(9, "2015-01-01T00:00:00+00:00", "jan", true, content));
        assert!(!msgs[0].content.contains("quoted text"));
        assert!(msgs[0].content.contains("```\nlet x = 1;\n```"));
        assert!(msgs[0].content.contains("before"));
        assert!(msgs[0].content.contains("after"));
    }

    #[test]
    fn test_url_param_variants() {
        assert_eq!(url_param("./viewtopic.php?f=1&p=42", "p").as_deref(), Some("42"));
        assert_eq!(url_param("x.php%3Fp=7", "p").as_deref(), Some("7"));
        assert_eq!(url_param("x.php?f=1%26u=9", "u").as_deref(), Some("9"));
        assert_eq!(url_param("x.php?f=1", "p"), None);
    }

    #[test]
    fn test_dedupe_and_page_without_posts() {
        let dir = tempfile::tempdir().unwrap();
        let page = format!(
            "<html><body>{}{}</body></html>",
            post_html(1, "2015-01-01T00:00:00+00:00", "jan", true, "toki"),
            post_html(1, "2015-01-01T00:00:00+00:00", "jan", true, "toki")
        );
        std::fs::write(dir.path().join("viewtopic.php?t=1"), page).unwrap();
        std::fs::write(dir.path().join("index.php"), "<html></html>").unwrap();

        let msgs: Vec<_> = Box::new(ForumSource::new(dir.path()))
            .messages()
            .collect();
        assert_eq!(msgs.len(), 1);
    }
}
