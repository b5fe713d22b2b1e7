//! Publication source adapter.
//!
//! Consumes markdown articles with YAML front-matter (periodicals, wikis,
//! anthologies). Publications have no native ids, so the id is a hash of
//! the body text; publication dates are often only year- or month-precise
//! and are snapped to a stable midpoint.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{fake_id, walk_files, Source};
use crate::domain::{
    timeline::ymd_utc, AppError, Author, Community, Platform, RawMessage, Result, NULL_AUTHOR,
    NULL_CONTAINER,
};

#[derive(Debug, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
}

/// Split a markdown document into front-matter and body.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let meta = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n');
    Some((meta, body))
}

/// Snap a partial date to a stable midpoint: a bare year to July 1, a
/// year-month to the 15th. Anything else is a record the pipeline refuses
/// to guess about.
fn coalesce_postdate(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    let parts: Vec<&str> = raw.split('-').collect();
    let parsed = match parts.as_slice() {
        [y] => y.parse().ok().map(|y| ymd_utc(y, 7, 1)),
        [y, m] => match (y.parse().ok(), m.parse().ok()) {
            (Some(y), Some(m)) if (1..=12).contains(&m) => Some(ymd_utc(y, m, 15)),
            _ => None,
        },
        [y, m, d] => match (y.parse().ok(), m.parse().ok(), d.parse().ok()) {
            (Some(y), Some(m), Some(d)) if (1..=12).contains(&m) && (1..=31).contains(&d) => {
                Some(ymd_utc(y, m, d))
            }
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| {
        AppError::invariant(format!(
            "invalid publication date: {raw:?}. Expected YYYY, YYYY-MM or YYYY-MM-DD"
        ))
    })
}

/// Adapter over a directory of markdown publications.
pub struct PublicationSource {
    root: PathBuf,
}

impl PublicationSource {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Source for PublicationSource {
    fn platform(&self) -> Platform {
        Platform::Publication
    }

    fn messages(self: Box<Self>) -> Box<dyn Iterator<Item = Result<RawMessage>> + Send> {
        let mut seen: HashSet<u128> = HashSet::new();
        let iter = walk_files(&self.root, |name| name.ends_with(".md"))
            .filter_map(move |path| file_message(&path, &mut seen));
        Box::new(iter)
    }
}

fn file_message(path: &Path, seen: &mut HashSet<u128>) -> Option<Result<RawMessage>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    let (meta, body) = split_front_matter(&text)?;
    if body.is_empty() {
        return None;
    }
    let meta: FrontMatter = match serde_yaml::from_str(meta) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!("malformed front-matter in {}: {}", path.display(), e);
            return None;
        }
    };
    // undated articles can't be bucketed
    let date = meta.date.as_deref().filter(|d| !d.is_empty())?;

    let id = fake_id(body);
    if !seen.insert(id) {
        return None;
    }

    let postdate = match coalesce_postdate(date) {
        Ok(postdate) => postdate,
        Err(e) => return Some(Err(e)),
    };

    // multiple attribution isn't representable; the first author wins,
    // and a blank first entry falls back to the null author
    let (author_id, author_name) = meta
        .authors
        .first()
        .filter(|a| !a.is_empty())
        .map_or((NULL_AUTHOR, None), |name| {
            (fake_id(name), Some(name.clone()))
        });

    Some(Ok(RawMessage {
        id,
        community: Community {
            id: Platform::Publication as u128,
            name: Platform::Publication.to_string(),
            platform: Platform::Publication,
        },
        container: NULL_CONTAINER,
        author: Author {
            id: author_id,
            name: author_name,
            platform: Platform::Publication,
            is_bot: false,
            is_webhook: false,
        },
        postdate,
        content: body.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(date: &str, body: &str) -> String {
        format!("---\ntitle: lipu\ndate: \"{date}\"\nauthors:\n  - jan Sonja\n---\n{body}\n")
    }

    fn collect(dir: &Path) -> Vec<Result<RawMessage>> {
        Box::new(PublicationSource::new(dir)).messages().collect()
    }

    #[test]
    fn test_full_article() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.md"),
            article("2021-03-04", "toki pona li pona"),
        )
        .unwrap();

        let msgs: Vec<_> = collect(dir.path()).into_iter().map(|m| m.unwrap()).collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, fake_id("toki pona li pona\n"));
        assert_eq!(msgs[0].author.id, fake_id("jan Sonja"));
        assert_eq!(msgs[0].postdate, ymd_utc(2021, 3, 4));
        assert_eq!(msgs[0].community.id, 200);
    }

    #[test]
    fn test_partial_dates_snap_to_midpoints() {
        assert_eq!(coalesce_postdate("2021").unwrap(), ymd_utc(2021, 7, 1));
        assert_eq!(coalesce_postdate("2021-05").unwrap(), ymd_utc(2021, 5, 15));
        assert_eq!(
            coalesce_postdate("2021-05-02").unwrap(),
            ymd_utc(2021, 5, 2)
        );
        assert!(coalesce_postdate("may 2021").is_err());
        assert!(coalesce_postdate("2021-13").is_err());
    }

    #[test]
    fn test_blank_first_author_is_null_author() {
        let dir = tempfile::tempdir().unwrap();
        // only the first entry counts; later names don't rescue it
        std::fs::write(
            dir.path().join("a.md"),
            "---\ndate: \"2021\"\nauthors:\n  - \"\"\n  - jan Sonja\n---\ntoki\n",
        )
        .unwrap();

        let msgs: Vec<_> = collect(dir.path()).into_iter().map(|m| m.unwrap()).collect();
        assert_eq!(msgs[0].author.id, NULL_AUTHOR);
        assert_eq!(msgs[0].author.name, None);
    }

    #[test]
    fn test_undated_or_empty_articles_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nodate.md"), "---\ntitle: x\n---\nbody").unwrap();
        std::fs::write(dir.path().join("nobody.md"), article("2021", "")).unwrap();
        std::fs::write(dir.path().join("plain.md"), "no front matter").unwrap();

        assert!(collect(dir.path()).is_empty());
    }

    #[test]
    fn test_duplicate_bodies_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), article("2021", "same body")).unwrap();
        std::fs::write(dir.path().join("b.md"), article("2022", "same body")).unwrap();

        assert_eq!(collect(dir.path()).len(), 1);
    }
}
