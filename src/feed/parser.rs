use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::storage::{EntryInput, ParsedItem};

/// A feed document reduced to what ingestion stores
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<ParsedItem>,
}

/// Parse an RSS/Atom/JSON Feed document.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let uri = entry.links.first().map(|l| l.href.clone());
            let title = entry.title.map(|t| t.content);
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|name| !name.trim().is_empty());
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let guid = generate_guid(
                existing_id,
                uri.as_deref(),
                title.as_deref().unwrap_or(""),
                entry.published.or(entry.updated).map(|dt| dt.timestamp()),
            );

            ParsedItem {
                guid,
                entry: EntryInput {
                    uri,
                    title,
                    author,
                    content,
                    updated: entry.updated,
                    published: entry.published,
                },
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        items,
    })
}

/// Use the source id when present, otherwise a SHA-256 over `uri|title|published`.
fn generate_guid(
    existing: Option<&str>,
    uri: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        uri.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
