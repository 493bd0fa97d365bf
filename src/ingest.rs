//! Subscribing to a feed and storing its parsed items.

use crate::backend::Backend;
use crate::storage::{Feed, FeedInput, ParsedItem, StorageError};

/// Subscribe to a feed and store its items, returning the feed record.
///
/// Safe to repeat: an existing feed is looked up by uri and items whose guid
/// is already stored for the feed are skipped. Items are inserted one at a
/// time without an enclosing transaction, so a storage fault part-way through
/// leaves the earlier items in place.
///
/// # Errors
///
/// Any storage fault other than the feed/entry uniqueness conflicts.
pub async fn subscribe(
    backend: &dyn Backend,
    input: &FeedInput,
    items: &[ParsedItem],
) -> Result<Feed, StorageError> {
    let feed = match backend.insert_feed(input).await? {
        Some(id) => Feed {
            id,
            uri: input.uri.clone(),
            title: input.title.clone(),
        },
        // Already subscribed, possibly by a concurrent caller
        None => backend
            .get_feed_by_uri(&input.uri)
            .await?
            .ok_or_else(|| StorageError::FeedNotFound {
                uri: input.uri.clone(),
            })?,
    };

    let mut inserted = 0usize;
    for item in items {
        if backend
            .insert_entry(feed.id, &item.guid, &item.entry)
            .await?
            .is_some()
        {
            inserted += 1;
        }
    }

    tracing::info!(
        feed_id = feed.id,
        uri = %feed.uri,
        inserted = inserted,
        skipped = items.len() - inserted,
        "Subscribed to feed"
    );

    Ok(feed)
}
