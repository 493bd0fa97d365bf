use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BatchFn, DataLoader, LoadError};
use crate::backend::Backend;
use crate::storage::{Entry, EntrySearch, Feed, FeedSearch, StorageError};

// ============================================================================
// Batch Functions
// ============================================================================

/// Feeds keyed by id
pub struct FeedsById(Arc<dyn Backend>);

#[async_trait]
impl BatchFn<i64, Feed> for FeedsById {
    async fn load(&self, keys: &[i64]) -> Result<HashMap<i64, Feed>, StorageError> {
        let feeds = self.0.get_feeds(Some(&FeedSearch::by_ids(keys))).await?;
        Ok(feeds.into_iter().map(|feed| (feed.id, feed)).collect())
    }
}

/// Entries keyed by id
pub struct EntriesById(Arc<dyn Backend>);

#[async_trait]
impl BatchFn<i64, Entry> for EntriesById {
    async fn load(&self, keys: &[i64]) -> Result<HashMap<i64, Entry>, StorageError> {
        let entries = self.0.get_entries(Some(&EntrySearch::by_ids(keys))).await?;
        Ok(entries.into_iter().map(|entry| (entry.id, entry)).collect())
    }
}

/// Entries grouped by owning feed id. Feeds without entries are absent.
pub struct EntriesByFeed(Arc<dyn Backend>);

#[async_trait]
impl BatchFn<i64, Vec<Entry>> for EntriesByFeed {
    async fn load(&self, keys: &[i64]) -> Result<HashMap<i64, Vec<Entry>>, StorageError> {
        let entries = self
            .0
            .get_entries(Some(&EntrySearch::by_feed_ids(keys)))
            .await?;

        let mut grouped: HashMap<i64, Vec<Entry>> = HashMap::with_capacity(keys.len());
        for entry in entries {
            grouped.entry(entry.feed_id).or_default().push(entry);
        }
        Ok(grouped)
    }
}

// ============================================================================
// Request Loaders
// ============================================================================

/// The loaders for one external request.
///
/// Build one per incoming query and drop it when the response is sent; the
/// caches are never refreshed, so sharing an instance across requests would
/// serve stale records.
pub struct RequestLoaders {
    backend: Arc<dyn Backend>,
    pub feed_by_id: DataLoader<i64, Feed, FeedsById>,
    pub entry_by_id: DataLoader<i64, Entry, EntriesById>,
    pub entries_by_feed: DataLoader<i64, Vec<Entry>, EntriesByFeed>,
}

impl RequestLoaders {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            feed_by_id: DataLoader::new(FeedsById(backend.clone())),
            entry_by_id: DataLoader::new(EntriesById(backend.clone())),
            entries_by_feed: DataLoader::new(EntriesByFeed(backend.clone())),
            backend,
        }
    }

    /// List feeds, priming the by-id cache with every result
    pub async fn feeds(&self, search: Option<&FeedSearch>) -> Result<Vec<Feed>, LoadError> {
        let feeds = self
            .backend
            .get_feeds(search)
            .await
            .map_err(|e| LoadError::Storage(Arc::new(e)))?;
        for feed in &feeds {
            self.feed_by_id.prime(feed.id, feed.clone());
        }
        Ok(feeds)
    }

    /// List entries, priming the by-id cache with every result
    pub async fn entries(&self, search: Option<&EntrySearch>) -> Result<Vec<Entry>, LoadError> {
        let entries = self
            .backend
            .get_entries(search)
            .await
            .map_err(|e| LoadError::Storage(Arc::new(e)))?;
        for entry in &entries {
            self.entry_by_id.prime(entry.id, entry.clone());
        }
        Ok(entries)
    }

    pub async fn feed(&self, id: i64) -> Result<Option<Feed>, LoadError> {
        self.feed_by_id.load(id).await
    }

    pub async fn entry(&self, id: i64) -> Result<Option<Entry>, LoadError> {
        self.entry_by_id.load(id).await
    }

    /// The feed an entry belongs to (entry -> feed edge)
    pub async fn feed_of(&self, entry: &Entry) -> Result<Option<Feed>, LoadError> {
        self.feed_by_id.load(entry.feed_id).await
    }

    /// The entries of a feed (feed -> entries edge).
    ///
    /// Returned entries are primed into the by-id cache.
    pub async fn entries_of(&self, feed: &Feed) -> Result<Vec<Entry>, LoadError> {
        let entries = self
            .entries_by_feed
            .load(feed.id)
            .await?
            .unwrap_or_default();
        for entry in &entries {
            self.entry_by_id.prime(entry.id, entry.clone());
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, EntryInput, FeedInput};
    use futures::future;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Wraps a real backend and records every read
    struct Recording {
        inner: Database,
        feed_reads: Mutex<Vec<Option<FeedSearch>>>,
        entry_reads: Mutex<Vec<Option<EntrySearch>>>,
    }

    impl Recording {
        fn feed_reads(&self) -> Vec<Option<FeedSearch>> {
            self.feed_reads.lock().unwrap().clone()
        }

        fn entry_reads(&self) -> Vec<Option<EntrySearch>> {
            self.entry_reads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for Recording {
        async fn insert_feed(&self, input: &FeedInput) -> Result<Option<i64>, StorageError> {
            self.inner.insert_feed(input).await
        }

        async fn get_feeds(
            &self,
            search: Option<&FeedSearch>,
        ) -> Result<Vec<Feed>, StorageError> {
            self.feed_reads.lock().unwrap().push(search.cloned());
            Backend::get_feeds(&self.inner, search).await
        }

        async fn get_feed_by_uri(&self, uri: &str) -> Result<Option<Feed>, StorageError> {
            self.inner.get_feed_by_uri(uri).await
        }

        async fn insert_entry(
            &self,
            feed_id: i64,
            guid: &str,
            input: &EntryInput,
        ) -> Result<Option<i64>, StorageError> {
            self.inner.insert_entry(feed_id, guid, input).await
        }

        async fn get_entries(
            &self,
            search: Option<&EntrySearch>,
        ) -> Result<Vec<Entry>, StorageError> {
            self.entry_reads.lock().unwrap().push(search.cloned());
            Backend::get_entries(&self.inner, search).await
        }
    }

    /// Two feeds: the first with three entries, the second with one
    async fn seeded() -> Arc<Recording> {
        let db = Database::open(":memory:").await.unwrap();
        let a = db
            .insert_feed(&FeedInput::new("https://a.example.com/rss"))
            .await
            .unwrap()
            .unwrap();
        let b = db
            .insert_feed(&FeedInput::new("https://b.example.com/rss"))
            .await
            .unwrap()
            .unwrap();
        for (feed_id, guid) in [(a, "a1"), (a, "a2"), (a, "a3"), (b, "b1")] {
            db.insert_entry(feed_id, guid, &EntryInput::default())
                .await
                .unwrap();
        }
        Arc::new(Recording {
            inner: db,
            feed_reads: Mutex::new(Vec::new()),
            entry_reads: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_entry_to_feed_edges_batch_into_one_query() {
        let backend = seeded().await;
        let loaders = RequestLoaders::new(backend.clone());

        let entries = loaders.entries(None).await.unwrap();
        assert_eq!(entries.len(), 4);

        let feeds = future::try_join_all(entries.iter().map(|e| loaders.feed_of(e)))
            .await
            .unwrap();
        assert!(feeds.iter().all(Option::is_some));
        for (entry, feed) in entries.iter().zip(&feeds) {
            assert_eq!(feed.as_ref().map(|f| f.id), Some(entry.feed_id));
        }

        // A single bulk fetch carrying both distinct feed ids
        let reads = backend.feed_reads();
        assert_eq!(reads.len(), 1);
        let mut ids = reads[0].as_ref().and_then(|s| s.ids.clone()).unwrap();
        ids.sort();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_feed_to_entries_edges_batch_and_prime() {
        let backend = seeded().await;
        let loaders = RequestLoaders::new(backend.clone());

        let feeds = loaders.feeds(None).await.unwrap();
        let per_feed = future::try_join_all(feeds.iter().map(|f| loaders.entries_of(f)))
            .await
            .unwrap();
        assert_eq!(per_feed.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(backend.entry_reads().len(), 1);

        // Detail lookups after the listing are served from primed cache
        let first = per_feed[0][0].clone();
        assert_eq!(loaders.entry(first.id).await.unwrap(), Some(first));
        assert_eq!(backend.entry_reads().len(), 1);

        let feed = loaders.feed(feeds[1].id).await.unwrap();
        assert_eq!(feed.map(|f| f.uri), Some("https://b.example.com/rss".to_string()));
        assert_eq!(backend.feed_reads().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_without_entries_resolves_empty() {
        let backend = seeded().await;
        let id = backend
            .insert_feed(&FeedInput::new("https://empty.example.com/rss"))
            .await
            .unwrap()
            .unwrap();
        let loaders = RequestLoaders::new(backend.clone());

        let feed = loaders.feed(id).await.unwrap().unwrap();
        assert!(loaders.entries_of(&feed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_resolve_to_none() {
        let backend = seeded().await;
        let loaders = RequestLoaders::new(backend.clone());

        assert_eq!(loaders.feed(9999).await.unwrap(), None);
        assert_eq!(loaders.entry(9999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fresh_loaders_see_new_rows() {
        let backend = seeded().await;

        let first = RequestLoaders::new(backend.clone());
        let feed = first.feeds(None).await.unwrap().remove(0);
        assert_eq!(first.entries_of(&feed).await.unwrap().len(), 3);

        backend
            .insert_entry(feed.id, "a4", &EntryInput::default())
            .await
            .unwrap();

        // The old request still answers from its cache
        assert_eq!(first.entries_of(&feed).await.unwrap().len(), 3);

        let second = RequestLoaders::new(backend.clone());
        assert_eq!(second.entries_of(&feed).await.unwrap().len(), 4);
    }
}
