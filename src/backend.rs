//! Storage-agnostic contract used by the loaders and the ingestion path.
//!
//! [`Database`] is the SQLite implementation. Nothing here batches or caches;
//! that belongs to [`crate::loader`].

use async_trait::async_trait;

use crate::storage::{
    Database, Entry, EntryInput, EntrySearch, Feed, FeedInput, FeedSearch, StorageError,
};

/// Insert and search operations over feeds and entries.
///
/// Insert methods return `Ok(None)` on a uniqueness conflict. `None` search
/// criteria mean "everything".
#[async_trait]
pub trait Backend: Send + Sync {
    async fn insert_feed(&self, input: &FeedInput) -> Result<Option<i64>, StorageError>;

    async fn get_feeds(&self, search: Option<&FeedSearch>) -> Result<Vec<Feed>, StorageError>;

    async fn get_feed_by_uri(&self, uri: &str) -> Result<Option<Feed>, StorageError>;

    async fn insert_entry(
        &self,
        feed_id: i64,
        guid: &str,
        input: &EntryInput,
    ) -> Result<Option<i64>, StorageError>;

    async fn get_entries(&self, search: Option<&EntrySearch>)
        -> Result<Vec<Entry>, StorageError>;
}

#[async_trait]
impl Backend for Database {
    async fn insert_feed(&self, input: &FeedInput) -> Result<Option<i64>, StorageError> {
        Database::insert_feed(self, input).await
    }

    async fn get_feeds(&self, search: Option<&FeedSearch>) -> Result<Vec<Feed>, StorageError> {
        match search {
            Some(search) => self.search_feeds(search).await,
            None => self.search_feeds(&FeedSearch::default()).await,
        }
    }

    async fn get_feed_by_uri(&self, uri: &str) -> Result<Option<Feed>, StorageError> {
        Database::get_feed_by_uri(self, uri).await
    }

    async fn insert_entry(
        &self,
        feed_id: i64,
        guid: &str,
        input: &EntryInput,
    ) -> Result<Option<i64>, StorageError> {
        Database::insert_entry(self, feed_id, guid, input).await
    }

    async fn get_entries(
        &self,
        search: Option<&EntrySearch>,
    ) -> Result<Vec<Entry>, StorageError> {
        match search {
            Some(search) => self.search_entries(search).await,
            None => self.search_entries(&EntrySearch::default()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_database_usable_as_trait_object() {
        let backend: Arc<dyn Backend> = Arc::new(Database::open(":memory:").await.unwrap());

        let feed_id = backend
            .insert_feed(&FeedInput::new("https://example.com/rss"))
            .await
            .unwrap()
            .unwrap();
        backend
            .insert_entry(feed_id, "g1", &EntryInput::default())
            .await
            .unwrap();

        let feeds = backend.get_feeds(None).await.unwrap();
        assert_eq!(feeds.len(), 1);

        let entries = backend.get_entries(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].feed_id, feed_id);

        let by_uri = backend
            .get_feed_by_uri("https://example.com/rss")
            .await
            .unwrap();
        assert_eq!(by_uri.map(|f| f.id), Some(feed_id));
    }

    #[tokio::test]
    async fn test_get_feeds_with_search() {
        let backend = Database::open(":memory:").await.unwrap();
        let a = Backend::insert_feed(&backend, &FeedInput::new("https://a.example.com"))
            .await
            .unwrap()
            .unwrap();
        Backend::insert_feed(&backend, &FeedInput::new("https://b.example.com"))
            .await
            .unwrap();

        let feeds = backend
            .get_feeds(Some(&FeedSearch::by_ids([a])))
            .await
            .unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].uri, "https://a.example.com");
    }
}
