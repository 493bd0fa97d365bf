use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Feed, FeedInput, FeedRow, FeedSearch, InsertOutcome, StorageError};
use super::distinct_chunks;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, returning its new id.
    ///
    /// Returns `Ok(None)` when a feed with the same uri already exists; the
    /// existing row is left untouched.
    pub async fn insert_feed(&self, input: &FeedInput) -> Result<Option<i64>, StorageError> {
        let result = sqlx::query("INSERT INTO feeds (uri, title) VALUES (?, ?)")
            .bind(&input.uri)
            .bind(&input.title)
            .execute(&self.pool)
            .await;

        let outcome = InsertOutcome::classify(result, None)?;
        if outcome == InsertOutcome::Conflict {
            tracing::debug!(uri = %input.uri, "Feed already subscribed");
        }
        Ok(outcome.id())
    }

    /// Look up a feed by exact uri
    pub async fn get_feed_by_uri(&self, uri: &str) -> Result<Option<Feed>, StorageError> {
        let row = sqlx::query_as::<_, FeedRow>("SELECT id, uri, title FROM feeds WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Search feeds. An empty id set matches nothing.
    pub async fn search_feeds(&self, search: &FeedSearch) -> Result<Vec<Feed>, StorageError> {
        let Some(ids) = &search.ids else {
            let rows = sqlx::query_as::<_, FeedRow>("SELECT id, uri, title FROM feeds ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            return Ok(rows.into_iter().map(FeedRow::into_feed).collect());
        };

        let mut feeds = Vec::with_capacity(ids.len());
        for chunk in distinct_chunks(Some(ids.as_slice())).into_iter().flatten() {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT id, uri, title FROM feeds WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(") ORDER BY id");

            let rows: Vec<FeedRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            feeds.extend(rows.into_iter().map(FeedRow::into_feed));
        }

        Ok(feeds)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, FeedInput, FeedSearch};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_feed(id: i64) -> FeedInput {
        FeedInput {
            uri: format!("https://feed{}.example.com/rss", id),
            title: Some(format!("Test Feed {}", id)),
        }
    }

    #[tokio::test]
    async fn test_insert_feed_returns_id() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1)).await.unwrap();
        assert!(id.is_some_and(|id| id > 0));

        let feed = db
            .get_feed_by_uri("https://feed1.example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(feed.id), id);
        assert_eq!(feed.title.as_deref(), Some("Test Feed 1"));
    }

    #[tokio::test]
    async fn test_insert_duplicate_uri_reports_no_id() {
        let db = test_db().await;
        let first = db.insert_feed(&test_feed(1)).await.unwrap();
        assert!(first.is_some());

        let renamed = FeedInput {
            title: Some("Other Title".to_string()),
            ..test_feed(1)
        };
        let second = db.insert_feed(&renamed).await.unwrap();
        assert_eq!(second, None);

        let feeds = db.search_feeds(&FeedSearch::default()).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(
            feeds[0].title.as_deref(),
            Some("Test Feed 1"),
            "Existing row must not be modified"
        );
    }

    #[tokio::test]
    async fn test_get_feed_by_uri_missing() {
        let db = test_db().await;
        let feed = db.get_feed_by_uri("https://nowhere.example.com").await.unwrap();
        assert!(feed.is_none());
    }

    #[tokio::test]
    async fn test_search_feeds_all() {
        let db = test_db().await;
        for i in 0..3 {
            db.insert_feed(&test_feed(i)).await.unwrap();
        }
        let feeds = db.search_feeds(&FeedSearch::default()).await.unwrap();
        assert_eq!(feeds.len(), 3);
    }

    #[tokio::test]
    async fn test_search_feeds_by_ids() {
        let db = test_db().await;
        let a = db.insert_feed(&test_feed(1)).await.unwrap().unwrap();
        let _b = db.insert_feed(&test_feed(2)).await.unwrap().unwrap();
        let c = db.insert_feed(&test_feed(3)).await.unwrap().unwrap();

        let feeds = db
            .search_feeds(&FeedSearch::by_ids([c, a, 9999]))
            .await
            .unwrap();
        let mut ids: Vec<i64> = feeds.iter().map(|f| f.id).collect();
        ids.sort();
        assert_eq!(ids, vec![a, c]);
    }

    #[tokio::test]
    async fn test_search_feeds_empty_id_set_matches_nothing() {
        let db = test_db().await;
        db.insert_feed(&test_feed(1)).await.unwrap();
        let feeds = db.search_feeds(&FeedSearch::by_ids(Vec::new())).await.unwrap();
        assert!(feeds.is_empty());
    }

    #[tokio::test]
    async fn test_search_feeds_id_set_larger_than_chunk() {
        let db = test_db().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(db.insert_feed(&test_feed(i)).await.unwrap().unwrap());
        }
        let mut search: Vec<i64> = (10_000..12_000).collect();
        search.extend(&ids);

        let feeds = db.search_feeds(&FeedSearch::by_ids(search)).await.unwrap();
        assert_eq!(feeds.len(), 5);
    }
}
