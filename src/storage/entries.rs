use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{to_epoch, Entry, EntryInput, EntryRow, EntrySearch, InsertOutcome, StorageError};
use super::distinct_chunks;

const ENTRY_COLUMNS: &str =
    "SELECT id, feed_id, guid, uri, title, author, content, updated, published FROM entries";

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Insert an entry for a feed, returning its new id.
    ///
    /// Returns `Ok(None)` when the feed already has an entry with this guid.
    ///
    /// # Errors
    ///
    /// `StorageError::MissingFeed` if `feed_id` does not reference a feed;
    /// any other driver failure as `StorageError::Sqlx`.
    pub async fn insert_entry(
        &self,
        feed_id: i64,
        guid: &str,
        input: &EntryInput,
    ) -> Result<Option<i64>, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entries (feed_id, guid, uri, title, author, content, updated, published)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(feed_id)
        .bind(guid)
        .bind(&input.uri)
        .bind(&input.title)
        .bind(&input.author)
        .bind(&input.content)
        .bind(to_epoch(input.updated))
        .bind(to_epoch(input.published))
        .execute(&self.pool)
        .await;

        let outcome = InsertOutcome::classify(result, Some(feed_id))?;
        if outcome == InsertOutcome::Conflict {
            tracing::trace!(feed_id = feed_id, guid = %guid, "Entry already stored");
        }
        Ok(outcome.id())
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Search entries by id set and/or owning feed id set (ANDed).
    ///
    /// Large id sets are split so no statement exceeds the bound-parameter cap.
    pub async fn search_entries(&self, search: &EntrySearch) -> Result<Vec<Entry>, StorageError> {
        let id_chunks = distinct_chunks(search.ids.as_deref());
        let feed_chunks = distinct_chunks(search.feed_ids.as_deref());

        let mut entries = Vec::new();
        for ids in &id_chunks {
            for feed_ids in &feed_chunks {
                let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(ENTRY_COLUMNS);
                builder.push(" WHERE 1 = 1");

                if let Some(ids) = ids {
                    builder.push(" AND id IN (");
                    let mut separated = builder.separated(", ");
                    for id in ids {
                        separated.push_bind(*id);
                    }
                    separated.push_unseparated(")");
                }

                if let Some(feed_ids) = feed_ids {
                    builder.push(" AND feed_id IN (");
                    let mut separated = builder.separated(", ");
                    for feed_id in feed_ids {
                        separated.push_bind(*feed_id);
                    }
                    separated.push_unseparated(")");
                }

                builder.push(" ORDER BY id");

                let rows: Vec<EntryRow> = builder.build_query_as().fetch_all(&self.pool).await?;
                for row in rows {
                    entries.push(row.into_entry()?);
                }
            }
        }
        if feed_chunks.len() > 1 {
            entries.sort_unstable_by_key(|entry| entry.id);
        }

        tracing::debug!(
            ids = ?search.ids.as_ref().map(Vec::len),
            feed_ids = ?search.feed_ids.as_ref().map(Vec::len),
            found = entries.len(),
            "search_entries"
        );

        Ok(entries)
    }
}
