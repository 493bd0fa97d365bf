use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage faults.
///
/// Uniqueness conflicts on `feeds.uri` and `entries(feed_id, guid)` are not
/// represented here: inserts report them as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Entry insert referenced a feed id with no row
    #[error("Feed {feed_id} does not exist")]
    MissingFeed { feed_id: i64 },

    /// A feed insert conflicted but the existing row could not be read back
    #[error("Feed with uri {uri} not found after conflicting insert")]
    FeedNotFound { uri: String },

    /// Stored epoch seconds outside the representable date range
    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StorageError {
    /// Classify connection-level sqlx errors, mapping lock contention to
    /// [`StorageError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6). CANTOPEN is a path problem, not a lock.
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return StorageError::InstanceLocked;
        }

        StorageError::Sqlx(err)
    }
}

// ============================================================================
// Insert Outcome
// ============================================================================

/// Result of an insert that may hit a modeled uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted(i64),
    Conflict,
}

impl InsertOutcome {
    /// Single place where driver errors are split into "conflict" and "fault".
    ///
    /// Foreign key violations are referential faults and surface as
    /// [`StorageError::MissingFeed`] when `feed_id` is known.
    pub(crate) fn classify(
        result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
        feed_id: Option<i64>,
    ) -> Result<Self, StorageError> {
        match result {
            Ok(done) => Ok(InsertOutcome::Inserted(done.last_insert_rowid())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(InsertOutcome::Conflict)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                match feed_id {
                    Some(feed_id) => Err(StorageError::MissingFeed { feed_id }),
                    None => Err(StorageError::Sqlx(sqlx::Error::Database(db_err))),
                }
            }
            Err(e) => Err(StorageError::Sqlx(e)),
        }
    }

    pub(crate) fn id(self) -> Option<i64> {
        match self {
            InsertOutcome::Inserted(id) => Some(id),
            InsertOutcome::Conflict => None,
        }
    }
}

// ============================================================================
// Input Types
// ============================================================================

/// Parameters for subscribing to a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInput {
    pub uri: String,
    pub title: Option<String>,
}

impl FeedInput {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: None,
        }
    }
}

/// Descriptive fields of an entry, all independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryInput {
    pub uri: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
}

/// An item produced by the feed parser, keyed by its source-supplied guid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub guid: String,
    pub entry: EntryInput,
}

// ============================================================================
// Search Criteria
// ============================================================================

/// Entry filters. Absent fields match everything; present fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySearch {
    pub ids: Option<Vec<i64>>,
    pub feed_ids: Option<Vec<i64>>,
}

impl EntrySearch {
    pub fn by_ids(ids: impl Into<Vec<i64>>) -> Self {
        Self {
            ids: Some(ids.into()),
            feed_ids: None,
        }
    }

    pub fn by_feed_ids(feed_ids: impl Into<Vec<i64>>) -> Self {
        Self {
            ids: None,
            feed_ids: Some(feed_ids.into()),
        }
    }
}

/// Feed filters. An absent id set matches every feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSearch {
    pub ids: Option<Vec<i64>>,
}

impl FeedSearch {
    pub fn by_ids(ids: impl Into<Vec<i64>>) -> Self {
        Self {
            ids: Some(ids.into()),
        }
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub uri: String,
    pub title: Option<String>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            uri: self.uri,
            title: self.title,
        }
    }
}

/// Entry as stored: timestamps are epoch seconds, NULL when unknown
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub updated: Option<i64>,
    pub published: Option<i64>,
}

impl EntryRow {
    pub(crate) fn into_entry(self) -> Result<Entry, StorageError> {
        Ok(Entry {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            uri: self.uri,
            title: self.title,
            author: self.author,
            content: self.content,
            updated: from_epoch("updated", self.updated)?,
            published: from_epoch("published", self.published)?,
        })
    }
}

/// Epoch seconds for storage. Sub-second precision is dropped.
pub(crate) fn to_epoch(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|dt| dt.timestamp())
}

fn from_epoch(column: &'static str, value: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    value
        .map(|secs| {
            DateTime::from_timestamp(secs, 0)
                .ok_or(StorageError::InvalidTimestamp { column, value: secs })
        })
        .transpose()
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub uri: String,
    pub title: Option<String>,
}

/// A stored feed item. `(feed_id, guid)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_epoch_round_trip_second_precision() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 45).unwrap();
        let stored = to_epoch(Some(t));
        assert_eq!(stored, Some(1704112245));
        assert_eq!(from_epoch("updated", stored).unwrap(), Some(t));
    }

    #[test]
    fn test_epoch_drops_fractional_seconds() {
        let t = Utc.timestamp_opt(1_700_000_000, 999_000_000).unwrap();
        assert_eq!(to_epoch(Some(t)), Some(1_700_000_000));
    }

    #[test]
    fn test_null_timestamp_is_unknown_not_zero() {
        assert_eq!(to_epoch(None), None);
        assert_eq!(from_epoch("published", None).unwrap(), None);
        assert_eq!(
            from_epoch("published", Some(0)).unwrap(),
            Some(Utc.timestamp_opt(0, 0).unwrap())
        );
    }

    #[test]
    fn test_out_of_range_timestamp_rejected() {
        let err = from_epoch("updated", Some(i64::MAX)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTimestamp {
                column: "updated",
                ..
            }
        ));
    }
}
