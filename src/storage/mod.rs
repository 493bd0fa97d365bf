//! SQLite persistence for feeds and their entries.
//!
//! Uniqueness (`feeds.uri`, `entries(feed_id, guid)`) and referential
//! integrity (`entries.feed_id`) are enforced by the schema. Inserts that
//! collide with a uniqueness constraint return `Ok(None)` rather than an error.

mod entries;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    Entry, EntryInput, EntrySearch, Feed, FeedInput, FeedSearch, ParsedItem, StorageError,
};

/// Upper bound on ids bound into a single `IN (...)` list.
///
/// SQLite builds before 3.32 cap host parameters at 999; two id lists plus
/// slack stay under that.
pub(crate) const MAX_BOUND_IDS: usize = 400;

/// Sort, dedupe and split an optional id filter into bindable chunks.
///
/// `None` (no filter) yields a single `None`; an empty set yields no chunks,
/// so callers iterating the result issue no query at all.
pub(crate) fn distinct_chunks(ids: Option<&[i64]>) -> Vec<Option<Vec<i64>>> {
    match ids {
        None => vec![None],
        Some(ids) => {
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            ids.chunks(MAX_BOUND_IDS)
                .map(|chunk| Some(chunk.to_vec()))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_chunks_none_is_unfiltered() {
        assert_eq!(distinct_chunks(None), vec![None]);
    }

    #[test]
    fn test_distinct_chunks_empty_set() {
        assert!(distinct_chunks(Some(&[])).is_empty());
    }

    #[test]
    fn test_distinct_chunks_dedupes_and_splits() {
        let mut ids: Vec<i64> = (0..(MAX_BOUND_IDS as i64 + 10)).collect();
        ids.extend([1, 2, 3]);
        let chunks = distinct_chunks(Some(&ids));
        assert_eq!(chunks.len(), 2);
        let total: usize = chunks.iter().flatten().map(Vec::len).sum();
        assert_eq!(total, MAX_BOUND_IDS + 10);
    }
}
