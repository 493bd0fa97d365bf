//! Data-access layer for a feed aggregator.
//!
//! - [`storage`]: SQLite tables for feeds and entries
//! - [`backend`]: the [`Backend`](backend::Backend) trait callers program against
//! - [`loader`]: per-request batching and caching of keyed reads
//! - [`ingest`]: idempotent feed subscription
//! - [`feed`]: fetching and parsing feed documents
//! - [`config`]: optional TOML configuration

pub mod backend;
pub mod config;
pub mod feed;
pub mod ingest;
pub mod loader;
pub mod storage;
