use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedgraph::backend::Backend;
use feedgraph::config::Config;
use feedgraph::feed::{fetch_feed, parse_feed, FetchError};
use feedgraph::ingest::subscribe;
use feedgraph::loader::RequestLoaders;
use feedgraph::storage::{Database, Entry, EntrySearch, Feed, FeedInput, FeedSearch, StorageError};

/// Get the config directory path (~/.config/feedgraph/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedgraph"))
}

#[derive(Parser, Debug)]
#[command(name = "feedgraph", about = "Feed subscriptions backed by SQLite")]
struct Args {
    /// Config file (default: ~/.config/feedgraph/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides `database_path` from the config
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and store its current items
    Subscribe {
        uri: String,

        /// Read the feed document from a file instead of fetching `uri`
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// List feeds
    Feeds {
        #[arg(long = "id", value_name = "ID")]
        ids: Vec<i64>,
    },
    /// List entries with their owning feed
    Entries {
        #[arg(long = "id", value_name = "ID")]
        ids: Vec<i64>,

        #[arg(long = "feed", value_name = "ID")]
        feed_ids: Vec<i64>,
    },
}

#[derive(Serialize)]
struct EntryWithFeed {
    #[serde(flatten)]
    entry: Entry,
    feed: Option<Feed>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            config_dir.join("feedgraph.db")
        }
    };
    let db = open_database(&db_path).await?;

    match args.command {
        Command::Subscribe { uri, file } => {
            let bytes = match file {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read feed file: {}", path.display()))?,
                None => {
                    let client = reqwest::Client::builder()
                        .user_agent(config.user_agent.as_str())
                        .redirect(reqwest::redirect::Policy::limited(5))
                        .build()?;
                    fetch_feed(&client, &uri, &config.fetch_options())
                        .await
                        .with_context(|| format!("Failed to fetch {}", uri))?
                }
            };

            let parsed = parse_feed(&bytes)
                .map_err(|e| FetchError::Parse(e.to_string()))
                .with_context(|| format!("Failed to parse feed document for {}", uri))?;

            let input = FeedInput {
                uri,
                title: parsed.title,
            };
            let feed = subscribe(&db, &input, &parsed.items)
                .await
                .context("Failed to store subscription")?;
            print_json(&feed)?;
        }
        Command::Feeds { ids } => {
            let search = (!ids.is_empty()).then(|| FeedSearch::by_ids(ids));
            let feeds = db
                .get_feeds(search.as_ref())
                .await
                .context("Failed to load feeds")?;
            print_json(&feeds)?;
        }
        Command::Entries { ids, feed_ids } => {
            let search = EntrySearch {
                ids: (!ids.is_empty()).then_some(ids),
                feed_ids: (!feed_ids.is_empty()).then_some(feed_ids),
            };
            let entries = list_entries(Arc::new(db), &search).await?;
            print_json(&entries)?;
        }
    }

    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(StorageError::InstanceLocked) => {
            anyhow::bail!("Database {} is locked by another process", path.display())
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

/// Resolve each entry's feed through one request's loaders, so the feeds
/// come back in a single bulk read.
async fn list_entries(
    backend: Arc<dyn Backend>,
    search: &EntrySearch,
) -> Result<Vec<EntryWithFeed>> {
    let loaders = RequestLoaders::new(backend);
    let entries = loaders
        .entries(Some(search))
        .await
        .context("Failed to load entries")?;

    let feeds = futures::future::try_join_all(entries.iter().map(|e| loaders.feed_of(e)))
        .await
        .context("Failed to resolve feeds")?;

    Ok(entries
        .into_iter()
        .zip(feeds)
        .map(|(entry, feed)| EntryWithFeed { entry, feed })
        .collect())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
