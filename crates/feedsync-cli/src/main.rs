//! `feedsync`: operator tool for the feedsync subscription store.
//!
//! Opens the SQLite store named in `feedsync.toml` (or `--config`, or
//! `FEEDSYNC_STORE_PATH`) and runs one operation, printing the resulting
//! records as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```
//! feedsync --user 1 subscribe https://example.com/
//! feedsync --user 1 import urls.txt
//! feedsync --user 1 list --hints hints.json --show-pending
//! feedsync map https://example.com/ https://example.com/feed.xml
//! feedsync crawl finish 7 --body feed.xml --title "Example"
//! ```

mod input;
mod settings;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use feedsync_core::{
  content::Fingerprint,
  feed::{FeedContent, FeedId, NewRawFeed},
  store::FeedStore,
  subscription::{SubscriptionId, SubscriptionQuery, UserId},
};
use feedsync_store_sqlite::SqliteStore;
use serde::Serialize;
use settings::StoreConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "Feed subscription store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "feedsync.toml")]
  config: PathBuf,

  /// Acting user for subscription commands.
  #[arg(short, long, global = true, env = "FEEDSYNC_USER")]
  user: Option<UserId>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Subscribe to one URL.
  Subscribe { url: String },

  /// Subscribe to every URL in a file (one per line, `-` for stdin).
  Import { file: PathBuf },

  /// List subscriptions, or only those changed since the given hints.
  List {
    /// JSON array of `{id, dt_updated}` the client already holds.
    #[arg(long)]
    hints:        Option<PathBuf>,
    #[arg(long)]
    detail:       bool,
    #[arg(long)]
    show_pending: bool,
  },

  /// Show one subscription.
  Show {
    id:     SubscriptionId,
    #[arg(long)]
    detail: bool,
  },

  /// Remove a subscription. The feed is kept.
  Unsubscribe { id: SubscriptionId },

  /// Record how far the user has read.
  Offset { id: SubscriptionId, offset: i64 },

  /// Record that `source` resolves to the feed at `target`.
  Map { source: String, target: String },

  /// Print the canonical URL `source` currently resolves to.
  Resolve { source: String },

  /// Bind a pending subscription to the feed at `target`.
  Bind { id: SubscriptionId, target: String },

  /// Show the feed at `url`.
  Feed {
    url:    String,
    #[arg(long)]
    detail: bool,
  },

  /// Crawler-side feed status updates.
  #[command(subcommand)]
  Crawl(Crawl),
}

#[derive(Subcommand, Debug)]
enum Crawl {
  /// Mark a feed as being fetched.
  Begin { feed_id: FeedId },

  /// Record a fetched payload and mark the feed ready.
  Finish {
    feed_id:       FeedId,
    /// The raw response body.
    #[arg(long)]
    body:          PathBuf,
    #[arg(long)]
    title:         Option<String>,
    #[arg(long)]
    link:          Option<String>,
    #[arg(long)]
    encoding:      Option<String>,
    #[arg(long)]
    etag:          Option<String>,
    #[arg(long)]
    last_modified: Option<String>,
    #[arg(long, default_value_t = 0)]
    total_storys:  i64,
  },

  /// Mark a fetch as failed.
  Fail { feed_id: FeedId },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  // Stdout carries the JSON output.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = StoreConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  run(&store, &cfg, cli.user, cli.command).await
}

fn require_user(user: Option<UserId>) -> Result<UserId> {
  user.context("this command needs --user (or FEEDSYNC_USER)")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn run(
  store: &SqliteStore,
  cfg: &StoreConfig,
  user: Option<UserId>,
  command: Command,
) -> Result<()> {
  match command {
    Command::Subscribe { url } => {
      let sub = store.create_by_url(&url, require_user(user)?).await?;
      print_json(&sub)
    }
    Command::Import { file } => {
      let urls = input::parse_url_list(&input::read_source(&file)?);
      let subs = store
        .create_by_url_s(&urls, require_user(user)?, cfg.batch_size)
        .await?;
      print_json(&subs)
    }
    Command::List { hints, detail, show_pending } => {
      let hints = match hints {
        Some(path) => input::parse_hints(&input::read_source(&path)?)?,
        None => Vec::new(),
      };
      let query = SubscriptionQuery { hints, detail, show_pending };
      print_json(&store.query_by_user(require_user(user)?, &query).await?)
    }
    Command::Show { id, detail } => {
      print_json(&store.get_subscription(id, require_user(user)?, detail).await?)
    }
    Command::Unsubscribe { id } => {
      store.delete_subscription(id, require_user(user)?).await?;
      Ok(())
    }
    Command::Offset { id, offset } => {
      print_json(&store.update_story_offset(id, require_user(user)?, offset).await?)
    }
    Command::Map { source, target } => {
      print_json(&store.record_url_map(&source, &target).await?)
    }
    Command::Resolve { source } => print_json(&store.find_target(&source).await?),
    Command::Bind { id, target } => {
      print_json(&store.resolve_subscription(id, &target).await?)
    }
    Command::Feed { url, detail } => {
      let feed = store
        .find_feed_by_url(&url, detail)
        .await?
        .with_context(|| format!("no feed at {url}"))?;
      print_json(&feed)
    }
    Command::Crawl(crawl) => run_crawl(store, crawl).await,
  }
}

async fn run_crawl(store: &SqliteStore, crawl: Crawl) -> Result<()> {
  match crawl {
    Crawl::Begin { feed_id } => print_json(&store.begin_feed_update(feed_id).await?),
    Crawl::Fail { feed_id } => print_json(&store.fail_feed_update(feed_id).await?),
    Crawl::Finish {
      feed_id,
      body,
      title,
      link,
      encoding,
      etag,
      last_modified,
      total_storys,
    } => {
      let body = std::fs::read(&body)
        .with_context(|| format!("reading {}", body.display()))?;
      let feed = store
        .get_feed(feed_id, false)
        .await?
        .with_context(|| format!("no feed with id {feed_id}"))?;

      let fingerprint =
        Fingerprint::of_content(&body).with_validators(etag.clone(), last_modified.clone());

      let snapshot = store
        .record_raw_feed(NewRawFeed {
          encoding: encoding.clone(),
          status_code: Some(200),
          etag,
          last_modified,
          content: Some(body),
          ..NewRawFeed::new(feed_id, feed.url)
        })
        .await?;
      tracing::debug!(raw_feed_id = snapshot.id, "snapshot stored");

      let content = FeedContent {
        title,
        link,
        encoding,
        total_storys,
        fingerprint,
        ..Default::default()
      };
      print_json(&store.finish_feed_update(feed_id, content).await?)
    }
  }
}
