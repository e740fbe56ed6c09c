//! The `FeedStore` trait.
//!
//! Implemented by storage backends (e.g. `feedsync-store-sqlite`). Request
//! handlers and the crawler depend on this abstraction, not on a concrete
//! backend.

use std::{collections::HashMap, future::Future};

use crate::{
  feed::{Feed, FeedContent, FeedId, FeedUrlMap, NewRawFeed, RawFeed},
  subscription::{Subscription, SubscriptionId, SubscriptionQuery, SyncResult, UserId},
};

/// Abstraction over a feedsync storage backend.
///
/// Feeds are shared by every subscription resolving to them and are mutated
/// only through the crawler-facing methods below. URL mappings and raw
/// snapshots are append-only. The `(user, feed)` pair is unique; the backend
/// enforces it as the final guard against concurrent duplicate subscribes.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait FeedStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── URL resolution ────────────────────────────────────────────────────

  /// Append a `source → target` mapping.
  fn record_url_map<'a>(
    &'a self,
    source: &'a str,
    target: &'a str,
  ) -> impl Future<Output = Result<FeedUrlMap, Self::Error>> + Send + 'a;

  /// The latest target recorded for `source`, if any.
  fn find_target<'a>(
    &'a self,
    source: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  /// Batch form of [`FeedStore::find_target`], answered with one query.
  /// Sources never observed are absent from the result.
  fn find_all_target<'a>(
    &'a self,
    sources: &'a [String],
  ) -> impl Future<Output = Result<HashMap<String, String>, Self::Error>> + Send + 'a;

  // ── Feeds ─────────────────────────────────────────────────────────────

  /// Return the feed keyed by `url`, creating it as `pending` when absent.
  /// Concurrent creators converge on a single row.
  fn get_or_create_feed<'a>(
    &'a self,
    url: &'a str,
  ) -> impl Future<Output = Result<Feed, Self::Error>> + Send + 'a;

  fn get_feed(
    &self,
    id: FeedId,
    detail: bool,
  ) -> impl Future<Output = Result<Option<Feed>, Self::Error>> + Send + '_;

  fn find_feed_by_url<'a>(
    &'a self,
    url: &'a str,
    detail: bool,
  ) -> impl Future<Output = Result<Option<Feed>, Self::Error>> + Send + 'a;

  /// `pending | ready | error → updating`; records the check time.
  fn begin_feed_update(
    &self,
    id: FeedId,
  ) -> impl Future<Output = Result<Feed, Self::Error>> + Send + '_;

  /// `updating → ready`. Descriptive fields and fingerprint are overwritten
  /// and `dt_updated` advances only when the fingerprint differs from the
  /// stored one. Bound subscriptions follow the feed's status.
  fn finish_feed_update(
    &self,
    id: FeedId,
    content: FeedContent,
  ) -> impl Future<Output = Result<Feed, Self::Error>> + Send + '_;

  /// `updating → error`. Bound subscriptions follow the feed's status.
  fn fail_feed_update(
    &self,
    id: FeedId,
  ) -> impl Future<Output = Result<Feed, Self::Error>> + Send + '_;

  // ── Raw snapshots ─────────────────────────────────────────────────────

  /// Append one fetch attempt. The payload is compressed when worthwhile;
  /// length and hash are derived from the raw bytes.
  fn record_raw_feed(
    &self,
    input: NewRawFeed,
  ) -> impl Future<Output = Result<RawFeed, Self::Error>> + Send + '_;

  /// The most recent snapshot for a feed, used for conditional refetch.
  fn latest_raw_feed(
    &self,
    feed_id: FeedId,
  ) -> impl Future<Output = Result<Option<RawFeed>, Self::Error>> + Send + '_;

  // ── Subscriptions ─────────────────────────────────────────────────────

  /// Subscribe `user_id` to `url`.
  ///
  /// Bound and `ready` when the URL resolves to an existing feed, otherwise
  /// pending and unbound. Fails with a duplicate-subscription error when the
  /// user already holds the resolved feed.
  fn create_by_url<'a>(
    &'a self,
    url: &'a str,
    user_id: UserId,
  ) -> impl Future<Output = Result<Subscription, Self::Error>> + Send + 'a;

  /// Bulk form of [`FeedStore::create_by_url`] with a constant number of
  /// lookups. Already-held feeds are returned as they are instead of
  /// erroring. Inserts are chunked at `batch_size`. The result is sorted by
  /// `url`, then id.
  ///
  /// Chunks commit independently: a failure in a later chunk leaves the
  /// earlier chunks' rows in place and reports how many were committed.
  fn create_by_url_s<'a>(
    &'a self,
    urls: &'a [String],
    user_id: UserId,
    batch_size: usize,
  ) -> impl Future<Output = Result<Vec<Subscription>, Self::Error>> + Send + 'a;

  /// Fetch a subscription owned by `user_id`.
  fn get_subscription(
    &self,
    id: SubscriptionId,
    user_id: UserId,
    detail: bool,
  ) -> impl Future<Output = Result<Subscription, Self::Error>> + Send + '_;

  /// Delete a subscription owned by `user_id`. The feed is left intact.
  fn delete_subscription(
    &self,
    id: SubscriptionId,
    user_id: UserId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Differential sync of a user's subscriptions against client hints.
  fn query_by_user<'a>(
    &'a self,
    user_id: UserId,
    query: &'a SubscriptionQuery,
  ) -> impl Future<Output = Result<SyncResult, Self::Error>> + Send + 'a;

  /// Set `story_offset` and strictly advance `dt_updated`.
  fn update_story_offset(
    &self,
    id: SubscriptionId,
    user_id: UserId,
    offset: i64,
  ) -> impl Future<Output = Result<Subscription, Self::Error>> + Send + '_;

  /// Bind a pending subscription to the feed at `target_url`, recording the
  /// mapping from the subscription's URL and creating the feed if needed.
  fn resolve_subscription<'a>(
    &'a self,
    id: SubscriptionId,
    target_url: &'a str,
  ) -> impl Future<Output = Result<Subscription, Self::Error>> + Send + 'a;
}
