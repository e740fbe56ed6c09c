//! Error type for `feedsync-store-sqlite`.

use feedsync_core::{
  feed::{FeedId, FeedStatus},
  subscription::{SubscriptionId, UserId},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] feedsync_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The user already holds a subscription to this canonical feed.
  #[error("user {user_id} is already subscribed to feed {feed_id}")]
  DuplicateSubscription { user_id: UserId, feed_id: FeedId },

  /// Missing, or owned by a different user.
  #[error("subscription not found: {0}")]
  SubscriptionNotFound(SubscriptionId),

  #[error("feed not found: {0}")]
  FeedNotFound(FeedId),

  #[error("feed {feed_id} cannot move from {from} to {to}")]
  InvalidTransition { feed_id: FeedId, from: FeedStatus, to: FeedStatus },

  #[error("subscription {0} is already bound to a feed")]
  AlreadyBound(SubscriptionId),

  /// A bulk insert failed after `committed` rows from earlier chunks were
  /// already persisted.
  #[error("bulk insert failed after {committed} rows were committed: {source}")]
  PartialBatch {
    committed: usize,
    source:    tokio_rusqlite::Error,
  },

  /// Concurrent writers kept moving the subscription clock.
  #[error("subscription {0} changed concurrently; retry")]
  Contended(SubscriptionId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether `err` is SQLite rejecting a UNIQUE, FOREIGN KEY or CHECK rule.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.code == rusqlite::ErrorCode::ConstraintViolation
  )
}
