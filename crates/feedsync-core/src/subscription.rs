//! Per-user subscriptions and the bulk subscribe-by-URL planner.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::{Feed, FeedId, FeedStatus};

pub type UserId = i64;
pub type SubscriptionId = i64;

// ─── Subscription ────────────────────────────────────────────────────────────

/// A user's binding to a canonical feed, or a pending request for one.
///
/// `feed_id` is `None` until the URL the user entered has been resolved.
/// The shared [`Feed`] is never owned by a subscription; when bound and
/// loaded it is embedded read-only in `feed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
  pub id:           SubscriptionId,
  pub user_id:      UserId,
  pub feed_id:      Option<FeedId>,
  pub status:       FeedStatus,
  /// The URL exactly as the user entered it.
  pub url:          String,
  /// User override of the feed title.
  pub title:        Option<String>,
  pub story_offset: i64,
  pub dt_created:   DateTime<Utc>,
  /// Sync clock; advanced by offset changes, resolution and feed content
  /// changes.
  pub dt_updated:   DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub feed:         Option<Feed>,
}

impl Subscription {
  pub fn is_ready(&self) -> bool { self.status == FeedStatus::Ready }

  pub fn is_bound(&self) -> bool { self.feed_id.is_some() }

  /// Unread stories; only known when the feed was loaded with detail.
  pub fn num_unread_storys(&self) -> Option<i64> {
    let detail = self.feed.as_ref()?.detail.as_ref()?;
    Some(detail.total_storys - self.story_offset)
  }

  /// The user's title if set, else the feed's.
  pub fn display_title(&self) -> Option<&str> {
    self
      .title
      .as_deref()
      .or_else(|| self.feed.as_ref().and_then(|f| f.title.as_deref()))
  }
}

/// A row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
  pub user_id: UserId,
  pub feed_id: Option<FeedId>,
  pub status:  FeedStatus,
  pub url:     String,
}

impl NewSubscription {
  /// Bound to an existing feed; ready immediately.
  pub fn bound(user_id: UserId, feed_id: FeedId, url: impl Into<String>) -> Self {
    Self {
      user_id,
      feed_id: Some(feed_id),
      status: FeedStatus::Ready,
      url: url.into(),
    }
  }

  /// Awaiting resolution by the crawler.
  pub fn pending(user_id: UserId, url: impl Into<String>) -> Self {
    Self { user_id, feed_id: None, status: FeedStatus::Pending, url: url.into() }
  }
}

// ─── Sync query ──────────────────────────────────────────────────────────────

/// A client's last-seen state for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
  pub id:         SubscriptionId,
  pub dt_updated: DateTime<Utc>,
}

/// Parameters for [`crate::store::FeedStore::query_by_user`].
#[derive(Debug, Clone, Default)]
pub struct SubscriptionQuery {
  /// Empty means "no baseline": everything is returned.
  pub hints:        Vec<Hint>,
  /// Load heavyweight feed fields.
  pub detail:       bool,
  /// Include subscriptions still in `pending`.
  pub show_pending: bool,
}

/// Result of a differential sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
  /// Size of the whole visible population, regardless of hints.
  pub total:         usize,
  /// Rows the client has to merge, most recently changed first.
  pub subscriptions: Vec<Subscription>,
}

// ─── Bulk planning ───────────────────────────────────────────────────────────

/// Decide which rows a bulk subscribe must insert.
///
/// - `targets`: source URL → resolved canonical URL.
/// - `feeds`: canonical URL → existing feed id.
/// - `subscribed`: feeds the user already holds.
///
/// Each distinct literal URL is considered once, in input order. A URL whose
/// target feed is already held (before or earlier in this batch) is skipped;
/// one without a known feed becomes a pending row.
pub fn plan_subscriptions(
  user_id: UserId,
  urls: &[String],
  targets: &HashMap<String, String>,
  feeds: &HashMap<String, FeedId>,
  subscribed: &HashSet<FeedId>,
) -> Vec<NewSubscription> {
  let mut seen: HashSet<&str> = HashSet::new();
  let mut claimed = subscribed.clone();
  let mut plan = Vec::new();

  for url in urls {
    if !seen.insert(url.as_str()) {
      continue;
    }
    match targets.get(url).and_then(|target| feeds.get(target)) {
      Some(&feed_id) => {
        if claimed.insert(feed_id) {
          plan.push(NewSubscription::bound(user_id, feed_id, url.clone()));
        }
      }
      None => plan.push(NewSubscription::pending(user_id, url.clone())),
    }
  }

  plan
}
