//! Differential sync: which subscriptions a client needs to re-fetch.
//!
//! The client sends `(id, dt_updated)` hints for what it already holds. A
//! subscription is stale on the client when its id is unknown there or its
//! current clock is strictly newer than the hinted one. Ids the client holds
//! that no longer exist are detected client-side by comparing against the
//! returned `total`.

use std::{cmp::Reverse, collections::HashMap};

use chrono::{DateTime, Utc};

use crate::subscription::{Hint, Subscription, SubscriptionId};

/// Ids from `current` the client must re-fetch, in `current` order.
///
/// When a hint id repeats, the last occurrence wins.
pub fn changed_ids(
  current: &[(SubscriptionId, DateTime<Utc>)],
  hints: &[Hint],
) -> Vec<SubscriptionId> {
  let hints: HashMap<SubscriptionId, DateTime<Utc>> =
    hints.iter().map(|h| (h.id, h.dt_updated)).collect();

  current
    .iter()
    .filter(|(id, dt_updated)| match hints.get(id) {
      Some(seen) => dt_updated > seen,
      None => true,
    })
    .map(|(id, _)| *id)
    .collect()
}

/// Most recently changed first; id breaks ties.
pub fn sort_by_recency(subscriptions: &mut [Subscription]) {
  subscriptions.sort_by_key(|s| Reverse((s.dt_updated, s.id)));
}
