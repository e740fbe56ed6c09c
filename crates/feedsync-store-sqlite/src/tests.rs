//! Integration tests for `SqliteStore` against an in-memory database.

use feedsync_core::{
  content::Fingerprint,
  feed::{Feed, FeedContent, FeedStatus, NewRawFeed},
  store::FeedStore,
  subscription::{Hint, NewSubscription, Subscription, SubscriptionQuery},
};
use chrono::Duration;
use pretty_assertions::assert_eq;

use crate::{Error, SqliteStore, encode::now, store::Inserted};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn content(body: &[u8], title: &str) -> FeedContent {
  FeedContent {
    title: Some(title.to_owned()),
    total_storys: 3,
    fingerprint: Fingerprint::of_content(body),
    ..Default::default()
  }
}

/// A feed that has been crawled once and is `ready`.
async fn ready_feed(s: &SqliteStore, url: &str) -> Feed {
  let feed = s.get_or_create_feed(url).await.unwrap();
  s.begin_feed_update(feed.id).await.unwrap();
  s.finish_feed_update(feed.id, content(url.as_bytes(), "Feed"))
    .await
    .unwrap()
}

/// Map `source` onto a ready feed at `target`.
async fn resolvable(s: &SqliteStore, source: &str, target: &str) -> Feed {
  s.record_url_map(source, target).await.unwrap();
  ready_feed(s, target).await
}

fn strings(list: &[&str]) -> Vec<String> {
  list.iter().map(|s| s.to_string()).collect()
}

fn hint(sub: &Subscription) -> Hint {
  Hint { id: sub.id, dt_updated: sub.dt_updated }
}

// ─── URL resolution ──────────────────────────────────────────────────────────

#[tokio::test]
async fn latest_mapping_wins() {
  let s = store().await;
  s.record_url_map("http://a.com/", "http://a.com/old.xml").await.unwrap();
  s.record_url_map("http://a.com/", "http://a.com/new.xml").await.unwrap();

  let target = s.find_target("http://a.com/").await.unwrap();
  assert_eq!(target.as_deref(), Some("http://a.com/new.xml"));
  assert_eq!(s.find_target("http://unknown/").await.unwrap(), None);
}

#[tokio::test]
async fn batch_resolution_agrees_with_single() {
  let s = store().await;
  s.record_url_map("http://a.com/", "http://a.com/1").await.unwrap();
  s.record_url_map("http://b.com/", "http://b.com/1").await.unwrap();
  s.record_url_map("http://a.com/", "http://a.com/2").await.unwrap();

  let sources = strings(&["http://a.com/", "http://b.com/", "http://c.com/"]);
  let all = s.find_all_target(&sources).await.unwrap();

  assert_eq!(all.len(), 2);
  for source in &sources {
    assert_eq!(all.get(source).cloned(), s.find_target(source).await.unwrap());
  }
  assert!(s.find_all_target(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn same_instant_mappings_resolve_to_the_last_inserted() {
  let s = store().await;
  let at = now();
  for target in ["http://m.com/1", "http://m.com/2", "http://m.com/3"] {
    s.record_url_map_at("http://m.com/", target, at).await.unwrap();
  }
  // An older mapping recorded afterwards does not win.
  s.record_url_map_at("http://m.com/", "http://m.com/old", at - Duration::seconds(1))
    .await
    .unwrap();

  let single = s.find_target("http://m.com/").await.unwrap();
  assert_eq!(single.as_deref(), Some("http://m.com/3"));

  let batch = s.find_all_target(&strings(&["http://m.com/"])).await.unwrap();
  assert_eq!(batch.get("http://m.com/").map(String::as_str), Some("http://m.com/3"));
}

// ─── Feeds ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_or_create_feed_is_idempotent() {
  let s = store().await;
  let a = s.get_or_create_feed("http://a.com/rss").await.unwrap();
  let b = s.get_or_create_feed("http://a.com/rss").await.unwrap();

  assert_eq!(a.id, b.id);
  assert_eq!(a.status, FeedStatus::Pending);
  assert!(a.detail.is_some());

  let found = s.find_feed_by_url("http://a.com/rss", false).await.unwrap().unwrap();
  assert_eq!(found.id, a.id);
  assert!(found.detail.is_none());
}

#[tokio::test]
async fn feed_transitions_follow_the_state_machine() {
  let s = store().await;
  let feed = s.get_or_create_feed("http://a.com/rss").await.unwrap();

  let err = s.finish_feed_update(feed.id, FeedContent::default()).await.unwrap_err();
  assert!(matches!(
    err,
    Error::InvalidTransition { from: FeedStatus::Pending, to: FeedStatus::Ready, .. }
  ));

  let updating = s.begin_feed_update(feed.id).await.unwrap();
  assert_eq!(updating.status, FeedStatus::Updating);
  assert!(updating.detail.unwrap().dt_checked.is_some());

  let err = s.begin_feed_update(feed.id).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { from: FeedStatus::Updating, .. }));

  let failed = s.fail_feed_update(feed.id).await.unwrap();
  assert_eq!(failed.status, FeedStatus::Error);

  // Scheduled re-check out of error.
  let again = s.begin_feed_update(feed.id).await.unwrap();
  assert_eq!(again.status, FeedStatus::Updating);

  let err = s.begin_feed_update(9999).await.unwrap_err();
  assert!(matches!(err, Error::FeedNotFound(9999)));
}

#[tokio::test]
async fn unchanged_content_keeps_clocks() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let sub = s.create_by_url("http://a.com/", 1).await.unwrap();

  s.begin_feed_update(feed.id).await.unwrap();
  let same = s
    .finish_feed_update(feed.id, content(b"http://a.com/rss", "Ignored"))
    .await
    .unwrap();

  assert_eq!(same.dt_updated, feed.dt_updated);
  assert_eq!(same.title.as_deref(), Some("Feed"));
  assert!(same.detail.unwrap().dt_synced > feed.detail.unwrap().dt_synced);

  let after = s.get_subscription(sub.id, 1, false).await.unwrap();
  assert_eq!(after.dt_updated, sub.dt_updated);
}

#[tokio::test]
async fn unchanged_content_refreshes_validators() {
  let s = store().await;
  let feed = s.get_or_create_feed("http://a.com/rss").await.unwrap();
  let body = b"<rss>same</rss>";
  let crawl = |etag: &str, last_modified: &str| FeedContent {
    title: Some("Feed".into()),
    encoding: Some("utf-8".into()),
    fingerprint: Fingerprint::of_content(body)
      .with_validators(Some(etag.into()), Some(last_modified.into())),
    ..Default::default()
  };

  s.begin_feed_update(feed.id).await.unwrap();
  let first = s.finish_feed_update(feed.id, crawl("\"v1\"", "Mon")).await.unwrap();
  s.begin_feed_update(feed.id).await.unwrap();
  let second = s.finish_feed_update(feed.id, crawl("\"v2\"", "Tue")).await.unwrap();

  assert_eq!(second.dt_updated, first.dt_updated);
  let detail = second.detail.unwrap();
  assert_eq!(detail.etag.as_deref(), Some("\"v2\""));
  assert_eq!(detail.last_modified.as_deref(), Some("Tue"));
  assert_eq!(detail.content_length, Some(body.len() as i64));
  assert_eq!(detail.encoding.as_deref(), Some("utf-8"));
}

#[tokio::test]
async fn changed_content_advances_feed_and_subscriptions() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let sub = s.create_by_url("http://a.com/", 1).await.unwrap();

  s.begin_feed_update(feed.id).await.unwrap();
  let changed = s
    .finish_feed_update(feed.id, content(b"new payload", "Renamed"))
    .await
    .unwrap();

  assert!(changed.dt_updated > feed.dt_updated);
  assert_eq!(changed.title.as_deref(), Some("Renamed"));
  assert_eq!(
    changed.detail.unwrap().fingerprint(),
    Fingerprint::of_content(b"new payload")
  );

  let after = s.get_subscription(sub.id, 1, false).await.unwrap();
  assert!(after.dt_updated > sub.dt_updated);
  assert_eq!(after.status, FeedStatus::Ready);
}

#[tokio::test]
async fn failed_update_marks_subscriptions() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let sub = s.create_by_url("http://a.com/", 1).await.unwrap();

  s.begin_feed_update(feed.id).await.unwrap();
  s.fail_feed_update(feed.id).await.unwrap();

  let after = s.get_subscription(sub.id, 1, false).await.unwrap();
  assert_eq!(after.status, FeedStatus::Error);
  assert!(after.dt_updated > sub.dt_updated);
}

#[tokio::test]
async fn status_mirror_never_rewinds_a_clock() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let sub = s.create_by_url("http://a.com/", 1).await.unwrap();
  let ahead = now() + Duration::hours(1);
  s.set_subscription_clock(sub.id, ahead).await.unwrap();

  s.begin_feed_update(feed.id).await.unwrap();
  s.fail_feed_update(feed.id).await.unwrap();

  let after = s.get_subscription(sub.id, 1, false).await.unwrap();
  assert_eq!(after.status, FeedStatus::Error);
  assert_eq!(after.dt_updated, ahead + Duration::microseconds(1));

  // A client holding the pushed-ahead clock still sees the change.
  let query = SubscriptionQuery {
    hints: vec![Hint { id: sub.id, dt_updated: ahead }],
    show_pending: true,
    ..Default::default()
  };
  let diff = s.query_by_user(1, &query).await.unwrap();
  assert_eq!(diff.subscriptions.len(), 1);
}

// ─── Raw snapshots ───────────────────────────────────────────────────────────

#[tokio::test]
async fn raw_snapshots_compress_large_payloads() {
  let s = store().await;
  let feed = s.get_or_create_feed("http://a.com/rss").await.unwrap();
  let body = "<item>story</item>".repeat(200).into_bytes();

  let recorded = s
    .record_raw_feed(NewRawFeed {
      status_code: Some(200),
      etag: Some("\"v1\"".into()),
      content: Some(body.clone()),
      headers: [("content-type".to_string(), "application/rss+xml".to_string())]
        .into_iter()
        .collect(),
      ..NewRawFeed::new(feed.id, "http://a.com/rss")
    })
    .await
    .unwrap();
  assert!(recorded.is_gzipped());
  assert_eq!(recorded.content_length, Some(body.len() as i64));

  let latest = s.latest_raw_feed(feed.id).await.unwrap().unwrap();
  assert_eq!(latest.id, recorded.id);
  assert!(latest.is_gzipped());
  assert_eq!(latest.get_content(None).unwrap(), Some(body.clone()));
  assert_eq!(latest.headers.get("content-type").map(String::as_str), Some("application/rss+xml"));
  assert_eq!(latest.fingerprint().content_hash, Fingerprint::of_content(&body).content_hash);
}

#[tokio::test]
async fn latest_raw_snapshot_is_the_newest() {
  let s = store().await;
  let feed = s.get_or_create_feed("http://a.com/rss").await.unwrap();

  s.record_raw_feed(NewRawFeed {
    content: Some(b"first".to_vec()),
    ..NewRawFeed::new(feed.id, "http://a.com/rss")
  })
  .await
  .unwrap();
  let second = s
    .record_raw_feed(NewRawFeed {
      status_code: Some(304),
      ..NewRawFeed::new(feed.id, "http://a.com/rss")
    })
    .await
    .unwrap();

  let latest = s.latest_raw_feed(feed.id).await.unwrap().unwrap();
  assert_eq!(latest.id, second.id);
  assert_eq!(latest.status_code, Some(304));
  assert_eq!(latest.get_content(None).unwrap(), None);

  assert!(s.latest_raw_feed(feed.id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn raw_snapshot_requires_a_feed() {
  let s = store().await;
  let err = s
    .record_raw_feed(NewRawFeed::new(42, "http://nowhere/"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::FeedNotFound(42)));
}

// ─── Single subscribe ────────────────────────────────────────────────────────

#[tokio::test]
async fn resolved_url_binds_to_ready_feed() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/feed", "http://a.com/rss.xml").await;

  let sub = s.create_by_url("http://a.com/feed", 1).await.unwrap();
  assert_eq!(sub.feed_id, Some(feed.id));
  assert_eq!(sub.status, FeedStatus::Ready);
  assert_eq!(sub.url, "http://a.com/feed");
  assert_eq!(sub.story_offset, 0);
  assert_eq!(sub.feed.map(|f| f.url), Some(feed.url));
}

#[tokio::test]
async fn unresolved_url_is_pending() {
  let s = store().await;
  let sub = s.create_by_url("http://b.com/", 1).await.unwrap();

  assert_eq!(sub.status, FeedStatus::Pending);
  assert_eq!(sub.feed_id, None);
  assert!(sub.feed.is_none());

  // Unresolved URLs carry no feed to collide on.
  let again = s.create_by_url("http://b.com/", 1).await.unwrap();
  assert_ne!(again.id, sub.id);
}

#[tokio::test]
async fn second_subscription_to_same_feed_is_rejected() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  s.record_url_map("http://www.a.com/", "http://a.com/rss").await.unwrap();

  s.create_by_url("http://a.com/", 1).await.unwrap();
  let err = s.create_by_url("http://www.a.com/", 1).await.unwrap_err();
  assert!(matches!(
    err,
    Error::DuplicateSubscription { user_id: 1, feed_id } if feed_id == feed.id
  ));

  // Another user is unaffected.
  s.create_by_url("http://www.a.com/", 2).await.unwrap();
}

// ─── Bulk subscribe ──────────────────────────────────────────────────────────

#[tokio::test]
async fn bulk_matches_single_creates() {
  let s = store().await;
  resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  resolvable(&s, "http://c.com/", "http://c.com/atom").await;
  let urls = strings(&["http://c.com/", "http://b.com/", "http://a.com/"]);

  for url in &urls {
    s.create_by_url(url, 1).await.unwrap();
  }
  let bulk = s.create_by_url_s(&urls, 2, 500).await.unwrap();

  let single = s
    .query_by_user(1, &SubscriptionQuery { show_pending: true, ..Default::default() })
    .await
    .unwrap()
    .subscriptions;

  let shape = |subs: &[Subscription]| {
    let mut v: Vec<_> = subs.iter().map(|s| (s.url.clone(), s.feed_id, s.is_ready())).collect();
    v.sort();
    v
  };
  assert_eq!(shape(&bulk), shape(&single));
}

#[tokio::test]
async fn bulk_collapses_duplicates_and_sorts_by_url() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  s.record_url_map("http://www.a.com/", "http://a.com/rss").await.unwrap();

  let urls = strings(&[
    "http://z.com/",
    "http://www.a.com/",
    "http://a.com/",
    "http://z.com/",
  ]);
  let subs = s.create_by_url_s(&urls, 1, 500).await.unwrap();

  let got: Vec<_> = subs.iter().map(|s| (s.url.as_str(), s.feed_id)).collect();
  assert_eq!(got, vec![("http://www.a.com/", Some(feed.id)), ("http://z.com/", None)]);
  assert_eq!(subs[0].feed.as_ref().map(|f| f.id), Some(feed.id));
}

#[tokio::test]
async fn bulk_returns_existing_subscriptions() {
  let s = store().await;
  resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let existing = s.create_by_url("http://a.com/", 1).await.unwrap();

  let subs = s
    .create_by_url_s(&strings(&["http://c.com/", "http://a.com/"]), 1, 500)
    .await
    .unwrap();

  assert_eq!(subs.len(), 2);
  assert_eq!(subs[0].id, existing.id);
  assert_eq!(subs[0].dt_updated, existing.dt_updated);
  assert_eq!(subs[1].url, "http://c.com/");
  assert_eq!(subs[1].status, FeedStatus::Pending);
}

#[tokio::test]
async fn bulk_chunks_and_handles_empty_input() {
  let s = store().await;
  assert!(s.create_by_url_s(&[], 1, 10).await.unwrap().is_empty());

  let urls = strings(&["http://1/", "http://2/", "http://3/"]);
  let subs = s.create_by_url_s(&urls, 1, 1).await.unwrap();
  assert_eq!(subs.len(), 3);

  // A zero batch size still makes progress.
  let subs = s.create_by_url_s(&strings(&["http://4/"]), 1, 0).await.unwrap();
  assert_eq!(subs.len(), 1);
}

#[tokio::test]
async fn lost_insert_race_resolves_to_winner() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let winner = s.create_by_url("http://a.com/", 1).await.unwrap();

  // A plan computed before the winner committed.
  let plan = vec![
    NewSubscription::bound(1, feed.id, "http://www.a.com/"),
    NewSubscription::pending(1, "http://b.com/"),
  ];
  let outcomes = s.insert_planned(plan, 10, now()).await.unwrap();

  assert_eq!(outcomes[0], Inserted::Existing { id: winner.id, feed_id: feed.id });
  assert!(matches!(outcomes[1], Inserted::New(_)));
}

#[tokio::test]
async fn failed_later_chunk_keeps_earlier_rows() {
  let s = store().await;

  // The second row points at a feed that does not exist.
  let plan = vec![
    NewSubscription::pending(1, "http://a.com/"),
    NewSubscription::bound(1, 4242, "http://b.com/"),
  ];
  let err = s.insert_planned(plan, 1, now()).await.unwrap_err();
  assert!(matches!(err, Error::PartialBatch { committed: 1, .. }));

  let query = SubscriptionQuery { show_pending: true, ..Default::default() };
  let kept = s.query_by_user(1, &query).await.unwrap();
  let urls: Vec<_> = kept.subscriptions.iter().map(|s| s.url.as_str()).collect();
  assert_eq!(urls, vec!["http://a.com/"]);
}

#[tokio::test]
async fn failed_first_chunk_is_a_plain_database_error() {
  let s = store().await;
  let plan = vec![NewSubscription::bound(1, 4242, "http://b.com/")];
  let err = s.insert_planned(plan, 10, now()).await.unwrap_err();
  assert!(matches!(err, Error::Database(_)));
}

// ─── Scoped access ───────────────────────────────────────────────────────────

#[tokio::test]
async fn other_users_cannot_see_subscriptions() {
  let s = store().await;
  let sub = s.create_by_url("http://b.com/", 1).await.unwrap();

  let err = s.get_subscription(sub.id, 2, false).await.unwrap_err();
  assert!(matches!(err, Error::SubscriptionNotFound(id) if id == sub.id));
  let err = s.update_story_offset(sub.id, 2, 5).await.unwrap_err();
  assert!(matches!(err, Error::SubscriptionNotFound(_)));
  let err = s.delete_subscription(sub.id, 2).await.unwrap_err();
  assert!(matches!(err, Error::SubscriptionNotFound(_)));

  s.delete_subscription(sub.id, 1).await.unwrap();
  let err = s.get_subscription(sub.id, 1, false).await.unwrap_err();
  assert!(matches!(err, Error::SubscriptionNotFound(_)));
}

#[tokio::test]
async fn deleting_a_subscription_keeps_the_feed() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let sub = s.create_by_url("http://a.com/", 1).await.unwrap();

  s.delete_subscription(sub.id, 1).await.unwrap();
  assert!(s.get_feed(feed.id, false).await.unwrap().is_some());
}

// ─── Differential sync ───────────────────────────────────────────────────────

#[tokio::test]
async fn diff_returns_only_changed_rows() {
  let s = store().await;
  resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  resolvable(&s, "http://b.com/", "http://b.com/rss").await;
  let first = s.create_by_url("http://a.com/", 1).await.unwrap();
  let second = s.create_by_url("http://b.com/", 1).await.unwrap();

  let full = s.query_by_user(1, &SubscriptionQuery::default()).await.unwrap();
  assert_eq!(full.total, 2);
  assert_eq!(full.subscriptions.len(), 2);

  let query = SubscriptionQuery { hints: vec![hint(&first)], ..Default::default() };
  let diff = s.query_by_user(1, &query).await.unwrap();
  assert_eq!(diff.total, 2);
  let ids: Vec<_> = diff.subscriptions.iter().map(|s| s.id).collect();
  assert_eq!(ids, vec![second.id]);

  let query = SubscriptionQuery {
    hints: vec![hint(&first), hint(&second)],
    ..Default::default()
  };
  let diff = s.query_by_user(1, &query).await.unwrap();
  assert_eq!(diff.total, 2);
  assert!(diff.subscriptions.is_empty());
}

#[tokio::test]
async fn offset_change_shows_up_in_diff() {
  let s = store().await;
  resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  resolvable(&s, "http://b.com/", "http://b.com/rss").await;
  let first = s.create_by_url("http://a.com/", 1).await.unwrap();
  let second = s.create_by_url("http://b.com/", 1).await.unwrap();

  let moved = s.update_story_offset(first.id, 1, 2).await.unwrap();
  assert_eq!(moved.story_offset, 2);
  assert!(moved.dt_updated > first.dt_updated);

  let query = SubscriptionQuery {
    hints: vec![hint(&first), hint(&second)],
    detail: true,
    ..Default::default()
  };
  let diff = s.query_by_user(1, &query).await.unwrap();
  assert_eq!(diff.subscriptions.len(), 1);

  let got = &diff.subscriptions[0];
  assert_eq!(got.id, first.id);
  assert_eq!(got.dt_updated, moved.dt_updated);
  assert_eq!(got.num_unread_storys(), Some(1));
}

#[tokio::test]
async fn repeated_offset_updates_strictly_advance() {
  let s = store().await;
  let sub = s.create_by_url("http://b.com/", 1).await.unwrap();

  let mut last = sub.dt_updated;
  for offset in 0..5 {
    let next = s.update_story_offset(sub.id, 1, offset).await.unwrap();
    assert!(next.dt_updated > last);
    last = next.dt_updated;
  }
  let stored = s.get_subscription(sub.id, 1, false).await.unwrap();
  assert_eq!(stored.dt_updated, last);
  assert_eq!(stored.story_offset, 4);
}

#[tokio::test]
async fn pending_rows_are_hidden_unless_asked_for() {
  let s = store().await;
  resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  s.create_by_url("http://a.com/", 1).await.unwrap();
  let pending = s.create_by_url("http://b.com/", 1).await.unwrap();

  let default = s.query_by_user(1, &SubscriptionQuery::default()).await.unwrap();
  assert_eq!(default.total, 1);
  assert!(default.subscriptions.iter().all(|s| s.id != pending.id));

  let query = SubscriptionQuery { show_pending: true, ..Default::default() };
  let all = s.query_by_user(1, &query).await.unwrap();
  assert_eq!(all.total, 2);

  // Most recently changed first.
  assert_eq!(all.subscriptions[0].id, pending.id);
}

#[tokio::test]
async fn pending_filter_applies_to_diffs() {
  let s = store().await;
  resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  let ready = s.create_by_url("http://a.com/", 1).await.unwrap();
  let pending = s.create_by_url("http://b.com/", 1).await.unwrap();

  let hidden = SubscriptionQuery { hints: vec![hint(&ready)], ..Default::default() };
  let diff = s.query_by_user(1, &hidden).await.unwrap();
  assert_eq!(diff.total, 1);
  assert!(diff.subscriptions.is_empty());

  let shown = SubscriptionQuery { show_pending: true, ..hidden };
  let diff = s.query_by_user(1, &shown).await.unwrap();
  assert_eq!(diff.total, 2);
  let ids: Vec<_> = diff.subscriptions.iter().map(|s| s.id).collect();
  assert_eq!(ids, vec![pending.id]);
}

// ─── Resolution ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn resolving_binds_pending_subscription() {
  let s = store().await;
  let sub = s.create_by_url("http://n.com/", 1).await.unwrap();

  let bound = s.resolve_subscription(sub.id, "http://n.com/rss").await.unwrap();
  let feed = s.find_feed_by_url("http://n.com/rss", false).await.unwrap().unwrap();
  assert_eq!(bound.feed_id, Some(feed.id));
  assert_eq!(bound.status, FeedStatus::Pending);
  assert!(bound.dt_updated > sub.dt_updated);
  assert_eq!(
    s.find_target("http://n.com/").await.unwrap().as_deref(),
    Some("http://n.com/rss")
  );

  // The first crawl makes it ready.
  s.begin_feed_update(feed.id).await.unwrap();
  s.finish_feed_update(feed.id, content(b"body", "N")).await.unwrap();
  let ready = s.get_subscription(sub.id, 1, false).await.unwrap();
  assert_eq!(ready.status, FeedStatus::Ready);

  let err = s.resolve_subscription(sub.id, "http://n.com/rss").await.unwrap_err();
  assert!(matches!(err, Error::AlreadyBound(id) if id == sub.id));
}

#[tokio::test]
async fn resolving_onto_a_held_feed_is_a_duplicate() {
  let s = store().await;
  let feed = resolvable(&s, "http://a.com/", "http://a.com/rss").await;
  s.create_by_url("http://a.com/", 1).await.unwrap();
  let pending = s.create_by_url("http://www.a.com/", 1).await.unwrap();

  let err = s
    .resolve_subscription(pending.id, "http://a.com/rss")
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::DuplicateSubscription { user_id: 1, feed_id } if feed_id == feed.id
  ));
}
