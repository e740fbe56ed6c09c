//! The SQLite implementation of [`FeedStore`].

use std::{
  collections::{HashMap, HashSet},
  path::Path,
};

use chrono::{DateTime, Utc};
use feedsync_core::{
  content::{Fingerprint, StoredContent},
  feed::{Feed, FeedContent, FeedDetail, FeedId, FeedStatus, FeedUrlMap, NewRawFeed, RawFeed},
  store::FeedStore,
  subscription::{
    NewSubscription, Subscription, SubscriptionId, SubscriptionQuery, SyncResult, UserId,
    plan_subscriptions,
  },
  sync::{changed_ids, sort_by_recency},
};
use rusqlite::{OptionalExtension as _, Transaction, params};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  encode::{
    FeedRow, RAW_FEED_COLUMNS, RawFeedRow, SubscriptionRow, UrlMapRow, decode_dt, encode_dt,
    advance, encode_headers, encode_list, encode_status, feed_columns, next_tick, now, read_dt,
    subscription_select,
  },
  error::is_constraint_violation,
  schema::SCHEMA,
};

/// How often `update_story_offset` re-reads the clock after losing a race.
const OFFSET_CAS_ATTEMPTS: usize = 5;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A feedsync store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// What happened to one planned subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inserted {
  New(SubscriptionId),
  /// A concurrent writer bound the same `(user, feed)` first.
  Existing { id: SubscriptionId, feed_id: FeedId },
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Feed helpers ──────────────────────────────────────────────────────────

  /// All feeds whose url is in `urls`, in one query.
  async fn feeds_by_urls(&self, urls: &[String]) -> Result<Vec<Feed>> {
    if urls.is_empty() {
      return Ok(Vec::new());
    }
    let urls_json = encode_list(urls)?;

    let raws: Vec<FeedRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM feeds f
           WHERE f.url IN (SELECT value FROM json_each(?1))",
          feed_columns(false)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![urls_json], |row| FeedRow::read(row, 0, false))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(FeedRow::into_feed).collect()
  }

  /// Compare-and-swap a feed into `to`, then run `apply` in the same
  /// transaction. Only succeeds from one of `to`'s predecessors.
  async fn transition_feed<F>(&self, id: FeedId, to: FeedStatus, apply: F) -> Result<Feed>
  where
    F: FnOnce(&Transaction<'_>) -> rusqlite::Result<()> + Send + 'static,
  {
    let allowed: Vec<&str> = to.predecessors().iter().map(|s| encode_status(*s)).collect();
    let allowed_json = encode_list(&allowed)?;
    let to_str = encode_status(to);

    let (current, swapped): (Option<String>, bool) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row("SELECT status FROM feeds WHERE id = ?1", params![id], |r| {
            r.get(0)
          })
          .optional()?;
        if current.is_none() {
          return Ok((None, false));
        }

        let swapped = tx.execute(
          "UPDATE feeds SET status = ?1
           WHERE id = ?2 AND status IN (SELECT value FROM json_each(?3))",
          params![to_str, id, allowed_json],
        )? == 1;
        if swapped {
          apply(&tx)?;
          tx.commit()?;
        }
        Ok((current, swapped))
      })
      .await?;

    let Some(current) = current else {
      return Err(Error::FeedNotFound(id));
    };
    if !swapped {
      let from = FeedStatus::from_column(&current)?;
      return Err(Error::InvalidTransition { feed_id: id, from, to });
    }
    debug!(feed_id = id, from = %current, %to, "feed status changed");

    self.get_feed(id, true).await?.ok_or(Error::FeedNotFound(id))
  }

  // ── Subscription helpers ──────────────────────────────────────────────────

  /// Fetch one subscription, optionally scoped to its owner.
  async fn load_subscription(
    &self,
    id: SubscriptionId,
    user_id: Option<UserId>,
    detail: bool,
  ) -> Result<Option<Subscription>> {
    let raw: Option<SubscriptionRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "{} WHERE s.id = ?1 AND (?2 IS NULL OR s.user_id = ?2)",
          subscription_select(detail)
        );
        Ok(
          conn
            .query_row(&sql, params![id, user_id], |row| {
              SubscriptionRow::read(row, detail)
            })
            .optional()?,
        )
      })
      .await?;

    raw.map(SubscriptionRow::into_subscription).transpose()
  }

  /// A user's subscriptions, optionally restricted to `ids`.
  async fn list_subscriptions(
    &self,
    user_id: UserId,
    ids: Option<&[SubscriptionId]>,
    detail: bool,
    show_pending: bool,
  ) -> Result<Vec<Subscription>> {
    let ids_json = ids.map(|ids| encode_list(ids)).transpose()?;

    let raws: Vec<SubscriptionRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "{} WHERE s.user_id = ?1
             AND (?2 OR s.status != 'pending')
             AND (?3 IS NULL OR s.id IN (SELECT value FROM json_each(?3)))",
          subscription_select(detail)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![user_id, show_pending, ids_json], |row| {
            SubscriptionRow::read(row, detail)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(SubscriptionRow::into_subscription)
      .collect()
  }

  /// A user's subscriptions bound to any of `feed_ids`, in one query.
  async fn subscriptions_for_feeds(
    &self,
    user_id: UserId,
    feed_ids: &[FeedId],
  ) -> Result<Vec<Subscription>> {
    if feed_ids.is_empty() {
      return Ok(Vec::new());
    }
    let ids_json = encode_list(feed_ids)?;

    let raws: Vec<SubscriptionRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "{} WHERE s.user_id = ?1
             AND s.feed_id IN (SELECT value FROM json_each(?2))",
          subscription_select(false)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![user_id, ids_json], |row| {
            SubscriptionRow::read(row, false)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(SubscriptionRow::into_subscription)
      .collect()
  }

  /// Append a mapping stamped `at`.
  pub(crate) async fn record_url_map_at(
    &self,
    source: &str,
    target: &str,
    at: DateTime<Utc>,
  ) -> Result<FeedUrlMap> {
    let row = UrlMapRow {
      id:         0,
      source:     source.to_owned(),
      target:     target.to_owned(),
      dt_created: encode_dt(at),
    };
    let (src, tgt, at) = (row.source.clone(), row.target.clone(), row.dt_created.clone());

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO feed_url_maps (source, target, dt_created) VALUES (?1, ?2, ?3)",
          params![src, tgt, at],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    debug!(source, target, "recorded url mapping");
    UrlMapRow { id, ..row }.into_url_map()
  }

  /// Insert planned rows in transactions of at most `batch_size` rows.
  ///
  /// Returns one outcome per planned row, in plan order. A row that trips
  /// the `(user, feed)` constraint resolves to the row that won the race
  /// instead of failing the batch.
  ///
  /// Each chunk commits on its own. When a later chunk fails, the rows of
  /// the chunks before it stay and the error is [`Error::PartialBatch`].
  pub(crate) async fn insert_planned(
    &self,
    plan: Vec<NewSubscription>,
    batch_size: usize,
    at: DateTime<Utc>,
  ) -> Result<Vec<Inserted>> {
    let at = encode_dt(at);
    let batch_size = batch_size.max(1);

    let outcome = self
      .conn
      .call(move |conn| {
        let mut out = Vec::with_capacity(plan.len());
        for chunk in plan.chunks(batch_size) {
          match insert_chunk(conn, chunk, &at) {
            Ok(done) => out.extend(done),
            Err(e) => return Ok(Err((out.len(), e))),
          }
        }
        Ok(Ok(out))
      })
      .await?;

    match outcome {
      Ok(out) => Ok(out),
      Err((0, e)) => Err(Error::Database(e.into())),
      Err((committed, e)) => {
        warn!(committed, "bulk insert stopped; earlier chunks stay committed");
        Err(Error::PartialBatch { committed, source: e.into() })
      }
    }
  }

  /// Move a subscription's clock, bypassing the monotonic rules.
  #[cfg(test)]
  pub(crate) async fn set_subscription_clock(
    &self,
    id: SubscriptionId,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE subscriptions SET dt_updated = ?1 WHERE id = ?2",
          params![at, id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Single-row form of [`SqliteStore::insert_planned`].
  async fn insert_one(&self, new: NewSubscription) -> Result<Inserted> {
    let at = encode_dt(now());

    Ok(
      self
        .conn
        .call(move |conn| {
          let mut insert = conn.prepare_cached(INSERT_SUBSCRIPTION)?;
          let mut holder = conn.prepare_cached(SELECT_HOLDER)?;
          Ok(insert_row(&mut insert, &mut holder, &new, &at)?)
        })
        .await?,
    )
  }
}

const INSERT_SUBSCRIPTION: &str =
  "INSERT INTO subscriptions (user_id, feed_id, status, url, dt_created, dt_updated)
   VALUES (?1, ?2, ?3, ?4, ?5, ?5)";

const SELECT_HOLDER: &str = "SELECT id FROM subscriptions WHERE user_id = ?1 AND feed_id = ?2";

/// Insert one chunk of subscriptions inside a single transaction.
fn insert_chunk(
  conn: &mut rusqlite::Connection,
  rows: &[NewSubscription],
  at: &str,
) -> rusqlite::Result<Vec<Inserted>> {
  let tx = conn.transaction()?;
  let out = {
    let mut insert = tx.prepare_cached(INSERT_SUBSCRIPTION)?;
    let mut holder = tx.prepare_cached(SELECT_HOLDER)?;
    rows
      .iter()
      .map(|row| insert_row(&mut insert, &mut holder, row, at))
      .collect::<rusqlite::Result<Vec<_>>>()?
  };
  tx.commit()?;
  Ok(out)
}

/// Insert one subscription. A `(user, feed)` collision resolves to the row
/// already holding the pair; any other failure propagates.
fn insert_row(
  insert: &mut rusqlite::Statement<'_>,
  holder: &mut rusqlite::Statement<'_>,
  row: &NewSubscription,
  at: &str,
) -> rusqlite::Result<Inserted> {
  let status = encode_status(row.status);
  match insert.insert(params![row.user_id, row.feed_id, status, row.url, at]) {
    Ok(id) => Ok(Inserted::New(id)),
    Err(e) if is_constraint_violation(&e) => {
      let existing = match row.feed_id {
        Some(feed_id) => holder
          .query_row(params![row.user_id, feed_id], |r| r.get(0))
          .optional()?
          .map(|id| Inserted::Existing { id, feed_id }),
        None => None,
      };
      existing.ok_or(e)
    }
    Err(e) => Err(e),
  }
}

/// Make bound subscriptions follow their feed's status. Rows already in
/// `status` keep their clock unless `force` is set. Each touched clock moves
/// to `at` or, if it is already there or later, one tick past itself.
fn mirror_status(
  tx: &Transaction<'_>,
  feed_id: FeedId,
  status: FeedStatus,
  at: DateTime<Utc>,
  force: bool,
) -> rusqlite::Result<usize> {
  let status = encode_status(status);
  let clocks: Vec<(SubscriptionId, DateTime<Utc>)> = {
    let mut stmt = tx.prepare_cached(
      "SELECT id, dt_updated FROM subscriptions
       WHERE feed_id = ?1 AND (?2 OR status != ?3)",
    )?;
    stmt
      .query_map(params![feed_id, force, status], |r| {
        Ok((r.get(0)?, read_dt(r, 1)?))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?
  };

  let mut update = tx.prepare_cached(
    "UPDATE subscriptions SET status = ?1, dt_updated = ?2 WHERE id = ?3",
  )?;
  for (id, prev) in &clocks {
    update.execute(params![status, encode_dt(advance(*prev, at)), id])?;
  }
  Ok(clocks.len())
}

// ─── FeedStore impl ──────────────────────────────────────────────────────────

impl FeedStore for SqliteStore {
  type Error = Error;

  // ── URL resolution ────────────────────────────────────────────────────────

  async fn record_url_map(&self, source: &str, target: &str) -> Result<FeedUrlMap> {
    self.record_url_map_at(source, target, now()).await
  }

  async fn find_target(&self, source: &str) -> Result<Option<String>> {
    let source = source.to_owned();

    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                "SELECT target FROM feed_url_maps
                 WHERE source = ?1
                 ORDER BY dt_created DESC, id DESC
                 LIMIT 1",
                params![source],
                |r| r.get(0),
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn find_all_target(&self, sources: &[String]) -> Result<HashMap<String, String>> {
    if sources.is_empty() {
      return Ok(HashMap::new());
    }
    let sources_json = encode_list(sources)?;

    let pairs: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT source, target FROM (
             SELECT source, target,
                    ROW_NUMBER() OVER (
                      PARTITION BY source ORDER BY dt_created DESC, id DESC
                    ) AS recency
             FROM feed_url_maps
             WHERE source IN (SELECT value FROM json_each(?1))
           )
           WHERE recency = 1",
        )?;
        let rows = stmt
          .query_map(params![sources_json], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    debug!(requested = sources.len(), resolved = pairs.len(), "batch url resolution");
    Ok(pairs.into_iter().collect())
  }

  // ── Feeds ─────────────────────────────────────────────────────────────────

  async fn get_or_create_feed(&self, url: &str) -> Result<Feed> {
    let url = url.to_owned();
    let at = encode_dt(now());

    let (created, raw): (bool, FeedRow) = self
      .conn
      .call(move |conn| {
        let created = conn.execute(
          "INSERT INTO feeds (url, status, dt_created, dt_updated)
           VALUES (?1, 'pending', ?2, ?2)
           ON CONFLICT (url) DO NOTHING",
          params![url, at],
        )? == 1;
        let sql = format!("SELECT {} FROM feeds f WHERE f.url = ?1", feed_columns(true));
        let raw = conn.query_row(&sql, params![url], |row| FeedRow::read(row, 0, true))?;
        Ok((created, raw))
      })
      .await?;

    if created {
      info!(feed_id = raw.id, url = %raw.url, "discovered new feed");
    }
    raw.into_feed()
  }

  async fn get_feed(&self, id: FeedId, detail: bool) -> Result<Option<Feed>> {
    let raw: Option<FeedRow> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM feeds f WHERE f.id = ?1", feed_columns(detail));
        Ok(
          conn
            .query_row(&sql, params![id], |row| FeedRow::read(row, 0, detail))
            .optional()?,
        )
      })
      .await?;

    raw.map(FeedRow::into_feed).transpose()
  }

  async fn find_feed_by_url(&self, url: &str, detail: bool) -> Result<Option<Feed>> {
    let url = url.to_owned();

    let raw: Option<FeedRow> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM feeds f WHERE f.url = ?1", feed_columns(detail));
        Ok(
          conn
            .query_row(&sql, params![url], |row| FeedRow::read(row, 0, detail))
            .optional()?,
        )
      })
      .await?;

    raw.map(FeedRow::into_feed).transpose()
  }

  async fn begin_feed_update(&self, id: FeedId) -> Result<Feed> {
    let checked = encode_dt(now());
    self
      .transition_feed(id, FeedStatus::Updating, move |tx| {
        tx.execute(
          "UPDATE feeds SET dt_checked = ?1 WHERE id = ?2",
          params![checked, id],
        )?;
        Ok(())
      })
      .await
  }

  async fn finish_feed_update(&self, id: FeedId, content: FeedContent) -> Result<Feed> {
    let current = self.get_feed(id, true).await?.ok_or(Error::FeedNotFound(id))?;
    let previous = current
      .detail
      .as_ref()
      .map(FeedDetail::fingerprint)
      .unwrap_or_default();
    let changed = !content.fingerprint.matches(&previous);

    let synced_at = now();
    let synced = encode_dt(synced_at);
    let updated = encode_dt(next_tick(current.dt_updated));

    let feed = self
      .transition_feed(id, FeedStatus::Ready, move |tx| {
        if changed {
          let fp = content.fingerprint;
          tx.execute(
            "UPDATE feeds SET
               title = ?1, link = ?2, author = ?3, icon = ?4, description = ?5,
               version = ?6, encoding = ?7, etag = ?8, last_modified = ?9,
               content_length = ?10, content_hash = ?11, total_storys = ?12,
               dt_updated = ?13, dt_synced = ?14
             WHERE id = ?15",
            params![
              content.title,
              content.link,
              content.author,
              content.icon,
              content.description,
              content.version,
              content.encoding,
              fp.etag,
              fp.last_modified,
              fp.content_length,
              fp.content_hash,
              content.total_storys,
              updated,
              synced,
              id,
            ],
          )?;
        } else {
          // Same payload: refresh the validators for the next conditional
          // fetch, leave the descriptive fields and the clock alone.
          let fp = content.fingerprint;
          tx.execute(
            "UPDATE feeds SET
               encoding = COALESCE(?1, encoding),
               etag = COALESCE(?2, etag),
               last_modified = COALESCE(?3, last_modified),
               content_length = COALESCE(?4, content_length),
               content_hash = COALESCE(?5, content_hash),
               dt_synced = ?6
             WHERE id = ?7",
            params![
              content.encoding,
              fp.etag,
              fp.last_modified,
              fp.content_length,
              fp.content_hash,
              synced,
              id,
            ],
          )?;
        }
        mirror_status(tx, id, FeedStatus::Ready, synced_at, changed)?;
        Ok(())
      })
      .await?;

    if changed {
      info!(feed_id = id, "feed content changed");
    } else {
      debug!(feed_id = id, "feed content unchanged");
    }
    Ok(feed)
  }

  async fn fail_feed_update(&self, id: FeedId) -> Result<Feed> {
    let at = now();
    let feed = self
      .transition_feed(id, FeedStatus::Error, move |tx| {
        mirror_status(tx, id, FeedStatus::Error, at, false)?;
        Ok(())
      })
      .await?;
    warn!(feed_id = id, url = %feed.url, "feed update failed");
    Ok(feed)
  }

  // ── Raw snapshots ─────────────────────────────────────────────────────────

  async fn record_raw_feed(&self, input: NewRawFeed) -> Result<RawFeed> {
    let stored = input
      .content
      .as_deref()
      .map(StoredContent::set_content)
      .transpose()?;
    let fingerprint = input
      .content
      .as_deref()
      .map(Fingerprint::of_content)
      .unwrap_or_default();
    let headers_json = encode_headers(&input.headers)?;
    let dt_created = now();

    let feed_id = input.feed_id;
    let (url, encoding, etag, last_modified) = (
      input.url.clone(),
      input.encoding.clone(),
      input.etag.clone(),
      input.last_modified.clone(),
    );
    let status_code = input.status_code;
    let (bytes, is_gzipped) = match &stored {
      Some(c) => (Some(c.bytes.clone()), c.is_gzipped),
      None => (None, false),
    };
    let (length, hash) = (fingerprint.content_length, fingerprint.content_hash.clone());
    let at = encode_dt(dt_created);

    let id: Option<i64> = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO raw_feeds (
             feed_id, url, encoding, status_code, etag, last_modified, headers,
             is_gzipped, content, content_length, content_hash, dt_created
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
          params![
            feed_id,
            url,
            encoding,
            status_code,
            etag,
            last_modified,
            headers_json,
            is_gzipped,
            bytes,
            length,
            hash,
            at,
          ],
        );
        match inserted {
          Ok(_) => Ok(Some(conn.last_insert_rowid())),
          // The feed foreign key is the only constraint on this table.
          Err(e) if is_constraint_violation(&e) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;
    let id = id.ok_or(Error::FeedNotFound(feed_id))?;

    debug!(feed_id, raw_feed_id = id, is_gzipped, "recorded raw snapshot");
    Ok(RawFeed {
      id,
      feed_id,
      url: input.url,
      encoding: input.encoding,
      status_code,
      etag: input.etag,
      last_modified: input.last_modified,
      headers: input.headers,
      content: stored,
      content_length: fingerprint.content_length,
      content_hash: fingerprint.content_hash,
      dt_created,
    })
  }

  async fn latest_raw_feed(&self, feed_id: FeedId) -> Result<Option<RawFeed>> {
    let raw: Option<RawFeedRow> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {RAW_FEED_COLUMNS} FROM raw_feeds
           WHERE feed_id = ?1
           ORDER BY dt_created DESC, id DESC
           LIMIT 1"
        );
        Ok(
          conn
            .query_row(&sql, params![feed_id], RawFeedRow::read)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawFeedRow::into_raw_feed).transpose()
  }

  // ── Subscriptions ─────────────────────────────────────────────────────────

  async fn create_by_url(&self, url: &str, user_id: UserId) -> Result<Subscription> {
    let feed = match self.find_target(url).await? {
      Some(target) => self.find_feed_by_url(&target, false).await?,
      None => None,
    };

    let new = match &feed {
      Some(feed) => {
        if !self.subscriptions_for_feeds(user_id, &[feed.id]).await?.is_empty() {
          return Err(Error::DuplicateSubscription { user_id, feed_id: feed.id });
        }
        NewSubscription::bound(user_id, feed.id, url)
      }
      None => NewSubscription::pending(user_id, url),
    };

    match self.insert_one(new).await? {
      Inserted::New(id) => {
        info!(
          user_id,
          subscription_id = id,
          feed_id = feed.as_ref().map(|f| f.id),
          "subscribed"
        );
        self.get_subscription(id, user_id, false).await
      }
      Inserted::Existing { feed_id, .. } => {
        Err(Error::DuplicateSubscription { user_id, feed_id })
      }
    }
  }

  async fn create_by_url_s(
    &self,
    urls: &[String],
    user_id: UserId,
    batch_size: usize,
  ) -> Result<Vec<Subscription>> {
    if urls.is_empty() {
      return Ok(Vec::new());
    }

    // One query each: resolve, load feeds, load what the user already holds.
    let targets = self.find_all_target(urls).await?;
    let target_urls: Vec<String> = targets
      .values()
      .cloned()
      .collect::<HashSet<_>>()
      .into_iter()
      .collect();
    let feeds = self.feeds_by_urls(&target_urls).await?;
    let feed_ids: Vec<FeedId> = feeds.iter().map(|f| f.id).collect();
    let existing = self.subscriptions_for_feeds(user_id, &feed_ids).await?;

    let subscribed: HashSet<FeedId> = existing.iter().filter_map(|s| s.feed_id).collect();
    let feed_by_url: HashMap<String, FeedId> =
      feeds.iter().map(|f| (f.url.clone(), f.id)).collect();
    let plan = plan_subscriptions(user_id, urls, &targets, &feed_by_url, &subscribed);

    let at = now();
    let outcomes = self.insert_planned(plan.clone(), batch_size, at).await?;

    let feeds_by_id: HashMap<FeedId, Feed> = feeds.into_iter().map(|f| (f.id, f)).collect();
    let mut created = 0usize;
    let mut raced: Vec<SubscriptionId> = Vec::new();
    let mut result = existing;

    for (new, outcome) in plan.into_iter().zip(outcomes) {
      match outcome {
        Inserted::New(id) => {
          created += 1;
          result.push(Subscription {
            id,
            user_id,
            feed_id: new.feed_id,
            status: new.status,
            feed: new.feed_id.and_then(|fid| feeds_by_id.get(&fid).cloned()),
            url: new.url,
            title: None,
            story_offset: 0,
            dt_created: at,
            dt_updated: at,
          });
        }
        Inserted::Existing { id, .. } => raced.push(id),
      }
    }

    if !raced.is_empty() {
      warn!(
        user_id,
        count = raced.len(),
        "bulk subscribe lost (user, feed) races; returning the winning rows"
      );
      result.extend(self.list_subscriptions(user_id, Some(&raced), false, true).await?);
    }

    result.sort_by(|a, b| a.url.cmp(&b.url).then(a.id.cmp(&b.id)));
    result.dedup_by_key(|s| s.id);

    info!(
      user_id,
      requested = urls.len(),
      created,
      returned = result.len(),
      "bulk subscribe"
    );
    Ok(result)
  }

  async fn get_subscription(
    &self,
    id: SubscriptionId,
    user_id: UserId,
    detail: bool,
  ) -> Result<Subscription> {
    self
      .load_subscription(id, Some(user_id), detail)
      .await?
      .ok_or(Error::SubscriptionNotFound(id))
  }

  async fn delete_subscription(&self, id: SubscriptionId, user_id: UserId) -> Result<()> {
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM subscriptions WHERE id = ?1 AND user_id = ?2",
          params![id, user_id],
        )?)
      })
      .await?;

    if deleted == 0 {
      return Err(Error::SubscriptionNotFound(id));
    }
    info!(user_id, subscription_id = id, "unsubscribed");
    Ok(())
  }

  async fn query_by_user(
    &self,
    user_id: UserId,
    query: &SubscriptionQuery,
  ) -> Result<SyncResult> {
    let (detail, show_pending) = (query.detail, query.show_pending);

    if query.hints.is_empty() {
      let mut subscriptions =
        self.list_subscriptions(user_id, None, detail, show_pending).await?;
      sort_by_recency(&mut subscriptions);
      return Ok(SyncResult { total: subscriptions.len(), subscriptions });
    }

    // Lightweight full scan: new and deleted rows are only visible against
    // the complete id set.
    let raw: Vec<(SubscriptionId, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, dt_updated FROM subscriptions
           WHERE user_id = ?1 AND (?2 OR status != 'pending')",
        )?;
        let rows = stmt
          .query_map(params![user_id, show_pending], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    let clock = raw
      .into_iter()
      .map(|(id, dt)| Ok((id, decode_dt(&dt)?)))
      .collect::<Result<Vec<_>>>()?;

    let changed = changed_ids(&clock, &query.hints);
    debug!(
      user_id,
      total = clock.len(),
      hints = query.hints.len(),
      changed = changed.len(),
      "differential sync"
    );

    let mut subscriptions = if changed.is_empty() {
      Vec::new()
    } else {
      self
        .list_subscriptions(user_id, Some(&changed), detail, show_pending)
        .await?
    };
    sort_by_recency(&mut subscriptions);

    Ok(SyncResult { total: clock.len(), subscriptions })
  }

  async fn update_story_offset(
    &self,
    id: SubscriptionId,
    user_id: UserId,
    offset: i64,
  ) -> Result<Subscription> {
    for _ in 0..OFFSET_CAS_ATTEMPTS {
      let mut current = self.get_subscription(id, user_id, false).await?;
      let next = next_tick(current.dt_updated);
      let (prev_str, next_str) = (encode_dt(current.dt_updated), encode_dt(next));

      let swapped = self
        .conn
        .call(move |conn| {
          Ok(conn.execute(
            "UPDATE subscriptions SET story_offset = ?1, dt_updated = ?2
             WHERE id = ?3 AND user_id = ?4 AND dt_updated = ?5",
            params![offset, next_str, id, user_id, prev_str],
          )?)
        })
        .await?
        == 1;

      if swapped {
        current.story_offset = offset;
        current.dt_updated = next;
        return Ok(current);
      }
      debug!(subscription_id = id, "subscription clock moved; retrying offset update");
    }
    Err(Error::Contended(id))
  }

  async fn resolve_subscription(
    &self,
    id: SubscriptionId,
    target_url: &str,
  ) -> Result<Subscription> {
    let sub = self
      .load_subscription(id, None, false)
      .await?
      .ok_or(Error::SubscriptionNotFound(id))?;
    if sub.is_bound() {
      return Err(Error::AlreadyBound(id));
    }

    self.record_url_map(&sub.url, target_url).await?;
    let feed = self.get_or_create_feed(target_url).await?;

    let feed_id = feed.id;
    let status = encode_status(feed.status);
    let at = encode_dt(next_tick(sub.dt_updated));

    let bound: Option<bool> = self
      .conn
      .call(move |conn| {
        let updated = conn.execute(
          "UPDATE subscriptions SET feed_id = ?1, status = ?2, dt_updated = ?3
           WHERE id = ?4 AND feed_id IS NULL",
          params![feed_id, status, at, id],
        );
        match updated {
          Ok(n) => Ok(Some(n == 1)),
          Err(e) if is_constraint_violation(&e) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match bound {
      Some(true) => {
        info!(subscription_id = id, feed_id, "resolved pending subscription");
        self.get_subscription(id, sub.user_id, false).await
      }
      Some(false) => Err(Error::AlreadyBound(id)),
      None => Err(Error::DuplicateSubscription { user_id: sub.user_id, feed_id }),
    }
  }
}
