//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with exactly six fractional
//! digits, so comparing the text compares the instants. Header maps and id
//! lists travel as compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use feedsync_core::{
  content::StoredContent,
  feed::{Feed, FeedDetail, FeedStatus, FeedUrlMap, RawFeed},
  subscription::Subscription,
};
use rusqlite::{Row, types::Type};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

/// Read a timestamp column inside a row closure.
pub fn read_dt(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let s: String = row.get(idx)?;
  DateTime::parse_from_rfc3339(&s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// The current time at storage precision.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// A timestamp strictly after `prev`: now, unless the clock has not moved
/// past `prev` yet.
pub fn next_tick(prev: DateTime<Utc>) -> DateTime<Utc> { advance(prev, now()) }

/// `at` if it is after `prev`, else one tick past `prev`.
pub fn advance(prev: DateTime<Utc>, at: DateTime<Utc>) -> DateTime<Utc> {
  if at > prev { at } else { prev + Duration::microseconds(1) }
}

// ─── Status ──────────────────────────────────────────────────────────────────

pub fn encode_status(status: FeedStatus) -> &'static str { status.into() }

pub fn decode_status(s: &str) -> Result<FeedStatus> {
  Ok(FeedStatus::from_column(s)?)
}

// ─── JSON parameters ─────────────────────────────────────────────────────────

/// Encode a list for use with `json_each(?)`.
pub fn encode_list<T: serde::Serialize>(items: &[T]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn encode_headers(headers: &BTreeMap<String, String>) -> Result<String> {
  Ok(serde_json::to_string(headers)?)
}

pub fn decode_headers(s: &str) -> Result<BTreeMap<String, String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Feeds ───────────────────────────────────────────────────────────────────

const FEED_BASE_COLUMNS: &str = "f.id, f.url, f.status, f.title, f.link, f.author, f.icon,
   f.description, f.version, f.dt_created, f.dt_updated";

const FEED_DETAIL_COLUMNS: &str = "f.total_storys, f.encoding, f.etag, f.last_modified,
   f.content_length, f.content_hash, f.dt_checked, f.dt_synced";

const FEED_BASE_WIDTH: usize = 11;

/// Column list for a `feeds f` row; detail columns are only projected when
/// asked for.
pub fn feed_columns(detail: bool) -> String {
  if detail {
    format!("{FEED_BASE_COLUMNS}, {FEED_DETAIL_COLUMNS}")
  } else {
    FEED_BASE_COLUMNS.to_owned()
  }
}

/// Raw values read from a `feeds` row.
pub struct FeedRow {
  pub id:          i64,
  pub url:         String,
  pub status:      String,
  pub title:       Option<String>,
  pub link:        Option<String>,
  pub author:      Option<String>,
  pub icon:        Option<String>,
  pub description: Option<String>,
  pub version:     Option<String>,
  pub dt_created:  String,
  pub dt_updated:  String,
  pub detail:      Option<FeedDetailRow>,
}

pub struct FeedDetailRow {
  pub total_storys:   i64,
  pub encoding:       Option<String>,
  pub etag:           Option<String>,
  pub last_modified:  Option<String>,
  pub content_length: Option<i64>,
  pub content_hash:   Option<Vec<u8>>,
  pub dt_checked:     Option<String>,
  pub dt_synced:      Option<String>,
}

impl FeedRow {
  /// Read a row projected with [`feed_columns`] starting at column `at`.
  pub fn read(row: &Row<'_>, at: usize, detail: bool) -> rusqlite::Result<Self> {
    let detail = if detail {
      let d = at + FEED_BASE_WIDTH;
      Some(FeedDetailRow {
        total_storys:   row.get(d)?,
        encoding:       row.get(d + 1)?,
        etag:           row.get(d + 2)?,
        last_modified:  row.get(d + 3)?,
        content_length: row.get(d + 4)?,
        content_hash:   row.get(d + 5)?,
        dt_checked:     row.get(d + 6)?,
        dt_synced:      row.get(d + 7)?,
      })
    } else {
      None
    };

    Ok(Self {
      id: row.get(at)?,
      url: row.get(at + 1)?,
      status: row.get(at + 2)?,
      title: row.get(at + 3)?,
      link: row.get(at + 4)?,
      author: row.get(at + 5)?,
      icon: row.get(at + 6)?,
      description: row.get(at + 7)?,
      version: row.get(at + 8)?,
      dt_created: row.get(at + 9)?,
      dt_updated: row.get(at + 10)?,
      detail,
    })
  }

  /// Like [`FeedRow::read`], for the nullable side of a LEFT JOIN.
  pub fn read_joined(
    row: &Row<'_>,
    at: usize,
    detail: bool,
  ) -> rusqlite::Result<Option<Self>> {
    let id: Option<i64> = row.get(at)?;
    id.map(|_| Self::read(row, at, detail)).transpose()
  }

  pub fn into_feed(self) -> Result<Feed> {
    let detail = self
      .detail
      .map(|d| -> Result<FeedDetail> {
        Ok(FeedDetail {
          total_storys:   d.total_storys,
          encoding:       d.encoding,
          etag:           d.etag,
          last_modified:  d.last_modified,
          content_length: d.content_length,
          content_hash:   d.content_hash,
          dt_checked:     decode_opt_dt(d.dt_checked)?,
          dt_synced:      decode_opt_dt(d.dt_synced)?,
        })
      })
      .transpose()?;

    Ok(Feed {
      id: self.id,
      url: self.url,
      status: decode_status(&self.status)?,
      title: self.title,
      link: self.link,
      author: self.author,
      icon: self.icon,
      description: self.description,
      version: self.version,
      dt_created: decode_dt(&self.dt_created)?,
      dt_updated: decode_dt(&self.dt_updated)?,
      detail,
    })
  }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

pub const SUBSCRIPTION_COLUMNS: &str = "s.id, s.user_id, s.feed_id, s.status, s.url, s.title,
   s.story_offset, s.dt_created, s.dt_updated";

const SUBSCRIPTION_WIDTH: usize = 9;

/// `SELECT` prefix for subscriptions with their feed LEFT JOINed.
pub fn subscription_select(detail: bool) -> String {
  format!(
    "SELECT {SUBSCRIPTION_COLUMNS}, {}
     FROM subscriptions s
     LEFT JOIN feeds f ON f.id = s.feed_id",
    feed_columns(detail)
  )
}

/// Raw values read from a `subscriptions` row joined with its feed.
pub struct SubscriptionRow {
  pub id:           i64,
  pub user_id:      i64,
  pub feed_id:      Option<i64>,
  pub status:       String,
  pub url:          String,
  pub title:        Option<String>,
  pub story_offset: i64,
  pub dt_created:   String,
  pub dt_updated:   String,
  pub feed:         Option<FeedRow>,
}

impl SubscriptionRow {
  /// Read a row produced by [`subscription_select`].
  pub fn read(row: &Row<'_>, detail: bool) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      user_id:      row.get(1)?,
      feed_id:      row.get(2)?,
      status:       row.get(3)?,
      url:          row.get(4)?,
      title:        row.get(5)?,
      story_offset: row.get(6)?,
      dt_created:   row.get(7)?,
      dt_updated:   row.get(8)?,
      feed:         FeedRow::read_joined(row, SUBSCRIPTION_WIDTH, detail)?,
    })
  }

  pub fn into_subscription(self) -> Result<Subscription> {
    Ok(Subscription {
      id:           self.id,
      user_id:      self.user_id,
      feed_id:      self.feed_id,
      status:       decode_status(&self.status)?,
      url:          self.url,
      title:        self.title,
      story_offset: self.story_offset,
      dt_created:   decode_dt(&self.dt_created)?,
      dt_updated:   decode_dt(&self.dt_updated)?,
      feed:         self.feed.map(FeedRow::into_feed).transpose()?,
    })
  }
}

// ─── URL maps ────────────────────────────────────────────────────────────────

pub struct UrlMapRow {
  pub id:         i64,
  pub source:     String,
  pub target:     String,
  pub dt_created: String,
}

impl UrlMapRow {
  pub fn into_url_map(self) -> Result<FeedUrlMap> {
    Ok(FeedUrlMap {
      id:         self.id,
      source:     self.source,
      target:     self.target,
      dt_created: decode_dt(&self.dt_created)?,
    })
  }
}

// ─── Raw feeds ───────────────────────────────────────────────────────────────

pub const RAW_FEED_COLUMNS: &str = "id, feed_id, url, encoding, status_code, etag, last_modified,
   headers, is_gzipped, content, content_length, content_hash, dt_created";

/// Raw values read from a `raw_feeds` row.
pub struct RawFeedRow {
  pub id:             i64,
  pub feed_id:        i64,
  pub url:            String,
  pub encoding:       Option<String>,
  pub status_code:    Option<i32>,
  pub etag:           Option<String>,
  pub last_modified:  Option<String>,
  pub headers:        String,
  pub is_gzipped:     bool,
  pub content:        Option<Vec<u8>>,
  pub content_length: Option<i64>,
  pub content_hash:   Option<Vec<u8>>,
  pub dt_created:     String,
}

impl RawFeedRow {
  /// Read a row projected with [`RAW_FEED_COLUMNS`].
  pub fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      feed_id:        row.get(1)?,
      url:            row.get(2)?,
      encoding:       row.get(3)?,
      status_code:    row.get(4)?,
      etag:           row.get(5)?,
      last_modified:  row.get(6)?,
      headers:        row.get(7)?,
      is_gzipped:     row.get(8)?,
      content:        row.get(9)?,
      content_length: row.get(10)?,
      content_hash:   row.get(11)?,
      dt_created:     row.get(12)?,
    })
  }

  pub fn into_raw_feed(self) -> Result<RawFeed> {
    let is_gzipped = self.is_gzipped;
    Ok(RawFeed {
      id:             self.id,
      feed_id:        self.feed_id,
      url:            self.url,
      encoding:       self.encoding,
      status_code:    self.status_code,
      etag:           self.etag,
      last_modified:  self.last_modified,
      headers:        decode_headers(&self.headers)?,
      content:        self
        .content
        .map(|bytes| StoredContent { bytes, is_gzipped }),
      content_length: self.content_length,
      content_hash:   self.content_hash,
      dt_created:     decode_dt(&self.dt_created)?,
    })
  }
}
