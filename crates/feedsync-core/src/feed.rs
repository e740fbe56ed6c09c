//! Canonical feeds, raw fetch snapshots, and URL resolution mappings.
//!
//! A [`Feed`] is shared by every subscription that resolves to it and is
//! keyed by its unique `url`. Its crawl state and descriptive fields are
//! written by the crawler; this crate only defines the shapes and the legal
//! status transitions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  content::{Fingerprint, StoredContent, hash_base64},
};

pub type FeedId = i64;

// ─── Status ──────────────────────────────────────────────────────────────────

/// Crawl state of a feed (and of a subscription bound to one).
///
/// ```text
/// pending ──► updating ──► ready
///                ▲   └───► error
///                └── ready | error  (scheduled re-check)
/// ```
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeedStatus {
  #[default]
  Pending,
  Updating,
  Ready,
  Error,
}

impl FeedStatus {
  /// The states a feed may move into `self` from.
  pub fn predecessors(self) -> &'static [FeedStatus] {
    match self {
      Self::Pending => &[],
      Self::Updating => &[Self::Pending, Self::Ready, Self::Error],
      Self::Ready | Self::Error => &[Self::Updating],
    }
  }

  pub fn can_transition_to(self, next: FeedStatus) -> bool {
    next.predecessors().contains(&self)
  }

  /// Parse the lowercase column representation.
  pub fn from_column(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownStatus(s.to_owned()))
  }
}

// ─── Feed ────────────────────────────────────────────────────────────────────

/// Heavyweight crawl and fingerprint fields, only loaded on request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDetail {
  pub total_storys:   i64,
  pub encoding:       Option<String>,
  pub etag:           Option<String>,
  pub last_modified:  Option<String>,
  pub content_length: Option<i64>,
  #[serde(rename = "content_hash_base64", with = "hash_base64", default)]
  pub content_hash:   Option<Vec<u8>>,
  /// Last crawl attempt.
  pub dt_checked:     Option<DateTime<Utc>>,
  /// Last successful crawl.
  pub dt_synced:      Option<DateTime<Utc>>,
}

impl FeedDetail {
  pub fn fingerprint(&self) -> Fingerprint {
    Fingerprint {
      content_length: self.content_length,
      content_hash:   self.content_hash.clone(),
      etag:           self.etag.clone(),
      last_modified:  self.last_modified.clone(),
    }
  }
}

/// The canonical, deduplicated representation of a feed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
  pub id:          FeedId,
  pub url:         String,
  pub status:      FeedStatus,
  pub title:       Option<String>,
  pub link:        Option<String>,
  pub author:      Option<String>,
  pub icon:        Option<String>,
  pub description: Option<String>,
  /// Feed format, e.g. "rss20" or "atom10".
  pub version:     Option<String>,
  pub dt_created:  DateTime<Utc>,
  /// Last time the descriptive content changed.
  pub dt_updated:  DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail:      Option<FeedDetail>,
}

impl Feed {
  pub fn is_ready(&self) -> bool { self.status == FeedStatus::Ready }
}

/// What a successful crawl hands back: the parsed descriptive fields plus
/// the fingerprint of the payload they came from.
#[derive(Debug, Clone, Default)]
pub struct FeedContent {
  pub title:        Option<String>,
  pub link:         Option<String>,
  pub author:       Option<String>,
  pub icon:         Option<String>,
  pub description:  Option<String>,
  pub version:      Option<String>,
  pub encoding:     Option<String>,
  pub total_storys: i64,
  pub fingerprint:  Fingerprint,
}

// ─── Raw snapshots ───────────────────────────────────────────────────────────

/// One fetch attempt, as recorded by the crawler. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFeed {
  pub id:             i64,
  pub feed_id:        FeedId,
  pub url:            String,
  pub encoding:       Option<String>,
  pub status_code:    Option<i32>,
  pub etag:           Option<String>,
  pub last_modified:  Option<String>,
  pub headers:        BTreeMap<String, String>,
  #[serde(skip)]
  pub content:        Option<StoredContent>,
  pub content_length: Option<i64>,
  #[serde(rename = "content_hash_base64", with = "hash_base64", default)]
  pub content_hash:   Option<Vec<u8>>,
  pub dt_created:     DateTime<Utc>,
}

impl RawFeed {
  pub fn is_gzipped(&self) -> bool {
    self.content.as_ref().is_some_and(|c| c.is_gzipped)
  }

  /// The payload, decompressed according to the stored flag unless
  /// `decompress` says otherwise. Absent content stays absent.
  pub fn get_content(&self, decompress: Option<bool>) -> Result<Option<Vec<u8>>> {
    self
      .content
      .as_ref()
      .map(|c| c.get_content(decompress))
      .transpose()
  }

  pub fn fingerprint(&self) -> Fingerprint {
    Fingerprint {
      content_length: self.content_length,
      content_hash:   self.content_hash.clone(),
      etag:           self.etag.clone(),
      last_modified:  self.last_modified.clone(),
    }
  }
}

/// Input to [`crate::store::FeedStore::record_raw_feed`]. `content` is the
/// raw response body; the store encodes it and derives length and hash.
#[derive(Debug, Clone, Default)]
pub struct NewRawFeed {
  pub feed_id:       FeedId,
  pub url:           String,
  pub encoding:      Option<String>,
  pub status_code:   Option<i32>,
  pub etag:          Option<String>,
  pub last_modified: Option<String>,
  pub headers:       BTreeMap<String, String>,
  pub content:       Option<Vec<u8>>,
}

impl NewRawFeed {
  pub fn new(feed_id: FeedId, url: impl Into<String>) -> Self {
    Self { feed_id, url: url.into(), ..Default::default() }
  }
}

// ─── URL resolution ──────────────────────────────────────────────────────────

/// A recorded `source → target` resolution. Rows are append-only; the most
/// recent row for a source (by `dt_created`, then `id`) is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedUrlMap {
  pub id:         i64,
  pub source:     String,
  pub target:     String,
  pub dt_created: DateTime<Utc>,
}
