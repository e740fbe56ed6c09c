//! Raw payload storage: compression policy and content fingerprints.
//!
//! Payloads of at least [`COMPRESS_THRESHOLD`] bytes are gzip-compressed at
//! the highest level before they are written; anything smaller is stored
//! verbatim. The `is_gzipped` flag travels with the bytes so reads can undo
//! the encoding transparently.

use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

/// Payloads shorter than this are stored uncompressed.
pub const COMPRESS_THRESHOLD: usize = 1024;

// ─── StoredContent ───────────────────────────────────────────────────────────

/// A payload in its at-rest form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
  pub bytes:      Vec<u8>,
  pub is_gzipped: bool,
}

impl StoredContent {
  /// Encode `raw` for storage, compressing only when it is large enough to
  /// benefit.
  pub fn set_content(raw: &[u8]) -> Result<Self> {
    if raw.len() < COMPRESS_THRESHOLD {
      return Ok(Self { bytes: raw.to_vec(), is_gzipped: false });
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(raw)?;
    Ok(Self { bytes: encoder.finish()?, is_gzipped: true })
  }

  /// Return the payload bytes.
  ///
  /// `decompress: None` follows the stored flag. `Some(false)` hands back
  /// the at-rest bytes untouched; `Some(true)` forces a gzip decode.
  pub fn get_content(&self, decompress: Option<bool>) -> Result<Vec<u8>> {
    let decompress = decompress.unwrap_or(self.is_gzipped);
    if self.bytes.is_empty() || !decompress {
      return Ok(self.bytes.clone());
    }
    let mut out = Vec::new();
    GzDecoder::new(self.bytes.as_slice()).read_to_end(&mut out)?;
    Ok(out)
  }
}

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// SHA-256 digest of a raw (uncompressed) payload.
pub fn content_hash(raw: &[u8]) -> Vec<u8> { Sha256::digest(raw).to_vec() }

/// Everything known about a payload without holding the payload itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub content_length: Option<i64>,
  #[serde(rename = "content_hash_base64", with = "hash_base64", default)]
  pub content_hash:   Option<Vec<u8>>,
  pub etag:           Option<String>,
  pub last_modified:  Option<String>,
}

impl Fingerprint {
  /// Fingerprint of a raw payload, without HTTP validators.
  pub fn of_content(raw: &[u8]) -> Self {
    Self {
      content_length: Some(raw.len() as i64),
      content_hash:   Some(content_hash(raw)),
      etag:           None,
      last_modified:  None,
    }
  }

  pub fn with_validators(
    mut self,
    etag: Option<String>,
    last_modified: Option<String>,
  ) -> Self {
    self.etag = etag;
    self.last_modified = last_modified;
    self
  }

  /// Whether `other` describes the same payload as `self`.
  ///
  /// Hashes decide when both sides carry one. Otherwise a matching ETag, or
  /// else a matching Last-Modified, is taken as equality. Two fingerprints
  /// with nothing in common never match.
  pub fn matches(&self, other: &Self) -> bool {
    if let (Some(a), Some(b)) = (&self.content_hash, &other.content_hash) {
      return a == b && self.content_length == other.content_length;
    }
    if let (Some(a), Some(b)) = (&self.etag, &other.etag) {
      return a == b;
    }
    if let (Some(a), Some(b)) = (&self.last_modified, &other.last_modified) {
      return a == b;
    }
    false
  }
}

/// Serde adapter rendering an optional digest as standard base64.
pub mod hash_base64 {
  use base64::{Engine as _, engine::general_purpose::STANDARD};
  use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(
    hash: &Option<Vec<u8>>,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    match hash {
      Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Option<Vec<u8>>, D::Error> {
    Option::<String>::deserialize(deserializer)?
      .map(|s| STANDARD.decode(s).map_err(D::Error::custom))
      .transpose()
  }
}
