//! Error types for `feedsync-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown feed status: {0:?}")]
  UnknownStatus(String),

  #[error("content codec error: {0}")]
  Compression(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
