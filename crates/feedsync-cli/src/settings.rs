//! Store configuration: an optional TOML file under `FEEDSYNC_*` overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

/// Chunk size for bulk subscription inserts.
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
}

fn default_store_path() -> PathBuf { PathBuf::from("feedsync.db") }

fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }

impl StoreConfig {
  /// Layer `path` (if it exists) under the environment, then expand `~`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("FEEDSYNC").try_parsing(true))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut cfg: StoreConfig = settings
      .try_deserialize()
      .context("failed to deserialise StoreConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
