//! Reading operator input: URL lists and sync hints.

use std::{io::Read as _, path::Path};

use anyhow::Context as _;
use feedsync_core::subscription::Hint;

/// Read a whole file, or stdin when `path` is `-`.
pub fn read_source(path: &Path) -> anyhow::Result<String> {
  if path == Path::new("-") {
    let mut buf = String::new();
    std::io::stdin()
      .read_to_string(&mut buf)
      .context("reading stdin")?;
    return Ok(buf);
  }
  std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// One URL per line; blank lines and `#` comments are skipped.
pub fn parse_url_list(text: &str) -> Vec<String> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && !line.starts_with('#'))
    .map(str::to_owned)
    .collect()
}

/// A JSON array of `{ "id": .., "dt_updated": .. }` objects.
pub fn parse_hints(text: &str) -> anyhow::Result<Vec<Hint>> {
  serde_json::from_str(text).context("parsing hints")
}
