//! SQL schema for the feedsync SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 strings, so text order is time order.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS feeds (
    id              INTEGER PRIMARY KEY,
    url             TEXT NOT NULL UNIQUE,
    status          TEXT NOT NULL DEFAULT 'pending',
    title           TEXT,
    link            TEXT,
    author          TEXT,
    icon            TEXT,
    description     TEXT,
    version         TEXT,            -- feed format, e.g. 'rss20'
    dt_created      TEXT NOT NULL,
    dt_updated      TEXT NOT NULL,   -- last descriptive content change
    dt_checked      TEXT,            -- last crawl attempt
    dt_synced       TEXT,            -- last successful crawl
    encoding        TEXT,
    etag            TEXT,
    last_modified   TEXT,
    content_length  INTEGER,
    content_hash    BLOB,            -- SHA-256 of the raw payload
    total_storys    INTEGER NOT NULL DEFAULT 0
);

-- One row per fetch attempt. Append-only.
CREATE TABLE IF NOT EXISTS raw_feeds (
    id              INTEGER PRIMARY KEY,
    feed_id         INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,
    encoding        TEXT,
    status_code     INTEGER,
    etag            TEXT,
    last_modified   TEXT,
    headers         TEXT NOT NULL DEFAULT '{}',
    is_gzipped      INTEGER NOT NULL DEFAULT 0,
    content         BLOB,
    content_length  INTEGER,
    content_hash    BLOB,
    dt_created      TEXT NOT NULL
);

-- AUTOINCREMENT: ids of deleted subscriptions are never handed out again,
-- so a stale client hint can never alias a new row.
CREATE TABLE IF NOT EXISTS subscriptions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL,
    feed_id         INTEGER REFERENCES feeds(id) ON DELETE CASCADE,
    status          TEXT NOT NULL DEFAULT 'pending',
    url             TEXT NOT NULL,   -- as entered by the user
    title           TEXT,
    story_offset    INTEGER NOT NULL DEFAULT 0,
    dt_created      TEXT NOT NULL,
    dt_updated      TEXT NOT NULL,
    UNIQUE (user_id, feed_id)        -- NULL feed_id never conflicts
);

-- Resolution history. Append-only; latest row per source wins.
CREATE TABLE IF NOT EXISTS feed_url_maps (
    id              INTEGER PRIMARY KEY,
    source          TEXT NOT NULL,
    target          TEXT NOT NULL,
    dt_created      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS raw_feeds_feed_idx     ON raw_feeds(feed_id, status_code, dt_created);
CREATE INDEX IF NOT EXISTS raw_feeds_url_idx      ON raw_feeds(url, status_code, dt_created);
CREATE INDEX IF NOT EXISTS subscriptions_user_idx ON subscriptions(user_id, dt_updated);
CREATE INDEX IF NOT EXISTS subscriptions_feed_idx ON subscriptions(feed_id);
CREATE INDEX IF NOT EXISTS feed_url_maps_src_idx  ON feed_url_maps(source, dt_created);

PRAGMA user_version = 1;
";
