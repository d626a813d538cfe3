use rusqlite::Connection;

pub mod tables {
    pub const MATCH_FAILURES: &str = "match_failures";
    pub const TRANSFER_REPORTS: &str = "transfer_reports";
    pub const TRANSFER_STATS: &str = "transfer_stats";

    pub const ALL_TABLES: &[&str] = &[MATCH_FAILURES, TRANSFER_REPORTS, TRANSFER_STATS];
}

pub use tables::*;

// Timestamps are seconds since the unix epoch (UTC).
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS match_failures (
    track_id TEXT PRIMARY KEY,
    insert_time INTEGER NOT NULL,
    next_retry INTEGER NOT NULL,
    failure_count INTEGER NOT NULL DEFAULT 1,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_match_failures_next_retry ON match_failures (next_retry);

CREATE TABLE IF NOT EXISTS transfer_reports (
    transfer_id TEXT PRIMARY KEY,
    platform TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    total_songs INTEGER NOT NULL DEFAULT 0,
    total_albums INTEGER NOT NULL DEFAULT 0,
    total_playlists INTEGER NOT NULL DEFAULT 0,
    failed_songs TEXT NOT NULL DEFAULT '[]',
    failed_albums TEXT NOT NULL DEFAULT '[]',
    failed_playlists TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'running'
);

CREATE TABLE IF NOT EXISTS transfer_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    date INTEGER NOT NULL,
    tracks_attempted INTEGER NOT NULL DEFAULT 0,
    tracks_successful INTEGER NOT NULL DEFAULT 0,
    albums_attempted INTEGER NOT NULL DEFAULT 0,
    albums_successful INTEGER NOT NULL DEFAULT 0,
    playlists_attempted INTEGER NOT NULL DEFAULT 0,
    playlists_successful INTEGER NOT NULL DEFAULT 0
);
"#;

pub fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}
