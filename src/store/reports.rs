//! Per-run transfer reports and aggregated success statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::store::{error::StoreError, from_unix, to_unix, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Running,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Running => "running",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "running" => Ok(TransferStatus::Running),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Playlist name → display names of tracks that stayed unresolved
pub type FailedPlaylists = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReport {
    pub transfer_id: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_songs: usize,
    pub total_albums: usize,
    pub total_playlists: usize,
    pub failed_songs: Vec<String>,
    pub failed_albums: Vec<String>,
    pub failed_playlists: FailedPlaylists,
    pub status: TransferStatus,
}

impl TransferReport {
    pub fn total_failures(&self) -> usize {
        self.failed_songs.len()
            + self.failed_albums.len()
            + self.failed_playlists.values().map(Vec::len).sum::<usize>()
    }
}

/// Item totals a report is created with.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferTotals {
    pub songs: usize,
    pub albums: usize,
    pub playlists: usize,
}

/// One row of attempted/successful counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransferCounts {
    pub tracks_attempted: usize,
    pub tracks_successful: usize,
    pub albums_attempted: usize,
    pub albums_successful: usize,
    pub playlists_attempted: usize,
    pub playlists_successful: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessRates {
    /// Platform filter, or "all"
    pub platform: String,
    pub period_days: u32,
    pub tracks_success_rate: f64,
    pub albums_success_rate: f64,
    pub playlists_success_rate: f64,
    pub totals: TransferCounts,
}

fn rate(successful: usize, attempted: usize) -> f64 {
    100.0 * successful as f64 / attempted.max(1) as f64
}

pub struct ReportStore {
    db: Database,
}

impl ReportStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        transfer_id: &str,
        platform: &str,
        totals: TransferTotals,
    ) -> Result<(), StoreError> {
        let now = to_unix(self.db.now());
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO transfer_reports
                (transfer_id, platform, created_at, total_songs, total_albums, total_playlists, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                transfer_id,
                platform,
                now,
                totals.songs as i64,
                totals.albums as i64,
                totals.playlists as i64,
                TransferStatus::Running.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Overwrite whichever failure lists are given; `None` leaves a column as is.
    pub fn update_failures(
        &self,
        transfer_id: &str,
        failed_songs: Option<&[String]>,
        failed_albums: Option<&[String]>,
        failed_playlists: Option<&FailedPlaylists>,
    ) -> Result<(), StoreError> {
        let songs = failed_songs.map(serde_json::to_string).transpose()?;
        let albums = failed_albums.map(serde_json::to_string).transpose()?;
        let playlists = failed_playlists.map(serde_json::to_string).transpose()?;
        if songs.is_none() && albums.is_none() && playlists.is_none() {
            return Ok(());
        }

        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE transfer_reports SET
                failed_songs = COALESCE(?2, failed_songs),
                failed_albums = COALESCE(?3, failed_albums),
                failed_playlists = COALESCE(?4, failed_playlists)
             WHERE transfer_id = ?1",
            params![transfer_id, songs, albums, playlists],
        )?;
        Ok(())
    }

    pub fn complete(&self, transfer_id: &str, status: TransferStatus) -> Result<(), StoreError> {
        let now = to_unix(self.db.now());
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE transfer_reports SET completed_at = ?2, status = ?3 WHERE transfer_id = ?1",
            params![transfer_id, now, status.as_str()],
        )?;
        Ok(())
    }

    pub fn get(&self, transfer_id: &str) -> Result<Option<TransferReport>, StoreError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                "SELECT transfer_id, platform, created_at, completed_at, total_songs, total_albums,
                        total_playlists, failed_songs, failed_albums, failed_playlists, status
                 FROM transfer_reports WHERE transfer_id = ?1",
                params![transfer_id],
                RawReport::from_row,
            )
            .optional()?;
        raw.map(RawReport::decode).transpose()
    }

    /// Delete reports created more than `days` ago. Returns the number removed.
    pub fn cleanup_old_reports(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = to_unix(self.db.now() - Duration::days(i64::from(days)));
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM transfer_reports WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    pub fn record_stats(&self, platform: &str, counts: TransferCounts) -> Result<(), StoreError> {
        let now = to_unix(self.db.now());
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO transfer_stats
                (platform, date, tracks_attempted, tracks_successful, albums_attempted,
                 albums_successful, playlists_attempted, playlists_successful)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                platform,
                now,
                counts.tracks_attempted as i64,
                counts.tracks_successful as i64,
                counts.albums_attempted as i64,
                counts.albums_successful as i64,
                counts.playlists_attempted as i64,
                counts.playlists_successful as i64,
            ],
        )?;
        Ok(())
    }

    /// Aggregate success rates over the trailing `days`. `None` when no runs
    /// were recorded in the window.
    pub fn success_rates(
        &self,
        platform: Option<&str>,
        days: u32,
    ) -> Result<Option<SuccessRates>, StoreError> {
        let cutoff = to_unix(self.db.now() - Duration::days(i64::from(days)));
        let conn = self.db.lock()?;
        let (rows, totals): (i64, [i64; 6]) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(tracks_attempted), 0), COALESCE(SUM(tracks_successful), 0),
                    COALESCE(SUM(albums_attempted), 0), COALESCE(SUM(albums_successful), 0),
                    COALESCE(SUM(playlists_attempted), 0), COALESCE(SUM(playlists_successful), 0)
             FROM transfer_stats
             WHERE date >= ?1 AND (?2 IS NULL OR platform = ?2)",
            params![cutoff, platform],
            |row| {
                Ok((
                    row.get(0)?,
                    [
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ],
                ))
            },
        )?;
        if rows == 0 {
            return Ok(None);
        }

        let totals = TransferCounts {
            tracks_attempted: totals[0] as usize,
            tracks_successful: totals[1] as usize,
            albums_attempted: totals[2] as usize,
            albums_successful: totals[3] as usize,
            playlists_attempted: totals[4] as usize,
            playlists_successful: totals[5] as usize,
        };
        Ok(Some(SuccessRates {
            platform: platform.unwrap_or("all").to_string(),
            period_days: days,
            tracks_success_rate: rate(totals.tracks_successful, totals.tracks_attempted),
            albums_success_rate: rate(totals.albums_successful, totals.albums_attempted),
            playlists_success_rate: rate(totals.playlists_successful, totals.playlists_attempted),
            totals,
        }))
    }
}

/// Column values before JSON and timestamp decoding.
struct RawReport {
    transfer_id: String,
    platform: String,
    created_at: i64,
    completed_at: Option<i64>,
    totals: [i64; 3],
    failed_songs: String,
    failed_albums: String,
    failed_playlists: String,
    status: String,
}

impl RawReport {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transfer_id: row.get(0)?,
            platform: row.get(1)?,
            created_at: row.get(2)?,
            completed_at: row.get(3)?,
            totals: [row.get(4)?, row.get(5)?, row.get(6)?],
            failed_songs: row.get(7)?,
            failed_albums: row.get(8)?,
            failed_playlists: row.get(9)?,
            status: row.get(10)?,
        })
    }

    fn decode(self) -> Result<TransferReport, StoreError> {
        Ok(TransferReport {
            transfer_id: self.transfer_id,
            platform: self.platform,
            created_at: from_unix(self.created_at)?,
            completed_at: self.completed_at.map(from_unix).transpose()?,
            total_songs: self.totals[0] as usize,
            total_albums: self.totals[1] as usize,
            total_playlists: self.totals[2] as usize,
            failed_songs: serde_json::from_str(&self.failed_songs)?,
            failed_albums: serde_json::from_str(&self.failed_albums)?,
            failed_playlists: serde_json::from_str(&self.failed_playlists)?,
            status: TransferStatus::parse(&self.status)?,
        })
    }
}
