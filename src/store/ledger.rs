//! Failure ledger: source ids whose lookup found nothing, with exponential backoff.
//!
//! A record whose `next_retry` lies in the future means "do not search again".
//! Expired records stay in the table and are updated on the next failure, so
//! the failure count keeps growing across runs until an operator removes it.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::store::{error::StoreError, from_unix, to_unix, Database};

/// Base retry interval in days
pub const BASE_RETRY_DAYS: i64 = 7;

/// Growth stops at 4× the base interval (28 days)
pub const MAX_BACKOFF_MULTIPLIER: i64 = 4;

/// Distinct error strings returned by [`FailureLedger::statistics`]
const MAX_COMMON_ERRORS: usize = 10;

/// Interval before a source id with `failure_count` failures may be searched
/// again: 7, 14, 28, 28, ... days.
pub fn backoff_interval(failure_count: u32) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(8);
    let multiplier = (1i64 << exponent).min(MAX_BACKOFF_MULTIPLIER);
    Duration::days(BASE_RETRY_DAYS * multiplier)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub track_id: String,
    pub insert_time: DateTime<Utc>,
    pub next_retry: DateTime<Utc>,
    pub failure_count: u32,
    pub last_error: Option<String>,
}

impl FailureRecord {
    /// Backoff window still open at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.next_retry > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureStatistics {
    pub total_failures_in_period: usize,
    pub active_failures: usize,
    pub common_errors: Vec<String>,
    pub period_days: u32,
}

pub struct FailureLedger {
    db: Database,
}

impl FailureLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.db.now()
    }

    /// True only while the backoff window for `track_id` is open.
    pub fn has_failure(&self, track_id: &str) -> Result<bool, StoreError> {
        let now = to_unix(self.db.now());
        let conn = self.db.lock()?;
        let next_retry: Option<i64> = conn
            .query_row(
                "SELECT next_retry FROM match_failures WHERE track_id = ?1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(next_retry.is_some_and(|next| next > now))
    }

    /// Record an unresolved lookup. Creates the record on first failure;
    /// afterwards bumps the count and pushes `next_retry` out. The original
    /// `insert_time` is kept.
    pub fn cache_failure(
        &self,
        track_id: &str,
        error: Option<&str>,
    ) -> Result<FailureRecord, StoreError> {
        let now = self.db.now();
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(i64, u32)> = tx
            .query_row(
                "SELECT insert_time, failure_count FROM match_failures WHERE track_id = ?1",
                params![track_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let record = match existing {
            Some((insert_time, failure_count)) => {
                let failure_count = failure_count + 1;
                let next_retry = now + backoff_interval(failure_count);
                tx.execute(
                    "UPDATE match_failures
                     SET next_retry = ?2, failure_count = ?3, last_error = ?4
                     WHERE track_id = ?1",
                    params![track_id, to_unix(next_retry), failure_count, error],
                )?;
                FailureRecord {
                    track_id: track_id.to_string(),
                    insert_time: from_unix(insert_time)?,
                    next_retry: from_unix(to_unix(next_retry))?,
                    failure_count,
                    last_error: error.map(str::to_string),
                }
            }
            None => {
                let next_retry = now + backoff_interval(1);
                tx.execute(
                    "INSERT INTO match_failures (track_id, insert_time, next_retry, failure_count, last_error)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![track_id, to_unix(now), to_unix(next_retry), error],
                )?;
                FailureRecord {
                    track_id: track_id.to_string(),
                    insert_time: from_unix(to_unix(now))?,
                    next_retry: from_unix(to_unix(next_retry))?,
                    failure_count: 1,
                    last_error: error.map(str::to_string),
                }
            }
        };

        tx.commit()?;
        log::debug!(
            "Recorded failure #{} for {} (retry after {})",
            record.failure_count,
            track_id,
            record.next_retry
        );
        Ok(record)
    }

    /// Operator override: forget every failure for `track_id`.
    /// Returns true if a record existed.
    pub fn remove_failure(&self, track_id: &str) -> Result<bool, StoreError> {
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM match_failures WHERE track_id = ?1",
            params![track_id],
        )?;
        Ok(removed > 0)
    }

    pub fn failure_info(&self, track_id: &str) -> Result<Option<FailureRecord>, StoreError> {
        let conn = self.db.lock()?;
        let row: Option<(i64, i64, u32, Option<String>)> = conn
            .query_row(
                "SELECT insert_time, next_retry, failure_count, last_error
                 FROM match_failures WHERE track_id = ?1",
                params![track_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(|(insert_time, next_retry, failure_count, last_error)| {
            Ok(FailureRecord {
                track_id: track_id.to_string(),
                insert_time: from_unix(insert_time)?,
                next_retry: from_unix(next_retry)?,
                failure_count,
                last_error,
            })
        })
        .transpose()
    }

    /// Failure counts over the trailing `days` plus distinct error strings.
    pub fn statistics(&self, days: u32) -> Result<FailureStatistics, StoreError> {
        let now = self.db.now();
        let cutoff = to_unix(now - Duration::days(i64::from(days)));
        let conn = self.db.lock()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM match_failures WHERE insert_time >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM match_failures WHERE next_retry > ?1",
            params![to_unix(now)],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT DISTINCT last_error FROM match_failures
             WHERE last_error IS NOT NULL
             ORDER BY last_error
             LIMIT ?1",
        )?;
        let common_errors = stmt
            .query_map(params![MAX_COMMON_ERRORS as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(FailureStatistics {
            total_failures_in_period: total as usize,
            active_failures: active as usize,
            common_errors,
            period_days: days,
        })
    }
}
