//! One transfer run: favorites, albums and every playlist of a library export,
//! tracked under a single transfer id in the report store.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::catalog::CatalogSession;
use crate::error::SyncError;
use crate::library::{add_albums, like_tracks, LibraryOutcome};
use crate::models::{LibraryExport, PlaylistChange, PlaylistOutcome};
use crate::progress::format_duration;
use crate::reconcile::{sync_playlist, SyncContext};
use crate::store::reports::{
    FailedPlaylists, ReportStore, TransferCounts, TransferStatus, TransferTotals,
};

/// Snapshot handed to the progress callback after every step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub status: TransferStatus,
    pub current_step: String,
    pub progress_percent: u8,
    pub completed_playlists: usize,
    pub total_playlists: usize,
    pub current_playlist: Option<String>,
}

/// A playlist that could not be reconciled at all.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistFailure {
    pub playlist_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferSummary {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub liked: LibraryOutcome,
    pub albums: LibraryOutcome,
    pub playlists: Vec<PlaylistOutcome>,
    pub playlist_failures: Vec<PlaylistFailure>,
    pub elapsed: Duration,
}

impl TransferSummary {
    pub fn counts(&self) -> TransferCounts {
        let synced = self
            .playlists
            .iter()
            .filter(|p| p.change != PlaylistChange::Skipped);
        let (tracks_attempted, tracks_successful) =
            synced.fold((0, 0), |(a, s), p| (a + p.total_tracks, s + p.matched));
        TransferCounts {
            tracks_attempted: tracks_attempted + self.liked.attempted,
            tracks_successful: tracks_successful + self.liked.succeeded,
            albums_attempted: self.albums.attempted,
            albums_successful: self.albums.succeeded,
            playlists_attempted: self.playlists.len() + self.playlist_failures.len(),
            playlists_successful: self.playlists.len(),
        }
    }

    pub fn print(&self) {
        println!("\n{:=<60}", "");
        println!("Transfer {} {}", self.transfer_id, self.status.as_str());
        if self.liked.attempted > 0 {
            println!("  {}", self.liked.message("liked", "songs"));
        }
        if self.albums.attempted > 0 {
            println!("  {}", self.albums.message("added", "albums"));
        }
        for outcome in &self.playlists {
            let change = match &outcome.change {
                PlaylistChange::Skipped => "skipped".to_string(),
                PlaylistChange::Unchanged => "unchanged".to_string(),
                PlaylistChange::Updated { removed, added } => {
                    format!("updated (-{} +{})", removed, added)
                }
            };
            println!(
                "  {}: {}/{} matched ({:.1}%), {}",
                outcome.playlist_name,
                outcome.matched,
                outcome.total_tracks,
                outcome.match_rate(),
                change
            );
            for track in &outcome.unresolved {
                println!("    - {} ({})", track.display_name, track.reason);
            }
        }
        for failure in &self.playlist_failures {
            println!("  {}: FAILED {}", failure.playlist_name, failure.error);
        }
        println!("  Elapsed: {}", format_duration(self.elapsed));
        println!("{:=<60}", "");
    }
}

fn percent(done: usize, total: usize) -> u8 {
    (100 * done / total.max(1)).min(100) as u8
}

/// Run a full transfer. Playlist-level errors are recorded and the run moves
/// on; a fatal (authorization) error marks the report failed and is returned.
pub fn transfer_library(
    session: &dyn CatalogSession,
    export: &LibraryExport,
    ctx: &mut SyncContext,
    reports: &ReportStore,
    on_progress: &mut dyn FnMut(&TransferProgress),
) -> Result<TransferSummary, SyncError> {
    let start = Instant::now();
    let transfer_id = uuid::Uuid::new_v4().to_string();
    let platform = ctx.config.platform.clone();
    let total_playlists = export.playlists.len();
    reports.create(
        &transfer_id,
        &platform,
        TransferTotals {
            songs: export.total_songs(),
            albums: export.albums.len(),
            playlists: total_playlists,
        },
    )?;
    log::info!("Starting transfer {}", transfer_id);

    let mut summary = TransferSummary {
        transfer_id: transfer_id.clone(),
        status: TransferStatus::Running,
        liked: LibraryOutcome::default(),
        albums: LibraryOutcome::default(),
        playlists: Vec::new(),
        playlist_failures: Vec::new(),
        elapsed: Duration::ZERO,
    };
    let mut report_progress = |step: String, done: usize, current: Option<&str>, status| {
        on_progress(&TransferProgress {
            status,
            current_step: step,
            progress_percent: percent(done, total_playlists),
            completed_playlists: done,
            total_playlists,
            current_playlist: current.map(str::to_string),
        })
    };
    report_progress("Starting transfer".to_string(), 0, None, TransferStatus::Running);

    let result = (|| -> Result<(), SyncError> {
        if !export.tracks.is_empty() {
            summary.liked = like_tracks(session, &export.tracks, ctx)?;
        }
        if !export.albums.is_empty() {
            summary.albums = add_albums(session, &export.albums, ctx)?;
        }

        for (i, playlist) in export.playlists.iter().enumerate() {
            log::info!(
                "Processing playlist {}/{}: {} ({} tracks)",
                i + 1,
                total_playlists,
                playlist.name,
                playlist.tracks.len()
            );
            report_progress(
                format!("Processing playlist: {}", playlist.name),
                i,
                Some(playlist.name.as_str()),
                TransferStatus::Running,
            );
            match sync_playlist(session, playlist, ctx) {
                Ok(outcome) => summary.playlists.push(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::error!("Playlist '{}' failed: {}", playlist.name, e);
                    summary.playlist_failures.push(PlaylistFailure {
                        playlist_name: playlist.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    })();

    let mut failed_playlists = FailedPlaylists::new();
    for outcome in &summary.playlists {
        if !outcome.unresolved.is_empty() {
            failed_playlists.insert(
                outcome.playlist_name.clone(),
                outcome.unresolved.iter().map(|t| t.display_name.clone()).collect(),
            );
        }
    }
    for failure in &summary.playlist_failures {
        failed_playlists.insert(failure.playlist_name.clone(), vec![failure.error.clone()]);
    }
    reports.update_failures(
        &transfer_id,
        Some(summary.liked.failed.as_slice()),
        Some(summary.albums.failed.as_slice()),
        Some(&failed_playlists),
    )?;

    summary.status = match &result {
        Ok(()) => TransferStatus::Completed,
        Err(_) => TransferStatus::Failed,
    };
    reports.complete(&transfer_id, summary.status)?;
    reports.record_stats(&platform, summary.counts())?;
    summary.elapsed = start.elapsed();

    match result {
        Ok(()) => {
            report_progress(
                "All playlists transferred".to_string(),
                total_playlists,
                None,
                TransferStatus::Completed,
            );
            log::info!("Transfer {} completed", transfer_id);
            Ok(summary)
        }
        Err(e) => {
            report_progress(
                format!("Transfer failed: {}", e),
                summary.playlists.len() + summary.playlist_failures.len(),
                None,
                TransferStatus::Failed,
            );
            log::error!("Transfer {} failed: {}", transfer_id, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }
}
