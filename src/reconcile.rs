//! Playlist reconciliation: make a target playlist mirror a source playlist.
//!
//! Each playlist runs through a fixed sequence of states:
//!
//! 1. Loading   - find the target playlist by name (create it if missing) and fetch its tracks
//! 2. Seeding   - pair existing target tracks with source tracks locally, no searches
//! 3. Resolving - search the catalog for source tracks still without a correspondence
//! 4. Diffing   - build the desired ordered target id list
//! 5. Applying  - rewrite the playlist, only if the desired list differs
//!
//! A second run over an unchanged playlist issues listing requests only.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::cache::{CacheStats, CorrespondenceCache};
use crate::catalog::{CatalogError, CatalogSession};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::limiter::{self, RateLimit};
use crate::matching::matches;
use crate::models::{
    PlaylistChange, PlaylistOutcome, SourcePlaylist, SourceTrack, TargetId, TargetPlaylist,
    TargetTrack, UnresolvedReason, UnresolvedTrack,
};
use crate::pagination::fetch_all;
use crate::progress::PhaseProgress;
use crate::resolver::{Resolution, Resolver};
use crate::store::ledger::{FailureLedger, FailureStatistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Loading,
    Seeding,
    Resolving,
    Diffing,
    Applying,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Loading => "loading",
            SyncState::Seeding => "seeding",
            SyncState::Resolving => "resolving",
            SyncState::Diffing => "diffing",
            SyncState::Applying => "applying",
            SyncState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything a sync run shares across playlists.
pub struct SyncContext {
    pub cache: CorrespondenceCache,
    pub ledger: FailureLedger,
    pub limiter: Arc<dyn RateLimit>,
    pub config: SyncConfig,
}

/// Cache counters and ledger statistics at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub track_cache: CacheStats,
    pub failure_stats: FailureStatistics,
    pub timestamp: DateTime<Utc>,
}

impl SyncContext {
    pub fn new(config: SyncConfig, ledger: FailureLedger) -> Self {
        Self {
            cache: CorrespondenceCache::new(),
            ledger,
            limiter: limiter::from_config(&config),
            config,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn summary(&self, days: u32) -> Result<CacheSummary, SyncError> {
        Ok(CacheSummary {
            track_cache: self.cache.stats(),
            failure_stats: self.ledger.statistics(days)?,
            timestamp: self.ledger.now(),
        })
    }
}

fn enter(state: SyncState, playlist: &str) {
    log::debug!("[{}] {}", playlist, state);
}

// ============================================================================
// Seeding
// ============================================================================

/// Pair tracks already in the target playlist with source tracks, filling
/// `cache`. Each side is used at most once. Returns the number of pairs.
///
/// Pass 1 walks the target tracks looking for an unused source track; pass 2
/// walks the still-unused source tracks looking for an unused target track.
/// Unavailable target tracks never pair.
pub fn seed_cache(
    sources: &[SourceTrack],
    targets: &[TargetTrack],
    cache: &mut CorrespondenceCache,
) -> usize {
    let mut source_used = vec![false; sources.len()];
    let mut target_used = vec![false; targets.len()];
    let mut seeded = 0;

    let mut pair = |si: usize, ti: usize, source_used: &mut [bool], target_used: &mut [bool]| {
        source_used[si] = true;
        target_used[ti] = true;
        if let Some(id) = sources[si].id.as_deref() {
            cache.insert(id, targets[ti].id.clone());
            seeded += 1;
        }
    };

    for (ti, target) in targets.iter().enumerate() {
        if !target.available {
            continue;
        }
        let hit = sources
            .iter()
            .enumerate()
            .find(|(si, source)| !source_used[*si] && matches(target, source))
            .map(|(si, _)| si);
        if let Some(si) = hit {
            pair(si, ti, &mut source_used, &mut target_used);
        }
    }

    for (si, source) in sources.iter().enumerate() {
        if source_used[si] {
            continue;
        }
        let hit = targets
            .iter()
            .enumerate()
            .find(|(ti, target)| !target_used[*ti] && target.available && matches(target, source))
            .map(|(ti, _)| ti);
        if let Some(ti) = hit {
            pair(si, ti, &mut source_used, &mut target_used);
        }
    }

    seeded
}

// ============================================================================
// Resolving / Diffing
// ============================================================================

/// Source tracks that need a remote search: they have an id, no cache entry
/// and no open backoff window. First occurrence of each id wins.
pub fn pending_tracks<'a>(
    sources: &'a [SourceTrack],
    cache: &CorrespondenceCache,
    ledger: &FailureLedger,
) -> Result<Vec<&'a SourceTrack>, SyncError> {
    let mut seen = FxHashSet::default();
    let mut pending = Vec::new();
    for track in sources {
        let Some(id) = track.id.as_deref() else {
            continue;
        };
        if !seen.insert(id) || cache.contains(id) {
            continue;
        }
        if ledger.has_failure(id)? {
            log::debug!("Skipping '{}': previous failure still in backoff", track.display_name());
            continue;
        }
        pending.push(track);
    }
    Ok(pending)
}

/// Desired ordered target ids plus display names of dropped duplicates.
pub fn desired_track_ids(
    sources: &[SourceTrack],
    cache: &mut CorrespondenceCache,
) -> (Vec<TargetId>, Vec<String>) {
    let mut seen = FxHashSet::default();
    let mut desired = Vec::new();
    let mut duplicates = Vec::new();
    for track in sources {
        let Some(id) = track.id.as_deref() else {
            continue;
        };
        let Some(target) = cache.get(id) else {
            continue;
        };
        if seen.contains(&target) {
            log::info!(
                "Duplicate found: '{}' will be ignored",
                track.display_name()
            );
            duplicates.push(track.display_name());
        } else {
            seen.insert(target.clone());
            desired.push(target);
        }
    }
    (desired, duplicates)
}

// ============================================================================
// Applying
// ============================================================================

fn remove_all(
    session: &dyn CatalogSession,
    playlist: &TargetId,
    count: usize,
    chunk: usize,
) -> Result<(), CatalogError> {
    let progress = PhaseProgress::new("Removing tracks", count);
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(chunk);
        session.remove_range(playlist, 0..n)?;
        remaining -= n;
        progress.inc(n);
    }
    progress.finish();
    Ok(())
}

/// Appends `ids` in chunks; on failure returns how many were added.
fn add_all(
    session: &dyn CatalogSession,
    playlist: &TargetId,
    ids: &[TargetId],
    chunk: usize,
) -> Result<(), (usize, CatalogError)> {
    let progress = PhaseProgress::new("Adding tracks", ids.len());
    let mut added = 0;
    for part in ids.chunks(chunk) {
        session
            .add_tracks(playlist, part)
            .map_err(|e| (added, e))?;
        added += part.len();
        progress.inc(part.len());
    }
    progress.finish();
    Ok(())
}

/// Clear the playlist, then append `desired`. If appending fails, try to put
/// the previous contents back. Unavailable tracks cannot be re-added and are
/// left out of the restore.
fn apply(
    session: &dyn CatalogSession,
    playlist: &TargetPlaylist,
    current: &[TargetTrack],
    desired: &[TargetId],
    chunk: usize,
) -> Result<(), SyncError> {
    let chunk = chunk.max(1);
    remove_all(session, &playlist.id, current.len(), chunk).map_err(|source| {
        SyncError::ApplyFailed {
            playlist: playlist.name.clone(),
            restored: false,
            source,
        }
    })?;

    let Err((added, source)) = add_all(session, &playlist.id, desired, chunk) else {
        return Ok(());
    };

    let restored = !source.is_fatal() && {
        log::warn!(
            "Adding tracks to '{}' failed after {} items, restoring previous contents",
            playlist.name,
            added
        );
        let restorable: Vec<TargetId> = current
            .iter()
            .filter(|t| t.available)
            .map(|t| t.id.clone())
            .collect();
        if restorable.len() < current.len() {
            log::info!(
                "Dropping {} unavailable tracks from '{}' while restoring",
                current.len() - restorable.len(),
                playlist.name
            );
        }
        let restore = remove_all(session, &playlist.id, added, chunk)
            .and_then(|_| add_all(session, &playlist.id, &restorable, chunk).map_err(|(_, e)| e));
        match restore {
            Ok(()) => true,
            Err(e) => {
                log::error!("Restoring '{}' failed: {}", playlist.name, e);
                false
            }
        }
    };
    Err(SyncError::ApplyFailed {
        playlist: playlist.name.clone(),
        restored,
        source,
    })
}

// ============================================================================
// State machine
// ============================================================================

fn find_or_create(
    session: &dyn CatalogSession,
    source: &SourcePlaylist,
    config: &SyncConfig,
) -> Result<(TargetPlaylist, Vec<TargetTrack>, bool), SyncError> {
    let playlists = fetch_all(
        |offset, limit| session.playlists_page(offset, limit),
        |playlist| playlist,
        &config.playlist_fetch(),
    )?;

    match playlists.into_iter().find(|p| p.name == source.name) {
        Some(playlist) => {
            log::info!("Found existing playlist: '{}'", source.name);
            let tracks = fetch_all(
                |offset, limit| session.playlist_tracks_page(&playlist.id, offset, limit),
                |track| track,
                &config.track_fetch(),
            )?;
            Ok((playlist, tracks, false))
        }
        None => {
            log::info!("Creating new playlist: '{}'", source.name);
            let playlist = session.create_playlist(&source.name, source.description.as_deref())?;
            Ok((playlist, Vec::new(), true))
        }
    }
}

/// Why each still-unmatched source track ended up without a correspondence.
fn unresolved_tracks(
    sources: &[SourceTrack],
    cache: &CorrespondenceCache,
    searched: &FxHashMap<&str, &Resolution>,
) -> Vec<UnresolvedTrack> {
    sources
        .iter()
        .filter_map(|track| {
            let reason = match track.id.as_deref() {
                None => UnresolvedReason::MissingId,
                Some(id) if cache.contains(id) => return None,
                Some(id) => match searched.get(id) {
                    Some(Resolution::TransientError(e)) => UnresolvedReason::SearchError(e.to_string()),
                    Some(_) => UnresolvedReason::NoMatch,
                    None => UnresolvedReason::BackoffActive,
                },
            };
            Some(UnresolvedTrack {
                source_id: track.id.clone(),
                display_name: track.display_name(),
                reason,
            })
        })
        .collect()
}

/// Reconcile one playlist. Cache and ledger writes made before an error are kept.
pub fn sync_playlist(
    session: &dyn CatalogSession,
    source: &SourcePlaylist,
    ctx: &mut SyncContext,
) -> Result<PlaylistOutcome, SyncError> {
    let mut outcome = PlaylistOutcome::new(&source.name, source.tracks.len());
    if source.tracks.is_empty() {
        log::info!("Playlist '{}' has no tracks. Skipping.", source.name);
        return Ok(outcome);
    }

    enter(SyncState::Loading, &source.name);
    let (playlist, existing, created) = find_or_create(session, source, &ctx.config)?;
    outcome.target_playlist_id = Some(playlist.id.clone());
    outcome.created = created;

    enter(SyncState::Seeding, &source.name);
    outcome.seeded = seed_cache(&source.tracks, &existing, &mut ctx.cache);

    enter(SyncState::Resolving, &source.name);
    let pending = pending_tracks(&source.tracks, &ctx.cache, &ctx.ledger)?;
    outcome.searched = pending.len();
    if !pending.is_empty() {
        log::info!(
            "Searching for {} tracks for playlist '{}'",
            pending.len(),
            source.name
        );
    }
    let resolver = Resolver::new(session, Arc::clone(&ctx.limiter), ctx.config.search_batch_size)?;
    let resolutions = resolver.resolve_many(&pending, &mut ctx.cache, &ctx.ledger)?;
    let searched: FxHashMap<&str, &Resolution> = pending
        .iter()
        .zip(&resolutions)
        .filter_map(|(track, resolution)| track.id.as_deref().map(|id| (id, resolution)))
        .collect();

    enter(SyncState::Diffing, &source.name);
    let (desired, duplicates) = desired_track_ids(&source.tracks, &mut ctx.cache);
    outcome.duplicates = duplicates;
    outcome.unresolved = unresolved_tracks(&source.tracks, &ctx.cache, &searched);
    outcome.matched = source
        .tracks
        .iter()
        .filter(|t| t.id.as_deref().is_some_and(|id| ctx.cache.contains(id)))
        .count();

    enter(SyncState::Applying, &source.name);
    let current: Vec<TargetId> = existing.iter().map(|t| t.id.clone()).collect();
    if desired == current {
        log::info!("No changes for playlist '{}'", source.name);
        outcome.change = PlaylistChange::Unchanged;
    } else {
        log::info!(
            "Updating playlist '{}' with {} tracks",
            source.name,
            desired.len()
        );
        apply(session, &playlist, &existing, &desired, ctx.config.write_chunk_size)?;
        outcome.change = PlaylistChange::Updated {
            removed: current.len(),
            added: desired.len(),
        };
    }

    enter(SyncState::Done, &source.name);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::{CatalogSnapshot, MemoryCatalog, StoredPlaylist};
    use crate::limiter::Unlimited;
    use crate::store::Database;

    fn source(id: &str, name: &str, artist: &str, duration_ms: i64) -> SourceTrack {
        SourceTrack {
            id: Some(id.to_string()),
            name: name.to_string(),
            artists: vec![artist.to_string()],
            duration_ms,
            isrc: None,
            album: None,
        }
    }

    fn target(id: i64, name: &str, artist: &str, duration: i64) -> TargetTrack {
        TargetTrack {
            id: TargetId::from(id),
            name: name.to_string(),
            artists: vec![artist.to_string()],
            duration,
            isrc: None,
            available: true,
        }
    }

    fn context() -> SyncContext {
        let ledger = FailureLedger::new(Database::open_in_memory().unwrap());
        SyncContext::new(SyncConfig::default(), ledger).with_limiter(Arc::new(Unlimited))
    }

    #[test]
    fn test_seed_pairs_one_to_one() {
        let sources = vec![
            source("a", "Yellow", "Coldplay", 269_000),
            source("b", "Fix You", "Coldplay", 295_000),
        ];
        let targets = vec![
            target(2, "Fix You", "Coldplay", 295),
            target(1, "Yellow", "Coldplay", 269),
        ];
        let mut cache = CorrespondenceCache::new();
        assert_eq!(seed_cache(&sources, &targets, &mut cache), 2);
        assert_eq!(cache.get("a"), Some(TargetId::from(1)));
        assert_eq!(cache.get("b"), Some(TargetId::from(2)));
    }

    #[test]
    fn test_seed_skips_unavailable_targets() {
        let sources = vec![source("a", "Yellow", "Coldplay", 269_000)];
        let mut unavailable = target(1, "Yellow", "Coldplay", 269);
        unavailable.available = false;
        let mut cache = CorrespondenceCache::new();
        assert_eq!(seed_cache(&sources, &[unavailable], &mut cache), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_seed_uses_each_target_once() {
        // Two source entries for the same recording, one copy in the target
        let sources = vec![
            source("a", "Yellow", "Coldplay", 269_000),
            source("b", "Yellow", "Coldplay", 269_000),
        ];
        let targets = vec![target(1, "Yellow", "Coldplay", 269)];
        let mut cache = CorrespondenceCache::new();
        assert_eq!(seed_cache(&sources, &targets, &mut cache), 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_pending_dedupes_and_skips_known() {
        let ledger = FailureLedger::new(Database::open_in_memory().unwrap());
        ledger.cache_failure("held", None).unwrap();
        let mut cache = CorrespondenceCache::new();
        cache.insert("known", TargetId::from(1));

        let mut anonymous = source("x", "Local File", "Me", 1000);
        anonymous.id = None;
        let sources = vec![
            source("new", "A", "X", 1000),
            source("known", "B", "X", 1000),
            source("held", "C", "X", 1000),
            anonymous,
            source("new", "A", "X", 1000),
        ];
        let pending = pending_tracks(&sources, &cache, &ledger).unwrap();
        let ids: Vec<&str> = pending.iter().filter_map(|t| t.id.as_deref()).collect();
        assert_eq!(ids, vec!["new"]);
    }

    #[test]
    fn test_desired_ids_drop_duplicates() {
        let mut cache = CorrespondenceCache::new();
        cache.insert("a", TargetId::from(1));
        cache.insert("b", TargetId::from(1));
        cache.insert("c", TargetId::from(2));
        let sources = vec![
            source("a", "Song", "X", 1000),
            source("missing", "Other", "X", 1000),
            source("b", "Song (Remastered)", "X", 1000),
            source("c", "Third", "X", 1000),
        ];
        let (desired, duplicates) = desired_track_ids(&sources, &mut cache);
        assert_eq!(desired, vec![TargetId::from(1), TargetId::from(2)]);
        assert_eq!(duplicates, vec!["X - Song (Remastered)".to_string()]);
    }

    #[test]
    fn test_empty_source_playlist_is_skipped() {
        let catalog = MemoryCatalog::new(CatalogSnapshot::default());
        let playlist = SourcePlaylist {
            id: None,
            name: "Empty".to_string(),
            description: None,
            tracks: Vec::new(),
        };
        let outcome = sync_playlist(&catalog, &playlist, &mut context()).unwrap();
        assert_eq!(outcome.change, PlaylistChange::Skipped);
        assert_eq!(catalog.calls(), Default::default());
    }

    fn mix_catalog() -> MemoryCatalog {
        MemoryCatalog::new(CatalogSnapshot {
            tracks: vec![
                target(1, "Yellow", "Coldplay", 269),
                target(2, "Fix You", "Coldplay", 295),
            ],
            playlists: vec![StoredPlaylist {
                id: TargetId::from("pl"),
                name: "Mix".to_string(),
                description: None,
                tracks: vec![TargetId::from(1)],
            }],
            ..Default::default()
        })
    }

    fn mix_header() -> TargetPlaylist {
        TargetPlaylist {
            id: TargetId::from("pl"),
            name: "Mix".to_string(),
            description: None,
            num_tracks: 1,
        }
    }

    #[test]
    fn test_failed_add_restores_previous_contents() {
        let catalog = mix_catalog();
        catalog.fail_next_adds(1);
        let err = apply(
            &catalog,
            &mix_header(),
            &[target(1, "Yellow", "Coldplay", 269)],
            &[TargetId::from(2), TargetId::from(1)],
            20,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::ApplyFailed { restored: true, .. }));
        assert_eq!(catalog.playlist_tracks("Mix").unwrap(), vec![TargetId::from(1)]);
    }

    #[test]
    fn test_restore_skips_unavailable_tracks() {
        let mut gone = target(3, "Clocks", "Coldplay", 307);
        gone.available = false;
        let catalog = MemoryCatalog::new(CatalogSnapshot {
            tracks: vec![
                target(1, "Yellow", "Coldplay", 269),
                target(2, "Fix You", "Coldplay", 295),
                gone.clone(),
            ],
            playlists: vec![StoredPlaylist {
                id: TargetId::from("pl"),
                name: "Mix".to_string(),
                description: None,
                tracks: vec![TargetId::from(1), TargetId::from(3)],
            }],
            ..Default::default()
        });
        catalog.fail_next_adds(1);

        let current = [target(1, "Yellow", "Coldplay", 269), gone];
        let err = apply(&catalog, &mix_header(), &current, &[TargetId::from(2)], 20).unwrap_err();
        assert!(matches!(err, SyncError::ApplyFailed { restored: true, .. }));
        assert_eq!(catalog.playlist_tracks("Mix").unwrap(), vec![TargetId::from(1)]);
    }

    #[test]
    fn test_failed_restore_is_reported() {
        let catalog = mix_catalog();
        catalog.fail_next_adds(2);
        let err = apply(
            &catalog,
            &mix_header(),
            &[target(1, "Yellow", "Coldplay", 269)],
            &[TargetId::from(2)],
            20,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::ApplyFailed { restored: false, .. }));
        assert!(!err.is_fatal());
        assert!(catalog.playlist_tracks("Mix").unwrap().is_empty());

        // Next run rewrites the playlist in source order
        let playlist = SourcePlaylist {
            id: None,
            name: "Mix".to_string(),
            description: None,
            tracks: vec![
                source("b", "Fix You", "Coldplay", 295_000),
                source("a", "Yellow", "Coldplay", 269_000),
            ],
        };
        let outcome = sync_playlist(&catalog, &playlist, &mut context()).unwrap();
        assert_eq!(
            outcome.change,
            PlaylistChange::Updated {
                removed: 0,
                added: 2
            }
        );
        assert_eq!(
            catalog.playlist_tracks("Mix").unwrap(),
            vec![TargetId::from(2), TargetId::from(1)]
        );
        assert_eq!(outcome.searched, 2);
    }
}
