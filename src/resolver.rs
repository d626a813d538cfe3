//! Batched, rate-limited resolution of source tracks against the target catalog.
//!
//! Tracks are searched in fixed-size batches. Inside a batch every track gets
//! its own search on a rayon pool sized to the batch; between batches the rate
//! limiter pauses. Outcomes are written to the cache and the failure ledger on
//! the calling thread, in input order, once the batch has finished.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cache::CorrespondenceCache;
use crate::catalog::{CatalogError, CatalogSession, SearchKind};
use crate::error::SyncError;
use crate::limiter::{RateLimit, Unlimited};
use crate::matching::first_match;
use crate::models::{SourceTrack, TargetId, TargetTrack};
use crate::normalize::build_query;
use crate::progress::PhaseProgress;
use crate::store::ledger::FailureLedger;

/// Ledger message for a lookup that found nothing
pub const NO_MATCH_ERROR: &str = "no match found";

/// Outcome of looking up one source track.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched(TargetTrack),
    /// Every artist was searched and no candidate matched
    Unmatched,
    /// A search failed for a non-fatal reason; nothing is recorded
    TransientError(CatalogError),
}

impl Resolution {
    pub fn target(&self) -> Option<&TargetTrack> {
        match self {
            Resolution::Matched(track) => Some(track),
            _ => None,
        }
    }

    pub fn into_target(self) -> Option<TargetTrack> {
        match self {
            Resolution::Matched(track) => Some(track),
            _ => None,
        }
    }
}

/// Search for `source` once per credited artist, stopping at the first match.
///
/// Only authorization failures are returned as `Err`; other search errors
/// move on to the next artist and surface as [`Resolution::TransientError`]
/// if nothing matched.
pub fn search_track(
    session: &dyn CatalogSession,
    limiter: &dyn RateLimit,
    source: &SourceTrack,
) -> Result<Resolution, CatalogError> {
    if source.id.is_none() {
        return Ok(Resolution::Unmatched);
    }

    let mut last_error = None;
    for artist in &source.artists {
        let query = build_query(&source.name, artist);
        limiter.acquire();
        match session.search(&query, SearchKind::Tracks) {
            Ok(results) => {
                if let Some(found) = first_match(&results.tracks, source) {
                    log::debug!(
                        "Found match for '{}': '{}' ({})",
                        source.name,
                        found.name,
                        found.id
                    );
                    return Ok(Resolution::Matched(found.clone()));
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Search '{}' failed: {}", query, e);
                last_error = Some(e);
            }
        }
    }

    Ok(match last_error {
        Some(e) => Resolution::TransientError(e),
        None => Resolution::Unmatched,
    })
}

/// One-off lookup without batching or rate limiting.
pub fn resolve_single(
    source: &SourceTrack,
    session: &dyn CatalogSession,
) -> Result<Option<TargetId>, SyncError> {
    let resolution = search_track(session, &Unlimited, source)?;
    Ok(resolution.into_target().map(|track| track.id))
}

pub struct Resolver<'a> {
    session: &'a dyn CatalogSession,
    limiter: Arc<dyn RateLimit>,
    batch_size: usize,
    pool: ThreadPool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        session: &'a dyn CatalogSession,
        limiter: Arc<dyn RateLimit>,
        batch_size: usize,
    ) -> Result<Self, SyncError> {
        let batch_size = batch_size.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(batch_size)
            .thread_name(|i| format!("search-{}", i))
            .build()?;
        Ok(Self {
            session,
            limiter,
            batch_size,
            pool,
        })
    }

    pub fn search_one(&self, source: &SourceTrack) -> Result<Resolution, CatalogError> {
        search_track(self.session, self.limiter.as_ref(), source)
    }

    /// Resolve `tracks`, returning one [`Resolution`] per input in input order.
    ///
    /// Every match is inserted into `cache`; every exhausted search is recorded
    /// in `ledger`. If a search hits an authorization failure, the rest of its
    /// batch is still recorded, then the error is returned and no further
    /// batches run.
    pub fn resolve_many(
        &self,
        tracks: &[&SourceTrack],
        cache: &mut CorrespondenceCache,
        ledger: &FailureLedger,
    ) -> Result<Vec<Resolution>, SyncError> {
        let mut resolutions = Vec::with_capacity(tracks.len());
        if tracks.is_empty() {
            return Ok(resolutions);
        }

        let progress = PhaseProgress::new("Searching", tracks.len());
        for (batch_idx, batch) in tracks.chunks(self.batch_size).enumerate() {
            if batch_idx > 0 {
                self.limiter.pause_between_batches();
            }

            let outcomes: Vec<Result<Resolution, CatalogError>> = self
                .pool
                .install(|| batch.par_iter().map(|track| self.search_one(track)).collect());

            let mut fatal = None;
            for (track, outcome) in batch.iter().zip(outcomes) {
                let resolution = match outcome {
                    Ok(resolution) => resolution,
                    Err(e) => {
                        let resolution = Resolution::TransientError(e.clone());
                        fatal.get_or_insert(e);
                        resolution
                    }
                };
                self.record(track, &resolution, cache, ledger)?;
                resolutions.push(resolution);
            }
            progress.inc(batch.len());

            if let Some(e) = fatal {
                progress.finish();
                return Err(e.into());
            }
        }
        progress.finish();

        Ok(resolutions)
    }

    fn record(
        &self,
        track: &SourceTrack,
        resolution: &Resolution,
        cache: &mut CorrespondenceCache,
        ledger: &FailureLedger,
    ) -> Result<(), SyncError> {
        let Some(source_id) = track.id.as_deref() else {
            return Ok(());
        };
        match resolution {
            Resolution::Matched(target) => cache.insert(source_id, target.id.clone()),
            Resolution::Unmatched => {
                log::info!("Could not find match for: {}", track.display_name());
                ledger.cache_failure(source_id, Some(NO_MATCH_ERROR))?;
            }
            Resolution::TransientError(e) => {
                log::warn!("Lookup for '{}' failed, will retry next run: {}", track.display_name(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::{CatalogSnapshot, MemoryCatalog};
    use crate::store::Database;

    fn source(id: &str, name: &str, artists: &[&str], duration_ms: i64) -> SourceTrack {
        SourceTrack {
            id: Some(id.to_string()),
            name: name.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            duration_ms,
            isrc: None,
            album: None,
        }
    }

    fn target(id: i64, name: &str, artists: &[&str], duration: i64) -> TargetTrack {
        TargetTrack {
            id: TargetId::from(id),
            name: name.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            duration,
            isrc: None,
            available: true,
        }
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(CatalogSnapshot {
            tracks: vec![
                target(1, "Under Pressure", &["Queen", "David Bowie"], 248),
                target(2, "Yellow", &["Coldplay"], 269),
                target(3, "Fix You", &["Coldplay"], 295),
            ],
            ..Default::default()
        })
    }

    fn ledger() -> FailureLedger {
        FailureLedger::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_search_tries_each_artist_in_turn() {
        let catalog = catalog();
        // First artist finds nothing, second one does
        let track = source("sp1", "Under Pressure", &["Nobody", "Queen"], 248_000);
        let resolution = search_track(&catalog, &Unlimited, &track).unwrap();
        assert_eq!(resolution.target().unwrap().id, TargetId::from(1));
        assert_eq!(catalog.calls().searches, 2);
    }

    #[test]
    fn test_transient_error_moves_to_next_artist() {
        let catalog = catalog();
        catalog.fail_query("Yellow Chris Martin");
        let track = source("sp1", "Yellow", &["Chris Martin", "Coldplay"], 269_000);
        let resolution = search_track(&catalog, &Unlimited, &track).unwrap();
        assert_eq!(resolution.target().unwrap().id, TargetId::from(2));

        let track = source("sp2", "Yellow", &["Chris Martin"], 269_000);
        assert!(matches!(
            search_track(&catalog, &Unlimited, &track).unwrap(),
            Resolution::TransientError(_)
        ));
    }

    #[test]
    fn test_resolve_many_preserves_order_and_records() {
        let catalog = catalog();
        let resolver = Resolver::new(&catalog, Arc::new(Unlimited), 2).unwrap();
        let tracks = [
            source("a", "Fix You", &["Coldplay"], 295_000),
            source("b", "Nothing Like This", &["Nobody"], 100_000),
            source("c", "Yellow", &["Coldplay"], 269_000),
        ];
        let refs: Vec<&SourceTrack> = tracks.iter().collect();
        let mut cache = CorrespondenceCache::new();
        let ledger = ledger();

        let resolutions = resolver.resolve_many(&refs, &mut cache, &ledger).unwrap();
        let ids: Vec<Option<TargetId>> = resolutions
            .into_iter()
            .map(|r| r.into_target().map(|t| t.id))
            .collect();
        assert_eq!(ids, vec![Some(TargetId::from(3)), None, Some(TargetId::from(2))]);

        assert_eq!(cache.len(), 2);
        assert!(ledger.has_failure("b").unwrap());
        assert!(!ledger.has_failure("a").unwrap());
    }

    #[test]
    fn test_transient_errors_are_not_recorded() {
        let catalog = catalog();
        catalog.fail_query("Yellow Coldplay");
        let resolver = Resolver::new(&catalog, Arc::new(Unlimited), 3).unwrap();
        let track = source("c", "Yellow", &["Coldplay"], 269_000);
        let mut cache = CorrespondenceCache::new();
        let ledger = ledger();

        let resolutions = resolver.resolve_many(&[&track], &mut cache, &ledger).unwrap();
        assert!(matches!(resolutions[0], Resolution::TransientError(_)));
        assert!(cache.is_empty());
        assert!(ledger.failure_info("c").unwrap().is_none());
    }

    #[test]
    fn test_unauthorized_stops_after_current_batch() {
        let catalog = catalog();
        catalog.revoke_session();
        let resolver = Resolver::new(&catalog, Arc::new(Unlimited), 2).unwrap();
        let tracks = [
            source("a", "Fix You", &["Coldplay"], 295_000),
            source("b", "Yellow", &["Coldplay"], 269_000),
            source("c", "Under Pressure", &["Queen"], 248_000),
        ];
        let refs: Vec<&SourceTrack> = tracks.iter().collect();
        let mut cache = CorrespondenceCache::new();

        let err = resolver
            .resolve_many(&refs, &mut cache, &ledger())
            .unwrap_err();
        assert!(err.is_fatal());
        // Second batch never ran
        assert_eq!(catalog.calls().searches, 2);
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum LimitEvent {
        Acquire,
        Pause,
    }

    #[derive(Default)]
    struct RecordingLimit {
        events: std::sync::Mutex<Vec<LimitEvent>>,
    }

    impl RateLimit for RecordingLimit {
        fn acquire(&self) {
            self.events.lock().unwrap().push(LimitEvent::Acquire);
        }

        fn pause_between_batches(&self) {
            self.events.lock().unwrap().push(LimitEvent::Pause);
        }
    }

    #[test]
    fn test_pauses_only_between_batches() {
        let catalog = catalog();
        let limit = Arc::new(RecordingLimit::default());
        let resolver = Resolver::new(&catalog, limit.clone(), 3).unwrap();
        let tracks: Vec<SourceTrack> = (0..7)
            .map(|i| source(&format!("t{i}"), &format!("Song {i}"), &["Nobody"], 100_000))
            .collect();
        let refs: Vec<&SourceTrack> = tracks.iter().collect();

        resolver
            .resolve_many(&refs, &mut CorrespondenceCache::new(), &ledger())
            .unwrap();

        // Acquires per batch, split at each pause: 3 | 3 | 1
        let events = limit.events.lock().unwrap().clone();
        let batches: Vec<usize> = events
            .split(|e| *e == LimitEvent::Pause)
            .map(|run| run.len())
            .collect();
        assert_eq!(batches, vec![3, 3, 1]);
        assert_eq!(events.first(), Some(&LimitEvent::Acquire));
    }

    #[test]
    fn test_resolve_single() {
        let catalog = catalog();
        let track = source("a", "Fix You (Live)", &["Coldplay"], 296_000);
        assert_eq!(
            resolve_single(&track, &catalog).unwrap(),
            Some(TargetId::from(3))
        );

        let mut anonymous = track.clone();
        anonymous.id = None;
        assert_eq!(resolve_single(&anonymous, &catalog).unwrap(), None);
        assert_eq!(catalog.calls().searches, 1);
    }
}
