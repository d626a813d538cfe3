//! Favorites flows: like individual tracks and add whole albums.

use serde::Serialize;

use crate::catalog::{CatalogSession, SearchKind};
use crate::error::SyncError;
use crate::models::{SourceAlbum, SourceTrack, TargetId};
use crate::progress::PhaseProgress;
use crate::reconcile::SyncContext;
use crate::resolver::{search_track, Resolution};

/// Per-item results of a favorites flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    /// One human-readable line per item that was not added
    pub failed: Vec<String>,
}

impl LibraryOutcome {
    pub fn message(&self, verb: &str, noun: &str) -> String {
        format!("Successfully {} {}/{} {}.", verb, self.succeeded, self.attempted, noun)
    }
}

/// Album search query: album name plus the first credited artist.
pub fn album_query(album: &SourceAlbum) -> String {
    match album.artists.first() {
        Some(artist) => format!("{} {}", album.name, artist),
        None => album.name.clone(),
    }
}

/// Look up each track (cache first, then a search) and add it to favorites.
/// Matches are cached for later playlists in the same run.
pub fn like_tracks(
    session: &dyn CatalogSession,
    tracks: &[SourceTrack],
    ctx: &mut SyncContext,
) -> Result<LibraryOutcome, SyncError> {
    let mut outcome = LibraryOutcome {
        attempted: tracks.len(),
        ..Default::default()
    };
    log::info!("Starting to like {} songs", tracks.len());
    let progress = PhaseProgress::new("Liking songs", tracks.len());

    for track in tracks {
        progress.inc(1);
        let cached = track.id.as_deref().and_then(|id| ctx.cache.get(id));
        let target: Option<TargetId> = match cached {
            Some(id) => Some(id),
            None => match search_track(session, ctx.limiter.as_ref(), track)? {
                Resolution::Matched(found) => {
                    if let Some(id) = track.id.as_deref() {
                        ctx.cache.insert(id, found.id.clone());
                    }
                    Some(found.id)
                }
                Resolution::Unmatched => None,
                Resolution::TransientError(e) => {
                    outcome
                        .failed
                        .push(format!("Failed to like '{}': {}", track.name, e));
                    continue;
                }
            },
        };

        let Some(target) = target else {
            log::info!("Not found: {}", track.display_name());
            outcome.failed.push(format!("Not found: {}", track.name));
            continue;
        };
        match session.add_favorite_track(&target) {
            Ok(()) => {
                outcome.succeeded += 1;
                log::debug!("Liked: {}", track.display_name());
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => outcome
                .failed
                .push(format!("Failed to like '{}': {}", track.name, e)),
        }
    }
    progress.finish();

    log::info!("{}", outcome.message("liked", "songs"));
    Ok(outcome)
}

/// Search each album by name and first artist and add the first result.
pub fn add_albums(
    session: &dyn CatalogSession,
    albums: &[SourceAlbum],
    ctx: &SyncContext,
) -> Result<LibraryOutcome, SyncError> {
    let mut outcome = LibraryOutcome {
        attempted: albums.len(),
        ..Default::default()
    };
    log::info!("Starting to add {} albums", albums.len());

    for (i, album) in albums.iter().enumerate() {
        ctx.limiter.acquire();
        let result = session
            .search(&album_query(album), SearchKind::Albums)
            .and_then(|results| match results.albums.into_iter().next() {
                Some(found) => session.add_favorite_album(&found.id).map(|()| true),
                None => Ok(false),
            });
        match result {
            Ok(true) => {
                outcome.succeeded += 1;
                log::info!("Added ({}/{}): {}", i + 1, albums.len(), album.name);
            }
            Ok(false) => {
                log::info!("Not found: {}", album.name);
                outcome.failed.push(format!("Not found: {}", album.name));
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                log::warn!("Failed to add '{}': {}", album.name, e);
                outcome
                    .failed
                    .push(format!("Failed to add '{}': {}", album.name, e));
            }
        }
    }

    log::info!("{}", outcome.message("added", "albums"));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::{CatalogSnapshot, MemoryCatalog};
    use crate::config::SyncConfig;
    use crate::limiter::Unlimited;
    use crate::models::{TargetAlbum, TargetTrack};
    use crate::store::{ledger::FailureLedger, Database};
    use std::sync::Arc;

    fn context() -> SyncContext {
        let ledger = FailureLedger::new(Database::open_in_memory().unwrap());
        SyncContext::new(SyncConfig::default(), ledger).with_limiter(Arc::new(Unlimited))
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(CatalogSnapshot {
            tracks: vec![TargetTrack {
                id: TargetId::from(10),
                name: "Hurt".to_string(),
                artists: vec!["Johnny Cash".to_string()],
                duration: 218,
                isrc: None,
                available: true,
            }],
            albums: vec![
                TargetAlbum {
                    id: TargetId::from(100),
                    name: "American IV: The Man Comes Around".to_string(),
                    artists: vec!["Johnny Cash".to_string()],
                },
                TargetAlbum {
                    id: TargetId::from(101),
                    name: "American IV: The Man Comes Around (Deluxe)".to_string(),
                    artists: vec!["Johnny Cash".to_string()],
                },
            ],
            ..Default::default()
        })
    }

    fn track(id: &str, name: &str) -> SourceTrack {
        SourceTrack {
            id: Some(id.to_string()),
            name: name.to_string(),
            artists: vec!["Johnny Cash".to_string()],
            duration_ms: 218_000,
            isrc: None,
            album: None,
        }
    }

    #[test]
    fn test_like_tracks_uses_cache_then_search() {
        let catalog = catalog();
        let mut ctx = context();
        let tracks = vec![track("sp1", "Hurt"), track("sp2", "Unknown Song")];

        let outcome = like_tracks(&catalog, &tracks, &mut ctx).unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, vec!["Not found: Unknown Song".to_string()]);
        assert_eq!(ctx.cache.get("sp1"), Some(TargetId::from(10)));
        assert_eq!(catalog.snapshot().unwrap().favorite_tracks, vec![TargetId::from(10)]);

        // Cached now, so no new search for sp1
        let searches = catalog.calls().searches;
        like_tracks(&catalog, &tracks[..1], &mut ctx).unwrap();
        assert_eq!(catalog.calls().searches, searches);
    }

    #[test]
    fn test_add_albums_takes_first_result() {
        let catalog = catalog();
        let ctx = context();
        let albums = vec![
            SourceAlbum {
                id: None,
                name: "American IV".to_string(),
                artists: vec!["Johnny Cash".to_string(), "Rick Rubin".to_string()],
            },
            SourceAlbum {
                id: None,
                name: "Missing Album".to_string(),
                artists: Vec::new(),
            },
        ];
        assert_eq!(album_query(&albums[0]), "American IV Johnny Cash");

        let outcome = add_albums(&catalog, &albums, &ctx).unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, vec!["Not found: Missing Album".to_string()]);
        assert_eq!(catalog.snapshot().unwrap().favorite_albums, vec![TargetId::from(100)]);
        assert_eq!(outcome.message("added", "albums"), "Successfully added 1/2 albums.");
    }

    #[test]
    fn test_revoked_session_stops_flow() {
        let catalog = catalog();
        catalog.revoke_session();
        let err = like_tracks(&catalog, &[track("sp1", "Hurt")], &mut context()).unwrap_err();
        assert!(err.is_fatal());
    }
}
