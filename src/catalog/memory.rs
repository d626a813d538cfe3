//! In-memory target catalog backed by a JSON snapshot.
//!
//! Used for offline runs from the CLI and as the catalog in tests. Every call
//! is counted, and individual queries, pages or writes can be made to fail.

use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use super::{CatalogError, CatalogSession, Page, SearchKind, SearchResults};
use crate::models::{TargetAlbum, TargetId, TargetPlaylist, TargetTrack};

/// Playlist as stored in the snapshot: header plus ordered member ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlaylist {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tracks: Vec<TargetId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub tracks: Vec<TargetTrack>,
    #[serde(default)]
    pub albums: Vec<TargetAlbum>,
    #[serde(default)]
    pub playlists: Vec<StoredPlaylist>,
    #[serde(default)]
    pub favorite_tracks: Vec<TargetId>,
    #[serde(default)]
    pub favorite_albums: Vec<TargetId>,
}

/// Point-in-time copy of the call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub searches: usize,
    pub pages: usize,
    pub creates: usize,
    pub adds: usize,
    pub removes: usize,
    pub favorites: usize,
}

impl CallCounts {
    /// Calls that modify the catalog
    pub fn writes(&self) -> usize {
        self.creates + self.adds + self.removes + self.favorites
    }
}

#[derive(Default)]
struct Counters {
    searches: AtomicUsize,
    pages: AtomicUsize,
    creates: AtomicUsize,
    adds: AtomicUsize,
    removes: AtomicUsize,
    favorites: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    queries: FxHashSet<String>,
    track_page_offsets: FxHashSet<usize>,
    unauthorized: bool,
    /// Number of upcoming `add_tracks` calls that fail
    failing_adds: usize,
}

pub struct MemoryCatalog {
    state: Mutex<CatalogSnapshot>,
    faults: Mutex<Faults>,
    counters: Counters,
    /// Server-side cap on page size; requests above it get a smaller page
    max_page_size: Option<usize>,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn poisoned() -> CatalogError {
    CatalogError::Transient("catalog state poisoned".to_string())
}

/// Every whitespace-separated query token occurs in `haystack`.
fn tokens_match(query: &[String], haystack: &str) -> bool {
    query.iter().all(|token| haystack.contains(token.as_str()))
}

fn haystack(name: &str, artists: &[String]) -> String {
    format!("{} {}", name, artists.join(" ")).to_lowercase()
}

impl MemoryCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            faults: Mutex::new(Faults::default()),
            counters: Counters::default(),
            max_page_size: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog snapshot {}", path.display()))?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse catalog snapshot {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        let raw = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write catalog snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = Some(max);
        self
    }

    pub fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        Ok(self.state()?.clone())
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            searches: c.searches.load(Ordering::Relaxed),
            pages: c.pages.load(Ordering::Relaxed),
            creates: c.creates.load(Ordering::Relaxed),
            adds: c.adds.load(Ordering::Relaxed),
            removes: c.removes.load(Ordering::Relaxed),
            favorites: c.favorites.load(Ordering::Relaxed),
        }
    }

    /// Ordered member ids of the first playlist called `name`.
    pub fn playlist_tracks(&self, name: &str) -> Option<Vec<TargetId>> {
        let state = self.state.lock().ok()?;
        state
            .playlists
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.tracks.clone())
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    /// Searches for exactly `query` fail with a transient error.
    pub fn fail_query(&self, query: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.queries.insert(query.to_string());
        }
    }

    /// Playlist-track pages starting at `offset` fail with a transient error.
    pub fn fail_track_page(&self, offset: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.track_page_offsets.insert(offset);
        }
    }

    /// Every later call fails with [`CatalogError::Unauthorized`].
    pub fn revoke_session(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.unauthorized = true;
        }
    }

    /// The next `count` calls to `add_tracks` fail with a transient error.
    pub fn fail_next_adds(&self, count: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_adds = count;
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn state(&self) -> Result<MutexGuard<'_, CatalogSnapshot>, CatalogError> {
        self.state.lock().map_err(|_| poisoned())
    }

    fn check_session(&self) -> Result<(), CatalogError> {
        let faults = self.faults.lock().map_err(|_| poisoned())?;
        if faults.unauthorized {
            return Err(CatalogError::Unauthorized("session revoked".to_string()));
        }
        Ok(())
    }

    fn page_of<T: Clone>(&self, all: &[T], offset: usize, limit: usize) -> Result<Page<T>, CatalogError> {
        let limit = self.max_page_size.map_or(limit, |max| limit.min(max));
        if limit == 0 {
            return Err(CatalogError::Protocol("page limit must be positive".to_string()));
        }
        let items = all.iter().skip(offset).take(limit).cloned().collect();
        Ok(Page {
            limit,
            total_number_of_items: all.len(),
            items,
        })
    }

    fn track_by_id<'a>(
        tracks: &'a [TargetTrack],
        id: &TargetId,
    ) -> Result<&'a TargetTrack, CatalogError> {
        tracks
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| CatalogError::NotFound(format!("track {id}")))
    }
}

impl CatalogSession for MemoryCatalog {
    fn search(&self, query: &str, kind: SearchKind) -> Result<SearchResults, CatalogError> {
        bump(&self.counters.searches);
        self.check_session()?;
        {
            let faults = self.faults.lock().map_err(|_| poisoned())?;
            if faults.queries.contains(query) {
                return Err(CatalogError::Transient(format!("search '{query}' timed out")));
            }
        }

        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Ok(SearchResults::default());
        }

        let state = self.state()?;
        let mut results = SearchResults::default();
        match kind {
            SearchKind::Tracks => {
                results.tracks = state
                    .tracks
                    .iter()
                    .filter(|t| tokens_match(&tokens, &haystack(&t.name, &t.artists)))
                    .cloned()
                    .collect();
            }
            SearchKind::Albums => {
                results.albums = state
                    .albums
                    .iter()
                    .filter(|a| tokens_match(&tokens, &haystack(&a.name, &a.artists)))
                    .cloned()
                    .collect();
            }
        }
        Ok(results)
    }

    fn playlists_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Page<TargetPlaylist>, CatalogError> {
        bump(&self.counters.pages);
        self.check_session()?;
        let state = self.state()?;
        let headers: Vec<TargetPlaylist> = state
            .playlists
            .iter()
            .map(|p| TargetPlaylist {
                id: p.id.clone(),
                name: p.name.clone(),
                description: p.description.clone(),
                num_tracks: p.tracks.len(),
            })
            .collect();
        self.page_of(&headers, offset, limit)
    }

    fn playlist_tracks_page(
        &self,
        playlist: &TargetId,
        offset: usize,
        limit: usize,
    ) -> Result<Page<TargetTrack>, CatalogError> {
        bump(&self.counters.pages);
        self.check_session()?;
        {
            let faults = self.faults.lock().map_err(|_| poisoned())?;
            if faults.track_page_offsets.contains(&offset) {
                return Err(CatalogError::Transient(format!(
                    "page at offset {offset} of playlist {playlist} failed"
                )));
            }
        }

        let state = self.state()?;
        let stored = state
            .playlists
            .iter()
            .find(|p| &p.id == playlist)
            .ok_or_else(|| CatalogError::NotFound(format!("playlist {playlist}")))?;
        let members = stored
            .tracks
            .iter()
            .map(|id| Self::track_by_id(&state.tracks, id).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        self.page_of(&members, offset, limit)
    }

    fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<TargetPlaylist, CatalogError> {
        bump(&self.counters.creates);
        self.check_session()?;
        let mut state = self.state()?;
        let id = TargetId::new(uuid::Uuid::new_v4().to_string());
        state.playlists.push(StoredPlaylist {
            id: id.clone(),
            name: name.to_string(),
            description: description.map(str::to_string),
            tracks: Vec::new(),
        });
        Ok(TargetPlaylist {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            num_tracks: 0,
        })
    }

    fn add_tracks(&self, playlist: &TargetId, tracks: &[TargetId]) -> Result<(), CatalogError> {
        bump(&self.counters.adds);
        self.check_session()?;
        {
            let mut faults = self.faults.lock().map_err(|_| poisoned())?;
            if faults.failing_adds > 0 {
                faults.failing_adds -= 1;
                return Err(CatalogError::Transient("add rejected".to_string()));
            }
        }

        let mut state = self.state()?;
        for id in tracks {
            let track = Self::track_by_id(&state.tracks, id)?;
            if !track.available {
                return Err(CatalogError::Protocol(format!("track {id} is not streamable")));
            }
        }
        let stored = state
            .playlists
            .iter_mut()
            .find(|p| &p.id == playlist)
            .ok_or_else(|| CatalogError::NotFound(format!("playlist {playlist}")))?;
        stored.tracks.extend(tracks.iter().cloned());
        Ok(())
    }

    fn remove_range(
        &self,
        playlist: &TargetId,
        range: Range<usize>,
    ) -> Result<(), CatalogError> {
        bump(&self.counters.removes);
        self.check_session()?;
        let mut state = self.state()?;
        let stored = state
            .playlists
            .iter_mut()
            .find(|p| &p.id == playlist)
            .ok_or_else(|| CatalogError::NotFound(format!("playlist {playlist}")))?;
        if range.start > range.end || range.end > stored.tracks.len() {
            return Err(CatalogError::Protocol(format!(
                "range {:?} out of bounds for {} items",
                range,
                stored.tracks.len()
            )));
        }
        stored.tracks.drain(range);
        Ok(())
    }

    fn add_favorite_track(&self, track: &TargetId) -> Result<(), CatalogError> {
        bump(&self.counters.favorites);
        self.check_session()?;
        let mut state = self.state()?;
        Self::track_by_id(&state.tracks, track)?;
        if !state.favorite_tracks.contains(track) {
            state.favorite_tracks.push(track.clone());
        }
        Ok(())
    }

    fn add_favorite_album(&self, album: &TargetId) -> Result<(), CatalogError> {
        bump(&self.counters.favorites);
        self.check_session()?;
        let mut state = self.state()?;
        if !state.albums.iter().any(|a| &a.id == album) {
            return Err(CatalogError::NotFound(format!("album {album}")));
        }
        if !state.favorite_albums.contains(album) {
            state.favorite_albums.push(album.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: i64, name: &str, artist: &str) -> TargetTrack {
        TargetTrack {
            id: TargetId::from(id),
            name: name.to_string(),
            artists: vec![artist.to_string()],
            duration: 200,
            isrc: None,
            available: true,
        }
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(CatalogSnapshot {
            tracks: vec![
                track(1, "Yellow", "Coldplay"),
                track(2, "Yellow Submarine", "The Beatles"),
                track(3, "Fix You", "Coldplay"),
            ],
            playlists: vec![StoredPlaylist {
                id: TargetId::from("pl1"),
                name: "Mix".to_string(),
                description: None,
                tracks: vec![TargetId::from(1), TargetId::from(3), TargetId::from(2)],
            }],
            ..Default::default()
        })
    }

    #[test]
    fn test_search_requires_every_token() {
        let catalog = catalog();
        let results = catalog.search("yellow coldplay", SearchKind::Tracks).unwrap();
        assert_eq!(results.tracks.len(), 1);
        assert_eq!(results.tracks[0].id, TargetId::from(1));

        let results = catalog.search("Yellow", SearchKind::Tracks).unwrap();
        assert_eq!(results.tracks.len(), 2);
        assert_eq!(catalog.calls().searches, 2);
    }

    #[test]
    fn test_page_cap_reports_effective_limit() {
        let catalog = catalog().with_max_page_size(2);
        let page = catalog
            .playlist_tracks_page(&TargetId::from("pl1"), 0, 50)
            .unwrap();
        assert_eq!(page.limit, 2);
        assert_eq!(page.total_number_of_items, 3);
        assert_eq!(page.items.len(), 2);

        let page = catalog
            .playlist_tracks_page(&TargetId::from("pl1"), 2, 50)
            .unwrap();
        assert_eq!(page.items[0].id, TargetId::from(2));
    }

    #[test]
    fn test_remove_range_and_add() {
        let catalog = catalog();
        let id = TargetId::from("pl1");
        catalog.remove_range(&id, 0..2).unwrap();
        assert_eq!(catalog.playlist_tracks("Mix").unwrap(), vec![TargetId::from(2)]);

        catalog.add_tracks(&id, &[TargetId::from(1)]).unwrap();
        assert_eq!(
            catalog.playlist_tracks("Mix").unwrap(),
            vec![TargetId::from(2), TargetId::from(1)]
        );
        assert!(catalog.remove_range(&id, 1..5).is_err());
        assert_eq!(catalog.calls().writes(), 3);
    }

    #[test]
    fn test_injected_faults() {
        let catalog = catalog();
        catalog.fail_query("fix you");
        assert!(matches!(
            catalog.search("fix you", SearchKind::Tracks),
            Err(CatalogError::Transient(_))
        ));

        catalog.fail_track_page(0);
        assert!(catalog
            .playlist_tracks_page(&TargetId::from("pl1"), 0, 10)
            .is_err());

        catalog.revoke_session();
        assert!(matches!(
            catalog.playlists_page(0, 10),
            Err(CatalogError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_snapshot_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = catalog();
        catalog.create_playlist("New", Some("desc")).unwrap();
        catalog.save(&path).unwrap();

        let reloaded = MemoryCatalog::load(&path).unwrap();
        let snapshot = reloaded.snapshot().unwrap();
        assert_eq!(snapshot.playlists.len(), 2);
        assert_eq!(snapshot.playlists[1].name, "New");
        assert_eq!(snapshot.tracks.len(), 3);
    }
}
