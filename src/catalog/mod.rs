//! Interface to the target catalog.
//!
//! The reconciliation core only talks to the target through [`CatalogSession`];
//! the HTTP client, authentication and credential storage live outside this crate.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{TargetAlbum, TargetId, TargetPlaylist, TargetTrack};

pub mod memory;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Network hiccup, rate limiting, 5xx: worth retrying on a later run
    #[error("transient catalog error: {0}")]
    Transient(String),

    /// Session expired or credentials revoked; the whole run must stop
    #[error("catalog session is not authorized: {0}")]
    Unauthorized(String),

    #[error("not found in catalog: {0}")]
    NotFound(String),

    /// Response did not have the expected shape
    #[error("unexpected catalog response: {0}")]
    Protocol(String),
}

impl CatalogError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::Unauthorized(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Tracks,
    Albums,
}

/// Search results in the catalog's relevance order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub tracks: Vec<TargetTrack>,
    #[serde(default)]
    pub albums: Vec<TargetAlbum>,
}

/// One response from an offset-paginated listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Page size the server actually used
    pub limit: usize,
    #[serde(rename = "totalNumberOfItems")]
    pub total_number_of_items: usize,
    pub items: Vec<T>,
}

/// Authenticated session against the target catalog.
///
/// Implementations must be shareable across the resolver's worker threads.
pub trait CatalogSession: Send + Sync {
    fn search(&self, query: &str, kind: SearchKind) -> Result<SearchResults, CatalogError>;

    /// The session user's playlists, `limit` items starting at `offset`.
    fn playlists_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Page<TargetPlaylist>, CatalogError>;

    fn playlist_tracks_page(
        &self,
        playlist: &TargetId,
        offset: usize,
        limit: usize,
    ) -> Result<Page<TargetTrack>, CatalogError>;

    fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<TargetPlaylist, CatalogError>;

    /// Append tracks at the end of the playlist, in order.
    fn add_tracks(&self, playlist: &TargetId, tracks: &[TargetId]) -> Result<(), CatalogError>;

    /// Remove the items at positions `range` (0-based, end exclusive).
    fn remove_range(&self, playlist: &TargetId, range: Range<usize>)
        -> Result<(), CatalogError>;

    fn add_favorite_track(&self, track: &TargetId) -> Result<(), CatalogError>;

    fn add_favorite_album(&self, album: &TargetId) -> Result<(), CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_uses_wire_field_names() {
        let json = r#"{"limit": 2, "totalNumberOfItems": 5, "items": [{"id": 1, "name": "P"}]}"#;
        let page: Page<TargetPlaylist> = serde_json::from_str(json).unwrap();
        assert_eq!(page.limit, 2);
        assert_eq!(page.total_number_of_items, 5);
        assert_eq!(page.items[0].id, TargetId::from(1));
    }

    #[test]
    fn test_only_unauthorized_is_fatal() {
        assert!(CatalogError::Unauthorized("expired".into()).is_fatal());
        assert!(!CatalogError::Transient("timeout".into()).is_fatal());
        assert!(!CatalogError::Protocol("bad".into()).is_fatal());
        assert!(CatalogError::Transient("timeout".into()).is_transient());
    }
}
