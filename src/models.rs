//! Core data models for catalog synchronization.
//!
//! This module contains the source/target records exchanged with the two
//! catalogs and the outcome types produced by a sync run.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Target-catalog identifier. Catalogs assign either integers or opaque
/// strings; both are carried as their string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl<'de> Deserialize<'de> for TargetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Str(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(id) => TargetId::from(id),
            RawId::Str(id) => TargetId::from(id),
        })
    }
}

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for TargetId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Source Catalog Models
// ============================================================================

/// Track as received from the source catalog. Never mutated after receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceTrack {
    /// Stable id within the source catalog; absent for manually entered entries
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Credited artists in the source catalog's order
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(alias = "duration")]
    pub duration_ms: i64,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
}

impl SourceTrack {
    /// "Artist1, Artist2 - Name" for log lines and reports
    pub fn display_name(&self) -> String {
        if self.artists.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.name)
        }
    }
}

/// Playlist as received from the source catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourcePlaylist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tracks: Vec<SourceTrack>,
}

/// Album as received from the source catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceAlbum {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
}

/// Everything exported from the source catalog for one transfer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LibraryExport {
    #[serde(default)]
    pub playlists: Vec<SourcePlaylist>,
    /// Saved tracks to add to the target's favorites
    #[serde(default)]
    pub tracks: Vec<SourceTrack>,
    #[serde(default)]
    pub albums: Vec<SourceAlbum>,
}

impl LibraryExport {
    /// Tracks across liked songs and every playlist
    pub fn total_songs(&self) -> usize {
        self.tracks.len() + self.playlists.iter().map(|p| p.tracks.len()).sum::<usize>()
    }
}

// ============================================================================
// Target Catalog Models
// ============================================================================

fn default_available() -> bool {
    true
}

/// Track as indexed by the target catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetTrack {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Duration in whole seconds
    pub duration: i64,
    #[serde(default)]
    pub isrc: Option<String>,
    /// Indexed tracks may be unstreamable and cannot be added to playlists
    #[serde(default = "default_available")]
    pub available: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetAlbum {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
}

/// Playlist header from the target catalog's listing endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetPlaylist {
    pub id: TargetId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub num_tracks: usize,
}

// ============================================================================
// Sync Outcomes
// ============================================================================

/// Source track that ended a run without a correspondence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnresolvedTrack {
    pub source_id: Option<String>,
    pub display_name: String,
    pub reason: UnresolvedReason,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Source record carries no id and can never be matched
    MissingId,
    /// Skipped because an earlier failure's backoff window is still open
    BackoffActive,
    /// Searched with every artist and nothing matched
    NoMatch,
    /// Search failed for a non-fatal reason; retried next run
    SearchError(String),
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::MissingId => f.write_str("missing source id"),
            UnresolvedReason::BackoffActive => f.write_str("previous failure still in backoff"),
            UnresolvedReason::NoMatch => f.write_str("no match found"),
            UnresolvedReason::SearchError(e) => write!(f, "search failed: {e}"),
        }
    }
}

/// What the Applying step did to the target playlist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistChange {
    /// Source playlist had no tracks; nothing was touched
    Skipped,
    /// Desired ordering equals the current one; no writes issued
    Unchanged,
    /// Playlist cleared and refilled
    Updated { removed: usize, added: usize },
}

/// Result of reconciling one playlist.
#[derive(Clone, Debug, Serialize)]
pub struct PlaylistOutcome {
    pub playlist_name: String,
    pub target_playlist_id: Option<TargetId>,
    pub created: bool,
    pub change: PlaylistChange,
    pub total_tracks: usize,
    /// Tracks with a correspondence after the run (including dropped duplicates)
    pub matched: usize,
    /// Matched during Seeding, without a remote search
    pub seeded: usize,
    /// Remote searches issued through the resolver
    pub searched: usize,
    pub duplicates: Vec<String>,
    pub unresolved: Vec<UnresolvedTrack>,
}

impl PlaylistOutcome {
    pub fn new(playlist_name: &str, total_tracks: usize) -> Self {
        Self {
            playlist_name: playlist_name.to_string(),
            target_playlist_id: None,
            created: false,
            change: PlaylistChange::Skipped,
            total_tracks,
            matched: 0,
            seeded: 0,
            searched: 0,
            duplicates: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// Calculate match rate as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.total_tracks == 0 {
            0.0
        } else {
            100.0 * self.matched as f64 / self.total_tracks as f64
        }
    }
}
