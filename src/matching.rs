//! Match evaluation between target-catalog candidates and source tracks.
//!
//! This module contains the individual checks and the combined predicate:
//! - ISRC identity (short-circuits everything else)
//! - Duration tolerance
//! - Title containment
//! - Artist set intersection
//!
//! No score is produced; the first candidate that passes wins.

use rustc_hash::FxHashSet;

use crate::models::{SourceTrack, TargetTrack};
use crate::normalize::{artist_key, normalize, title_key};

// ============================================================================
// Thresholds
// ============================================================================

/// Durations must differ by strictly less than this many seconds
pub const DURATION_TOLERANCE_SEC: f64 = 3.0;

// ============================================================================
// Verdict
// ============================================================================

/// Why a candidate was accepted or rejected. Only used for diagnostics;
/// callers that need a decision use [`matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    /// Both sides carry the same non-empty ISRC
    Isrc,
    /// Duration, title and artist checks all passed
    Composite,
    /// Source record has no id and can never be matched
    MissingSourceId,
    DurationMismatch,
    NameMismatch,
    ArtistMismatch,
}

impl MatchVerdict {
    pub fn is_match(self) -> bool {
        matches!(self, MatchVerdict::Isrc | MatchVerdict::Composite)
    }

    /// Short reason string for debug logging
    pub fn reason(self) -> &'static str {
        match self {
            MatchVerdict::Isrc => "isrc",
            MatchVerdict::Composite => "duration+name+artist",
            MatchVerdict::MissingSourceId => "source has no id",
            MatchVerdict::DurationMismatch => "duration differs by 3s or more",
            MatchVerdict::NameMismatch => "title not contained in candidate",
            MatchVerdict::ArtistMismatch => "no shared artist",
        }
    }
}

// ============================================================================
// Individual Checks
// ============================================================================

pub fn isrc_match(candidate: &TargetTrack, source: &SourceTrack) -> bool {
    match (candidate.isrc.as_deref(), source.isrc.as_deref()) {
        (Some(a), Some(b)) => !a.is_empty() && a == b,
        _ => false,
    }
}

pub fn duration_match(candidate: &TargetTrack, source: &SourceTrack) -> bool {
    let source_sec = source.duration_ms as f64 / 1000.0;
    (candidate.duration as f64 - source_sec).abs() < DURATION_TOLERANCE_SEC
}

/// Source title (simplified, lower-cased, feat. removed) must be a substring
/// of the candidate title, either as-is or after diacritic folding.
pub fn name_match(candidate: &TargetTrack, source: &SourceTrack) -> bool {
    let wanted = title_key(&source.name);
    let candidate_name = candidate.name.to_lowercase();
    candidate_name.contains(&wanted) || normalize(&candidate_name).contains(&normalize(&wanted))
}

/// At least one simplified artist name appears on both sides.
pub fn artist_match(candidate: &TargetTrack, source: &SourceTrack) -> bool {
    let candidate_artists: FxHashSet<String> =
        candidate.artists.iter().map(|a| artist_key(a)).collect();
    source
        .artists
        .iter()
        .map(|a| artist_key(a))
        .any(|a| candidate_artists.contains(&a))
}

// ============================================================================
// Combined Evaluation
// ============================================================================

/// Run the checks in priority order and report the first decisive one.
pub fn evaluate(candidate: &TargetTrack, source: &SourceTrack) -> MatchVerdict {
    if source.id.is_none() {
        return MatchVerdict::MissingSourceId;
    }
    if isrc_match(candidate, source) {
        return MatchVerdict::Isrc;
    }
    if !duration_match(candidate, source) {
        return MatchVerdict::DurationMismatch;
    }
    if !name_match(candidate, source) {
        return MatchVerdict::NameMismatch;
    }
    if !artist_match(candidate, source) {
        return MatchVerdict::ArtistMismatch;
    }
    MatchVerdict::Composite
}

/// True when `candidate` is the same recording as `source`.
pub fn matches(candidate: &TargetTrack, source: &SourceTrack) -> bool {
    evaluate(candidate, source).is_match()
}

/// First candidate, in result order, that is addable and matches `source`.
pub fn first_match<'a, I>(candidates: I, source: &SourceTrack) -> Option<&'a TargetTrack>
where
    I: IntoIterator<Item = &'a TargetTrack>,
{
    candidates.into_iter().find(|candidate| {
        let verdict = evaluate(candidate, source);
        log::trace!(
            "candidate '{}' ({}) for '{}': {}",
            candidate.name,
            candidate.id,
            source.name,
            verdict.reason()
        );
        candidate.available && verdict.is_match()
    })
}

// ============================================================================
// Tests
// ============================================================================
