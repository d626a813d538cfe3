//! Shared normalization functions for cross-catalog track matching.
//! Used by the match evaluator, the resolver's query builder and the album flow.
//!
//! CRITICAL: Any change here shifts which candidates match. Run tests after changes.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// PATTERNS
// ============================================================================

/// Annotation markers that start a remix/remaster/live suffix, e.g.
/// "Song - Remastered 2011", "Song (Live)", "Song [Mono]".
const ANNOTATION_MARKERS: [&str; 3] = [" - ", "(", "["];

/// Featured-artist marker inside titles: "Song feat. Someone"
const FEAT_MARKER: &str = "feat.";

/// Regex to collapse multiple whitespace into single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Reduce text to ASCII by NFD decomposition, dropping combining marks.
/// e.g., "Beyoncé" → "Beyonce", "Motörhead" → "Motorhead"
///
/// Anything that does not decompose to ASCII (Cyrillic, CJK, ...) is dropped,
/// so non-Latin titles degrade to empty or partial strings.
pub fn normalize(text: &str) -> String {
    text.nfd().filter(|c| c.is_ascii()).collect()
}

/// Strip remix/remaster/live annotations by truncating at the earliest
/// `" - "`, `"("` or `"["`, then trimming.
/// e.g., "Karma Police - Remastered" → "Karma Police", "Hurt (Live)" → "Hurt"
pub fn simplify(text: &str) -> &str {
    let cut = ANNOTATION_MARKERS
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
        .unwrap_or(text.len());
    text[..cut].trim()
}

/// Drop a trailing "feat." credit from an already lower-cased title.
pub fn strip_feat(text: &str) -> &str {
    match text.find(FEAT_MARKER) {
        Some(idx) => text[..idx].trim(),
        None => text.trim(),
    }
}

/// Build a catalog search query from a title and one artist name.
/// Both parts are simplified so annotations don't narrow the remote search.
pub fn build_query(title: &str, artist: &str) -> String {
    let query = format!("{} {}", simplify(title), simplify(artist));
    MULTI_SPACE.replace_all(query.trim(), " ").to_string()
}

/// Title key used by the name check: lower-cased, simplified, feat. removed.
pub fn title_key(title: &str) -> String {
    let lower = title.to_lowercase();
    strip_feat(simplify(&lower)).to_string()
}

/// Artist key used by the artist check: lower-cased and simplified.
pub fn artist_key(artist: &str) -> String {
    simplify(&artist.to_lowercase()).to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_diacritics() {
        assert_eq!(normalize("Beyoncé"), "Beyonce");
        assert_eq!(normalize("Motörhead"), "Motorhead");
        assert_eq!(normalize("naïve café"), "naive cafe");
    }

    #[test]
    fn test_normalize_non_latin_degrades() {
        assert_eq!(normalize("кино"), "");
        assert_eq!(normalize("Kino кино"), "Kino ");
    }

    #[test]
    fn test_simplify_annotations() {
        assert_eq!(simplify("Karma Police - Remastered 2011"), "Karma Police");
        assert_eq!(simplify("Hurt (Live at Wembley)"), "Hurt");
        assert_eq!(simplify("Song [Mono]"), "Song");
        // Earliest marker wins
        assert_eq!(simplify("Song [Demo] (Take 2) - 1999"), "Song");
    }

    #[test]
    fn test_simplify_keeps_hyphenated_words() {
        assert_eq!(simplify("Jay-Z"), "Jay-Z");
        assert_eq!(simplify("  Plain Title  "), "Plain Title");
    }

    #[test]
    fn test_strip_feat() {
        assert_eq!(strip_feat("empire state of mind feat. alicia keys"), "empire state of mind");
        assert_eq!(strip_feat("no credits"), "no credits");
    }

    #[test]
    fn test_build_query() {
        assert_eq!(build_query("Hurt (Live)", "Johnny Cash"), "Hurt Johnny Cash");
        assert_eq!(build_query("Two  Spaces", "Artist [US]"), "Two Spaces Artist");
    }

    #[test]
    fn test_title_key() {
        assert_eq!(title_key("Crazy In Love (feat. Jay-Z)"), "crazy in love");
        assert_eq!(title_key("Lose Yourself feat. Someone - Remix"), "lose yourself");
    }

    #[test]
    fn test_artist_key() {
        assert_eq!(artist_key("The Beatles (Remastered)"), "the beatles");
    }
}
