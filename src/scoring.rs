//! Candidate generation and the match scoring rubric.
//!
//! Everything here is pure and deterministic. The point values and
//! thresholds are fixed policy: changing them changes which releases get
//! silently auto-accepted, so they are constants, not configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::discogs::SearchHit;

const TITLE_EXACT: i32 = 40;
const TITLE_PARTIAL: i32 = 25;
const ARTIST_EXACT: i32 = 30;
const ARTIST_PARTIAL: i32 = 15;
const YEAR_MATCH: i32 = 10;

const ACCEPT_THRESHOLD: i32 = 75;
const SUGGEST_THRESHOLD: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Matched,
    Suggested,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Suggested => "suggested",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matched" => Some(Self::Matched),
            "suggested" => Some(Self::Suggested),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Map a score to its decision band.
pub fn decide(score: i32) -> MatchStatus {
    if score >= ACCEPT_THRESHOLD {
        MatchStatus::Matched
    } else if score >= SUGGEST_THRESHOLD {
        MatchStatus::Suggested
    } else {
        MatchStatus::Rejected
    }
}

/// Split a Discogs combined "Artist - Title" display string at the first
/// " - ". Without a separator the whole string is the title.
pub fn parse_hit_title(combined: &str) -> (&str, &str) {
    match combined.split_once(" - ") {
        Some((artist, title)) => (artist, title),
        None => ("", combined),
    }
}

/// Strip Discogs disambiguator suffixes like "(26)" appended to artist
/// names. Only parenthesized all-digit runs are removed.
fn strip_disambiguators(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == '(' {
            let rest = &s[start + 1..];
            if let Some(close) = rest.find(')') {
                let inner = &rest[..close];
                if !inner.is_empty() && inner.chars().all(|d| d.is_ascii_digit()) {
                    // skip up to and including the closing paren
                    while let Some(&(i, _)) = chars.peek() {
                        if i > start + 1 + close {
                            break;
                        }
                        chars.next();
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Normalize a string for comparison: lowercase, drop "(n)" disambiguators,
/// keep only alphanumerics and spaces, collapse whitespace.
pub fn normalize_for_matching(input: &str) -> String {
    let stripped = strip_disambiguators(&input.to_lowercase());
    let filtered: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Score one search hit against the release's (artist, title, year) triple.
/// Max 80 without a year match, 90 with one; clamped to [0, 100].
pub fn score_hit(artist: &str, title: &str, year: Option<i32>, hit: &SearchHit) -> i32 {
    let (hit_artist, hit_title) = parse_hit_title(&hit.title);
    let norm_artist = normalize_for_matching(artist);
    let norm_title = normalize_for_matching(title);
    let norm_hit_artist = normalize_for_matching(hit_artist);
    let norm_hit_title = normalize_for_matching(hit_title);

    let mut score = 0;

    if !norm_title.is_empty() && norm_title == norm_hit_title {
        score += TITLE_EXACT;
    } else if !norm_title.is_empty()
        && !norm_hit_title.is_empty()
        && (norm_title.contains(&norm_hit_title) || norm_hit_title.contains(&norm_title))
    {
        score += TITLE_PARTIAL;
    }

    if !norm_artist.is_empty() && norm_artist == norm_hit_artist {
        score += ARTIST_EXACT;
    } else if !norm_artist.is_empty()
        && !norm_hit_artist.is_empty()
        && (norm_artist.contains(&norm_hit_artist) || norm_hit_artist.contains(&norm_artist))
    {
        score += ARTIST_PARTIAL;
    }

    if let (Some(release_year), Some(hit_year)) = (year, hit.year_as_i32())
        && release_year == hit_year
    {
        score += YEAR_MATCH;
    }

    score.clamp(0, 100)
}

/// Highest-scoring hit; ties keep the first encountered.
pub fn best_hit<'a>(
    artist: &str,
    title: &str,
    year: Option<i32>,
    hits: &'a [SearchHit],
) -> Option<(&'a SearchHit, i32)> {
    let mut best: Option<(&SearchHit, i32)> = None;
    for hit in hits {
        let score = score_hit(artist, title, year, hit);
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((hit, score));
        }
    }
    best
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive (ASCII) split of `raw` on every occurrence of `sep`.
fn split_ci(raw: &str, sep: &str) -> Vec<String> {
    let sep_len = sep.len();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + sep_len <= raw.len() {
        if raw.is_char_boundary(i)
            && raw.is_char_boundary(i + sep_len)
            && raw[i..i + sep_len].eq_ignore_ascii_case(sep)
        {
            pieces.push(raw[start..i].to_string());
            i += sep_len;
            start = i;
        } else {
            i += 1;
        }
    }
    pieces.push(raw[start..].to_string());
    pieces
}

// multi-char separators first so " w/ " splits before the bare "/"
const ARTIST_SEPARATORS: &[&str] = &[
    " feat. ",
    " feat ",
    " featuring ",
    " w/ ",
    " x ",
    "×",
    "+",
    "&",
    ",",
    "/",
];

/// The raw artist string plus its splits on common multi-artist separators,
/// deduplicated case-insensitively, raw string first.
pub fn artist_candidates(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let push = |candidate: &str, out: &mut Vec<String>, seen: &mut HashSet<String>| {
        let trimmed = collapse_ws(candidate);
        if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed);
        }
    };

    push(raw, &mut out, &mut seen);

    let mut pieces = vec![raw.to_string()];
    for sep in ARTIST_SEPARATORS {
        pieces = pieces
            .iter()
            .flat_map(|piece| split_ci(piece, sep))
            .collect();
    }
    for piece in &pieces {
        push(piece, &mut out, &mut seen);
    }
    out
}

/// Case-insensitive (ASCII) removal of every occurrence of `needle`.
fn remove_ci(haystack: &str, needle: &str) -> String {
    split_ci(haystack, needle).join(" ")
}

/// Remove whole words equal to `word` (case-insensitive, ignoring
/// surrounding punctuation), so "OST" never matches inside "Lost".
fn remove_word_ci(s: &str, word: &str) -> String {
    s.split_whitespace()
        .filter(|w| {
            let bare = w.trim_matches(|c: char| !c.is_alphanumeric());
            !bare.eq_ignore_ascii_case(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

const DIGITAL_SUFFIXES: &[&str] = &["(digital release)", "(digitals)", "(digital)"];

/// Title variants worth searching: the raw title, the title with a leading
/// "Artist - " / "Artist: " prefix stripped, soundtrack-marker variants, and
/// "(digital)" suffix variants. Deduplicated, whitespace-collapsed,
/// non-empty.
pub fn title_candidates(raw_title: &str, artist: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let push = |candidate: &str, out: &mut Vec<String>, seen: &mut HashSet<String>| {
        let trimmed = collapse_ws(candidate);
        if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed);
        }
    };

    push(raw_title, &mut out, &mut seen);

    // "Artist - Title" submissions where the scraper kept the artist prefix.
    let artist = artist.trim();
    if !artist.is_empty() {
        for sep in [" - ", " – ", " — ", ": "] {
            let prefix = format!("{artist}{sep}");
            if let Some(rest) = strip_prefix_ci(raw_title.trim(), &prefix) {
                push(rest, &mut out, &mut seen);
            }
        }
    }

    let base: Vec<String> = out.clone();
    for variant in &base {
        let lower = variant.to_lowercase();
        if lower.contains("original soundtrack") {
            push(
                &remove_ci(variant, "original soundtrack"),
                &mut out,
                &mut seen,
            );
        }
        for word in ["soundtrack", "ost"] {
            if lower.split_whitespace().any(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .eq_ignore_ascii_case(word)
            }) {
                push(&remove_word_ci(variant, word), &mut out, &mut seen);
            }
        }
    }

    let base: Vec<String> = out.clone();
    for variant in &base {
        let lower = variant.to_lowercase();
        // to_lowercase can shift byte offsets for some scripts; only strip
        // when the lengths line up
        if lower.len() != variant.len() {
            continue;
        }
        for suffix in DIGITAL_SUFFIXES {
            if let Some(stripped) = lower.strip_suffix(suffix) {
                push(&variant[..stripped.len()], &mut out, &mut seen);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, year: Option<&str>) -> SearchHit {
        SearchHit {
            id: 1,
            title: title.to_string(),
            year: year.map(str::to_string),
            master_id: None,
        }
    }

    #[test]
    fn normalize_lowercases_and_strips_punctuation() {
        assert_eq!(
            normalize_for_matching("Boards Of Canada!"),
            "boards of canada"
        );
        assert_eq!(normalize_for_matching("  A   B\tC "), "a b c");
        assert_eq!(normalize_for_matching("Röyksopp"), "röyksopp");
    }

    #[test]
    fn normalize_strips_numeric_disambiguators_only() {
        assert_eq!(normalize_for_matching("Madonna (26)"), "madonna");
        assert_eq!(normalize_for_matching("Prince (2) - Purple"), "prince purple");
        // non-numeric parentheticals survive as words
        assert_eq!(normalize_for_matching("Pet Shop (Boys)"), "pet shop boys");
    }

    #[test]
    fn hit_title_splits_at_first_separator() {
        assert_eq!(
            parse_hit_title("Boards Of Canada - Geogaddi"),
            ("Boards Of Canada", "Geogaddi")
        );
        assert_eq!(
            parse_hit_title("A - B - C"),
            ("A", "B - C")
        );
        assert_eq!(parse_hit_title("No Separator"), ("", "No Separator"));
    }

    #[test]
    fn exact_title_artist_and_year_score_eighty() {
        let hit = hit("Boards Of Canada - Geogaddi", Some("2002"));
        let score = score_hit("Boards of Canada", "Geogaddi", Some(2002), &hit);
        assert_eq!(score, 80);
        assert_eq!(decide(score), MatchStatus::Matched);
    }

    #[test]
    fn substring_title_and_artist_score_forty_and_reject() {
        let hit = hit("Rashad - Double Cup LP", None);
        let score = score_hit("DJ Rashad", "Double Cup", None, &hit);
        assert_eq!(score, 40);
        assert_eq!(decide(score), MatchStatus::Rejected);
    }

    #[test]
    fn year_mismatch_scores_seventy_and_suggests() {
        let hit = hit("Boards Of Canada - Geogaddi", Some("2013"));
        let score = score_hit("Boards of Canada", "Geogaddi", Some(2002), &hit);
        assert_eq!(score, 70);
        assert_eq!(decide(score), MatchStatus::Suggested);
    }

    #[test]
    fn missing_hit_artist_scores_title_only() {
        let hit = hit("Geogaddi", None);
        let score = score_hit("Boards of Canada", "Geogaddi", None, &hit);
        assert_eq!(score, 40);
    }

    #[test]
    fn decision_thresholds_are_exact() {
        assert_eq!(decide(75), MatchStatus::Matched);
        assert_eq!(decide(74), MatchStatus::Suggested);
        assert_eq!(decide(50), MatchStatus::Suggested);
        assert_eq!(decide(49), MatchStatus::Rejected);
        assert_eq!(decide(0), MatchStatus::Rejected);
    }

    #[test]
    fn best_hit_is_stable_on_ties() {
        let hits = vec![
            SearchHit {
                id: 10,
                title: "Someone - Geogaddi".to_string(),
                year: None,
                master_id: None,
            },
            SearchHit {
                id: 20,
                title: "Somebody - Geogaddi".to_string(),
                year: None,
                master_id: None,
            },
        ];
        let (best, score) = best_hit("Boards of Canada", "Geogaddi", None, &hits).unwrap();
        assert_eq!(best.id, 10, "ties keep the first-encountered hit");
        assert_eq!(score, 40);
    }

    #[test]
    fn best_hit_prefers_higher_score() {
        let hits = vec![
            SearchHit {
                id: 10,
                title: "Somebody Else - Other Album".to_string(),
                year: None,
                master_id: None,
            },
            SearchHit {
                id: 20,
                title: "Boards Of Canada - Geogaddi".to_string(),
                year: None,
                master_id: None,
            },
        ];
        let (best, score) = best_hit("Boards of Canada", "Geogaddi", None, &hits).unwrap();
        assert_eq!(best.id, 20);
        assert_eq!(score, 70);
    }

    #[test]
    fn best_hit_of_empty_slice_is_none() {
        assert!(best_hit("a", "b", None, &[]).is_none());
    }

    #[test]
    fn artist_candidates_keep_raw_first() {
        let candidates = artist_candidates("Burial");
        assert_eq!(candidates, vec!["Burial".to_string()]);
    }

    #[test]
    fn artist_candidates_split_on_separators() {
        let candidates = artist_candidates("Burial + Four Tet");
        assert_eq!(
            candidates,
            vec![
                "Burial + Four Tet".to_string(),
                "Burial".to_string(),
                "Four Tet".to_string(),
            ]
        );

        let candidates = artist_candidates("DJ Rashad feat. DJ Spinn");
        assert_eq!(candidates[0], "DJ Rashad feat. DJ Spinn");
        assert!(candidates.contains(&"DJ Rashad".to_string()));
        assert!(candidates.contains(&"DJ Spinn".to_string()));
    }

    #[test]
    fn artist_candidates_dedupe_case_insensitively() {
        let candidates = artist_candidates("Burial & BURIAL");
        assert_eq!(
            candidates,
            vec!["Burial & BURIAL".to_string(), "Burial".to_string()]
        );
    }

    #[test]
    fn artist_candidates_handle_multiplication_sign() {
        let candidates = artist_candidates("Haxan Cloak × The Body");
        assert!(candidates.contains(&"Haxan Cloak".to_string()));
        assert!(candidates.contains(&"The Body".to_string()));
    }

    #[test]
    fn title_candidates_strip_artist_prefix() {
        let candidates = title_candidates("Burial - Untrue", "Burial");
        assert_eq!(
            candidates,
            vec!["Burial - Untrue".to_string(), "Untrue".to_string()]
        );

        let candidates = title_candidates("Burial: Untrue", "burial");
        assert!(candidates.contains(&"Untrue".to_string()));
    }

    #[test]
    fn title_candidates_strip_soundtrack_markers() {
        let candidates = title_candidates("Akira Original Soundtrack", "Geinoh Yamashirogumi");
        assert!(candidates.contains(&"Akira".to_string()));

        let candidates = title_candidates("Drive OST", "Various");
        assert!(candidates.contains(&"Drive".to_string()));
    }

    #[test]
    fn title_candidates_strip_digital_suffixes() {
        let candidates = title_candidates("Double Cup (Digital)", "DJ Rashad");
        assert!(candidates.contains(&"Double Cup".to_string()));

        let candidates = title_candidates("Double Cup (digital release)", "DJ Rashad");
        assert!(candidates.contains(&"Double Cup".to_string()));
    }

    #[test]
    fn title_candidates_never_emit_empty_variants() {
        let candidates = title_candidates("OST", "Various");
        assert_eq!(candidates, vec!["OST".to_string()]);
    }

    #[test]
    fn match_status_round_trips_as_str() {
        for status in [
            MatchStatus::Matched,
            MatchStatus::Suggested,
            MatchStatus::Rejected,
        ] {
            assert_eq!(MatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MatchStatus::parse("bogus"), None);
    }
}
