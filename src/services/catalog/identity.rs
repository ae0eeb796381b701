//! Cross-platform game identity resolution.
//!
//! Decides which catalog game an incoming platform listing is, in strategy
//! order: external id, exact normalized title, fuzzy title with
//! publisher/developer agreement, else a new catalog row. The store supplies
//! the candidate set; everything here is pure.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use uuid::Uuid;

use crate::models::{ExternalIds, MatchMethod, NormalizedGame};

/// Minimum normalized Levenshtein ratio for a fuzzy title match.
const FUZZY_THRESHOLD: f64 = 0.92;

fn edition_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s*\b(game of the year( edition)?|goty( edition)?|complete edition|definitive edition|enhanced edition|remastered)\s*$",
        )
        .expect("static regex")
    })
}

/// Catalog game surface the resolver compares against.
#[derive(Debug, Clone)]
pub struct GameCandidate {
    pub game_id: Uuid,
    pub normalized_title: String,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub external_ids: ExternalIds,
}

/// Outcome of resolving one incoming listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Link to an existing catalog game; title-based strategies carry an
    /// unverified match record for human review.
    Existing {
        game_id: Uuid,
        match_record: Option<PendingMatch>,
    },
    /// No catalog game fits; insert a fresh row.
    New,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingMatch {
    pub method: MatchMethod,
    pub confidence: f32,
}

/// Canonical comparable form of a title: lowercase, NFKD with combining marks
/// dropped, trademark glyphs and punctuation removed, edition suffixes
/// stripped, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !matches!(c, '\u{2122}' | '\u{00AE}' | '\u{00A9}'))
        .collect();

    let lowered = folded.to_lowercase();
    let depunctuated: String = lowered
        .chars()
        .map(|c| {
            if matches!(
                c,
                ':' | ';' | ',' | '.' | '!' | '?' | '\'' | '"' | '(' | ')' | '[' | ']' | '-'
                    | '–' | '—' | '_' | '/'
            ) {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = depunctuated.split_whitespace().collect::<Vec<_>>().join(" ");
    strip_edition_suffix(&collapsed)
}

/// Drop trailing edition markers, repeatedly in case they stack.
fn strip_edition_suffix(title: &str) -> String {
    let re = edition_suffix_re();
    let mut current = title.to_string();
    loop {
        let stripped = re.replace(&current, "").trim().to_string();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Normalized Levenshtein ratio in `[0, 1]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein::levenshtein(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

fn text_eq(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Resolve one incoming listing against the candidate set, first hit wins.
pub fn resolve(
    platform_code: &str,
    incoming: &NormalizedGame,
    candidates: &[GameCandidate],
) -> Resolution {
    // 1. External id: authoritative, no review needed.
    if let Some(incoming_id) = incoming.external_ids.for_platform(platform_code) {
        for candidate in candidates {
            if candidate.external_ids.for_platform(platform_code) == Some(incoming_id) {
                return Resolution::Existing {
                    game_id: candidate.game_id,
                    match_record: None,
                };
            }
        }
    }

    let normalized = normalize_title(&incoming.title);

    // 2. Exact normalized title.
    for candidate in candidates {
        if candidate.normalized_title == normalized {
            return Resolution::Existing {
                game_id: candidate.game_id,
                match_record: Some(PendingMatch {
                    method: MatchMethod::TitleExact,
                    confidence: 0.95,
                }),
            };
        }
    }

    // 3. Fuzzy title, gated on publisher or developer agreement so near-miss
    // titles from unrelated studios never merge.
    let mut best: Option<(&GameCandidate, f64)> = None;
    for candidate in candidates {
        let ratio = title_similarity(&normalized, &candidate.normalized_title);
        if ratio < FUZZY_THRESHOLD {
            continue;
        }
        let attribution_agrees = text_eq(&incoming.publisher, &candidate.publisher)
            || text_eq(&incoming.developer, &candidate.developer);
        if !attribution_agrees {
            continue;
        }
        if best.map(|(_, b)| ratio > b).unwrap_or(true) {
            best = Some((candidate, ratio));
        }
    }
    if let Some((candidate, ratio)) = best {
        return Resolution::Existing {
            game_id: candidate.game_id,
            match_record: Some(PendingMatch {
                method: MatchMethod::TitleFuzzy,
                confidence: ratio as f32,
            }),
        };
    }

    Resolution::New
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExternalIds;

    fn incoming(title: &str) -> NormalizedGame {
        NormalizedGame {
            platform_game_id: "g1".to_string(),
            title: title.to_string(),
            description: None,
            release_date: None,
            developer: None,
            publisher: None,
            genres: Vec::new(),
            metacritic_score: None,
            cover_image_url: None,
            screenshots: Vec::new(),
            external_ids: ExternalIds::default(),
            playtime_minutes: 0,
            last_played_at: None,
            platform_data: serde_json::json!({}),
        }
    }

    fn candidate(title: &str) -> GameCandidate {
        GameCandidate {
            game_id: Uuid::new_v4(),
            normalized_title: normalize_title(title),
            developer: None,
            publisher: None,
            external_ids: ExternalIds::default(),
        }
    }

    #[test]
    fn normalization_strips_editions_and_punctuation() {
        assert_eq!(
            normalize_title("The Witcher 3 - Wild Hunt (Game of the Year Edition)"),
            "the witcher 3 wild hunt"
        );
        assert_eq!(
            normalize_title("The Witcher 3: Wild Hunt"),
            "the witcher 3 wild hunt"
        );
        assert_eq!(normalize_title("DOOM\u{2122}"), "doom");
        assert_eq!(normalize_title("  Hades   II  "), "hades ii");
        assert_eq!(normalize_title("Skyrim GOTY Remastered"), "skyrim");
    }

    #[test]
    fn normalization_folds_accents() {
        assert_eq!(normalize_title("Pokémon"), "pokemon");
    }

    #[test]
    fn external_id_match_wins_without_review() {
        let mut cand = candidate("The Witcher 3: Wild Hunt");
        cand.external_ids.steam_app_id = Some("292030".to_string());

        let mut inc = incoming("Totally Different Name");
        inc.external_ids.steam_app_id = Some("292030".to_string());

        match resolve("steam", &inc, &[cand.clone()]) {
            Resolution::Existing {
                game_id,
                match_record,
            } => {
                assert_eq!(game_id, cand.game_id);
                assert!(match_record.is_none());
            }
            other => panic!("expected external id match, got {:?}", other),
        }
    }

    #[test]
    fn title_exact_match_records_pending_review() {
        let cand = candidate("The Witcher 3: Wild Hunt");
        let inc = incoming("The Witcher 3 - Wild Hunt (Game of the Year Edition)");

        match resolve("gog", &inc, &[cand.clone()]) {
            Resolution::Existing {
                game_id,
                match_record: Some(record),
            } => {
                assert_eq!(game_id, cand.game_id);
                assert_eq!(record.method, MatchMethod::TitleExact);
                assert!((record.confidence - 0.95).abs() < f32::EPSILON);
            }
            other => panic!("expected title exact match, got {:?}", other),
        }
    }

    #[test]
    fn fuzzy_match_requires_attribution_agreement() {
        let mut cand = candidate("Hollow Knight Silksong");
        cand.publisher = Some("Team Cherry".to_string());

        let mut inc = incoming("Hollow Knight: Silksongg");
        // No publisher on the incoming side: fuzzy is skipped.
        assert_eq!(resolve("gog", &inc, &[cand.clone()]), Resolution::New);

        inc.publisher = Some("team cherry".to_string());
        match resolve("gog", &inc, &[cand.clone()]) {
            Resolution::Existing {
                match_record: Some(record),
                ..
            } => {
                assert_eq!(record.method, MatchMethod::TitleFuzzy);
                assert!(record.confidence >= FUZZY_THRESHOLD as f32);
            }
            other => panic!("expected fuzzy match, got {:?}", other),
        }
    }

    #[test]
    fn unrelated_titles_create_new_games() {
        let cand = candidate("Stardew Valley");
        assert_eq!(resolve("steam", &incoming("Factorio"), &[cand]), Resolution::New);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(title_similarity("hades", "hades"), 1.0);
        assert!(title_similarity("hades", "hades ii") < 1.0);
        assert!(title_similarity("", "") == 1.0);
    }
}
