//! Keyword-driven derivation of record metadata: query topic, strain-name
//! extraction, and the preference tags the context builder folds into the
//! system prompt.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::schema::QueryType;

/// Classify a query into its coarse topic. First matching bucket wins;
/// matching is case-insensitive substring search so partial stems
/// (`coltiv`, `terapeutic`) cover their inflections.
pub fn classify_query(query: &str) -> QueryType {
    let q = query.to_lowercase();
    if contains_any(&q, &["incrocio", "cross", "breed"]) {
        QueryType::Breeding
    } else if contains_any(&q, &["effetti", "effects", "high"]) {
        QueryType::Effects
    } else if contains_any(&q, &["coltiv", "grow", "fioritura"]) {
        QueryType::Cultivation
    } else if contains_any(&q, &["medical", "terapeutic", "cbd"]) {
        QueryType::Medical
    } else if contains_any(&q, &["terpeni", "sapore", "aroma"]) {
        QueryType::Terpenes
    } else {
        QueryType::General
    }
}

// Strain names are conventionally capitalized multi-word phrases
// ("Blue Dream", "OG Kush", "Gorilla Glue #4"). Capitalized phrases that are
// ordinary prose get filtered through the exclusion list.
static STRAIN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[A-Z][a-z]+ [A-Z][a-z]+ [A-Z][a-z]+",
        r"[A-Z][a-z]+ [A-Z][a-z]+",
        r"[A-Z][a-z]+ #\d+",
        r"[A-Z]{2,} [A-Z][a-z]+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static strain pattern compiles"))
    .collect()
});

const STRAIN_EXCLUSIONS: &[&str] = &["The Best", "La Migliore", "Il Risultato"];

/// Extract candidate strain names mentioned in a block of text.
///
/// Derived, not authoritative: the patterns over-approximate and the result
/// is only used for context building and analytics rollups. Order is
/// first-seen, duplicates removed.
pub fn extract_strains(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut strains = Vec::new();

    for pattern in STRAIN_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            let candidate = m.as_str();
            if STRAIN_EXCLUSIONS.contains(&candidate) {
                continue;
            }
            if seen.insert(candidate.to_string()) {
                strains.push(candidate.to_string());
            }
        }
    }

    strains
}

// ── Preference tags ──────────────────────────────────────────────────────────

/// Effect preferences detected in queries. Extendable: add a row, nothing
/// else changes.
pub const EFFECT_TAGS: &[(&str, &[&str])] = &[
    ("energetic", &["energetic", "energizzante"]),
    ("relaxing", &["relax", "rilassante"]),
];

/// Plant-type preferences detected in queries.
pub const TYPE_TAGS: &[(&str, &[&str])] = &[
    ("sativa", &["sativa"]),
    ("indica", &["indica"]),
];

/// Scan a query for the given tag table; returns the tags whose keyword list
/// matched, in table order (binary presence, no counts).
pub fn detect_tags(query: &str, tags: &[(&'static str, &[&str])]) -> Vec<&'static str> {
    let q = query.to_lowercase();
    tags.iter()
        .filter(|(_, keywords)| contains_any(&q, keywords))
        .map(|(tag, _)| *tag)
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_bucket() {
        assert_eq!(classify_query("Come faccio un incrocio?"), QueryType::Breeding);
        assert_eq!(classify_query("What are the effects?"), QueryType::Effects);
        assert_eq!(classify_query("tempi di fioritura indoor"), QueryType::Cultivation);
        assert_eq!(classify_query("uso terapeutico del cbd"), QueryType::Medical);
        assert_eq!(classify_query("che aroma ha?"), QueryType::Terpenes);
        assert_eq!(classify_query("ciao come stai"), QueryType::General);
    }

    #[test]
    fn classification_priority_is_breeding_first() {
        // Mentions both breeding and effects; breeding wins.
        assert_eq!(
            classify_query("effetti di un cross tra due sative"),
            QueryType::Breeding
        );
    }

    #[test]
    fn extracts_two_word_strains() {
        let strains = extract_strains("Ti consiglio Blue Dream oppure Sour Diesel.");
        assert!(strains.contains(&"Blue Dream".to_string()));
        assert!(strains.contains(&"Sour Diesel".to_string()));
    }

    #[test]
    fn extracts_numbered_and_acronym_strains() {
        let strains = extract_strains("Gorilla #4 è figlia di OG Kush.");
        assert!(strains.contains(&"Gorilla #4".to_string()));
        assert!(strains.contains(&"OG Kush".to_string()));
    }

    #[test]
    fn excludes_known_prose_phrases() {
        let strains = extract_strains("The Best choice è Northern Lights, Il Risultato è ottimo.");
        assert!(!strains.contains(&"The Best".to_string()));
        assert!(!strains.contains(&"Il Risultato".to_string()));
        assert!(strains.contains(&"Northern Lights".to_string()));
    }

    #[test]
    fn extraction_deduplicates_preserving_first_seen_order() {
        let strains = extract_strains("Blue Dream, ancora Blue Dream, poi White Widow.");
        assert_eq!(strains.iter().filter(|s| *s == "Blue Dream").count(), 1);
        let blue = strains.iter().position(|s| s == "Blue Dream").unwrap();
        let widow = strains.iter().position(|s| s == "White Widow").unwrap();
        assert!(blue < widow);
    }

    #[test]
    fn detects_effect_and_type_tags() {
        assert_eq!(
            detect_tags("cerco qualcosa di rilassante", EFFECT_TAGS),
            vec!["relaxing"]
        );
        assert_eq!(
            detect_tags("What's a good relaxing strain?", EFFECT_TAGS),
            vec!["relaxing"]
        );
        assert_eq!(detect_tags("meglio sativa o indica?", TYPE_TAGS), vec!["sativa", "indica"]);
        assert!(detect_tags("domanda generica", EFFECT_TAGS).is_empty());
    }

    #[test]
    fn detected_tags_outlive_the_scanned_query() {
        // The returned tag names come from the static tables, not the query.
        let tags = {
            let query = String::from("qualcosa di rilassante ed energizzante");
            detect_tags(&query, EFFECT_TAGS)
        };
        assert_eq!(tags, vec!["energetic", "relaxing"]);
    }
}
