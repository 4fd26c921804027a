//! Fuzzy, order-insensitive cache-key derivation.
//!
//! Two queries that reduce to the same bag of significant words (case,
//! accents, punctuation and word order aside) must produce the same key so
//! the response cache can reuse answers across rephrasings. The hash is a
//! 32-bit rolling hash, not a cryptographic one: collisions across unrelated
//! queries are tolerated in exchange for the higher hit rate.

/// Reduce a query to its normalized token string.
///
/// Pipeline: lowercase + trim → fold accented Latin vowels → strip every
/// character that is neither a word character (`[A-Za-z0-9_]`) nor
/// whitespace → drop tokens of length <= 2 → sort lexicographically →
/// rejoin with single spaces.
pub fn normalize(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped: String = lowered
        .trim()
        .chars()
        .map(fold_vowel)
        .filter(|c| is_word_char(*c) || c.is_whitespace())
        .collect();

    let mut tokens: Vec<&str> = stripped
        .split_whitespace()
        .filter(|token| token.len() > 2)
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Derive the cache key for a query: `"query_" + abs(hash(normalize(q)))`.
///
/// The hash is computed over UTF-16 code units with wrapping 32-bit signed
/// arithmetic (`h = (h << 5) - h + unit` at each step), so keys are stable
/// across platforms and match keys minted by earlier clients. An empty
/// token set hashes the empty string and yields `"query_0"`.
pub fn query_hash(query: &str) -> String {
    let normalized = normalize(query);
    let mut hash: i32 = 0;
    for unit in normalized.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    format!("query_{}", hash.unsigned_abs())
}

fn fold_vowel(c: char) -> char {
    match c {
        'à' | 'á' | 'ä' | 'â' => 'a',
        'è' | 'é' | 'ë' | 'ê' => 'e',
        'ì' | 'í' | 'ï' | 'î' => 'i',
        'ò' | 'ó' | 'ö' | 'ô' => 'o',
        'ù' | 'ú' | 'ü' | 'û' => 'u',
        _ => c,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_order_is_irrelevant() {
        assert_eq!(query_hash("Cross Blue Dream!"), query_hash("blue dream cross"));
        assert_eq!(normalize("Cross Blue Dream!"), "blue cross dream");
    }

    #[test]
    fn case_and_punctuation_are_irrelevant() {
        assert_eq!(query_hash("BLUE DREAM???"), query_hash("blue... dream"));
    }

    #[test]
    fn accented_vowels_fold_to_base_form() {
        assert_eq!(normalize("qualità più alta"), normalize("qualita piu alta"));
        // The apostrophe is stripped, not treated as a separator, so the two
        // words around it fuse into one token.
        assert_eq!(query_hash("Effetti dell'umidità"), query_hash("effetti dellumidita"));
    }

    #[test]
    fn short_tokens_are_dropped() {
        // "a", "of", "is" all have length <= 2 and vanish.
        assert_eq!(normalize("a cross of is blue dream"), "blue cross dream");
    }

    #[test]
    fn all_short_tokens_normalize_to_empty_and_hash_deterministically() {
        assert_eq!(normalize("a of is it"), "");
        assert_eq!(query_hash("a of is it"), "query_0");
        assert_eq!(query_hash(""), "query_0");
        assert_eq!(query_hash("   "), "query_0");
    }

    #[test]
    fn hash_is_stable() {
        // Pin a known value so accidental pipeline changes are caught; keys
        // must stay compatible with records minted by earlier clients.
        assert_eq!(query_hash("Cross Blue Dream!"), "query_580769443");

        let key = query_hash("blue dream cross");
        assert_eq!(key, query_hash("blue dream cross"));
        assert!(key.starts_with("query_"));
        let numeric: u64 = key.trim_start_matches("query_").parse().unwrap();
        // abs() of an i32 always fits in 31 bits plus one.
        assert!(numeric <= u64::from(i32::MAX as u32) + 1);
    }

    #[test]
    fn distinct_token_bags_usually_differ() {
        assert_ne!(query_hash("blue dream cross"), query_hash("sour diesel grow"));
    }

    #[test]
    fn underscores_survive_stripping() {
        // '_' is a word character, so it neither splits nor disappears.
        assert_eq!(normalize("blue_dream cross"), "blue_dream cross");
    }
}
