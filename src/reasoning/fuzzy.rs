//! Fuzzy name matching over normalized Levenshtein distance.

/// Minimum similarity for a candidate name to be accepted as a match.
pub const MIN_SIMILARITY: f64 = 0.7;

/// Normalized similarity in [0, 1]: 1 is an exact match after folding case
/// and surrounding whitespace.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Whether two names are close enough to be treated as the same card.
pub fn is_match(a: &str, b: &str) -> bool {
    similarity(a, b) >= MIN_SIMILARITY
}

/// The best match for `needle` among `candidates`, if any clears the
/// acceptance threshold.
pub fn best_match<'a>(needle: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (c.as_str(), similarity(needle, c)))
        .filter(|(_, score)| *score >= MIN_SIMILARITY)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(candidate, _)| candidate)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert_eq!(similarity("Charizard", "charizard"), 1.0);
        assert!(is_match("Charizard", "Charizard"));
    }

    #[test]
    fn test_single_typo_clears_threshold() {
        // "Yenusaur" vs "Venusaur": one substitution over eight characters.
        let score = similarity("Yenusaur", "Venusaur");
        assert!(score > 0.85);
        assert!(is_match("Yenusaur", "Venusaur"));
    }

    #[test]
    fn test_unrelated_names_rejected() {
        assert!(!is_match("Charizard", "Pikachu"));
    }

    #[test]
    fn test_best_match_picks_closest() {
        let candidates = vec![
            "Venusaur".to_string(),
            "Ivysaur".to_string(),
            "Bulbasaur".to_string(),
        ];
        assert_eq!(best_match("Yenusaur", &candidates), Some("Venusaur"));
        assert_eq!(best_match("Snorlax", &candidates), None);
    }

    #[test]
    fn test_empty_strings() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }
}
