#![forbid(unsafe_code)]

/// Score floor for containment hits; a short needle inside a long haystack
/// still counts as a strong signal.
pub const CONTAINMENT_FLOOR: f64 = 0.7;

/// Edit distance over Unicode code points.
pub fn levenshtein(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Trimmed, lower-cased comparison form.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Similarity in `[0, 1]`:
/// exact (case-insensitive, trimmed) is 1.0, containment in either direction
/// is `max(0.7, shorter/longer)`, anything else is normalized edit distance.
/// An empty side always scores 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let (shorter, longer) = if a_len <= b_len {
        (a_len, b_len)
    } else {
        (b_len, a_len)
    };

    if a.contains(b.as_str()) || b.contains(a.as_str()) {
        let ratio = shorter as f64 / longer as f64;
        return ratio.max(CONTAINMENT_FLOOR).min(1.0);
    }

    let distance = levenshtein(&a, &b) as f64;
    (1.0 - distance / longer as f64).clamp(0.0, 1.0)
}

/// Best similarity of `needle` against any candidate; 0 when none.
pub fn best_similarity<'a, I>(needle: &str, candidates: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|candidate| similarity(needle, candidate))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_similarity_01_exact_match_ignores_case_and_padding() {
        assert_eq!(similarity("  Symptoms ", "symptoms"), 1.0);
        assert_eq!(similarity("ÉCOLE", "école"), 1.0);
    }

    #[test]
    fn at_similarity_02_empty_side_scores_zero() {
        assert_eq!(similarity("", "name"), 0.0);
        assert_eq!(similarity("name", "   "), 0.0);
        assert_eq!(similarity("", ""), 0.0);
    }

    #[test]
    fn at_similarity_03_containment_uses_floor_or_ratio() {
        assert_eq!(similarity("name", "first name of patient"), CONTAINMENT_FLOOR);
        let expected = 9.0 / 10.0;
        assert!((similarity("last name", "last names") - expected).abs() < 1e-9);
    }

    #[test]
    fn at_similarity_04_edit_distance_fallback() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        let expected = 1.0 - 3.0 / 7.0;
        assert!((similarity("kitten", "sitting") - expected).abs() < 1e-9);
    }

    #[test]
    fn at_similarity_05_levenshtein_counts_code_points() {
        assert_eq!(levenshtein("naïve", "naive"), 1);
        assert_eq!(levenshtein("日本語", "日本"), 1);
    }

    #[test]
    fn at_similarity_06_best_similarity_picks_max() {
        let best = best_similarity("Email", ["Phone", "E-mail address", "email"]);
        assert_eq!(best, 1.0);
        assert_eq!(best_similarity("Email", std::iter::empty()), 0.0);
    }
}
