//! Token-overlap scoring for the lexical fallback search.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

static WORD_RE: OnceLock<Regex> = OnceLock::new();

const CJK_CLASS: &str = r"\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}\x{30FC}";

fn word_re() -> &'static Regex {
    WORD_RE.get_or_init(|| {
        let pattern = format!(r"(?P<cjk>[{cjk}]+)|[\w&&[^{cjk}]]+", cjk = CJK_CLASS);
        Regex::new(&pattern).expect("static regex")
    })
}

/// Lowercased tokens in document order.
///
/// CJK script is written without spaces, so each run of it becomes
/// overlapping character bigrams; a single-character run stays a unigram.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for caps in word_re().captures_iter(text) {
        match caps.name("cjk") {
            Some(run) => push_bigrams(run.as_str(), &mut tokens),
            None => {
                if let Some(word) = caps.get(0) {
                    tokens.push(word.as_str().to_lowercase());
                }
            }
        }
    }
    tokens
}

fn push_bigrams(run: &str, tokens: &mut Vec<String>) {
    let chars: Vec<char> = run.chars().collect();
    if chars.len() == 1 {
        tokens.push(run.to_string());
        return;
    }
    tokens.extend(chars.windows(2).map(|pair| pair.iter().collect::<String>()));
}

/// Distinct query terms, in first-seen order. Single ASCII characters are
/// dropped as noise.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|term| term.chars().count() > 1 || !term.is_ascii())
        .filter(|term| seen.insert(term.clone()))
        .collect()
}

/// Fraction of `terms` present in `content`, in [0, 1].
pub fn overlap_score(terms: &[String], content: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(content).into_iter().collect();
    let matched = terms.iter().filter(|term| tokens.contains(*term)).count();
    matched as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_are_lowercased_and_deduplicated() {
        assert_eq!(
            query_terms("Budget, budget and a BUDGET review?"),
            vec!["budget", "and", "review"]
        );
    }

    #[test]
    fn score_is_fraction_of_matched_terms() {
        let terms = query_terms("park budget");
        assert!((overlap_score(&terms, "The park budget passed.") - 1.0).abs() < f32::EPSILON);
        assert!((overlap_score(&terms, "Budgetary notes on the park") - 0.5).abs() < f32::EPSILON);
        assert_eq!(overlap_score(&terms, "Nothing relevant"), 0.0);
        assert_eq!(overlap_score(&[], "anything"), 0.0);
    }

    #[test]
    fn unicode_words_are_tokens() {
        assert_eq!(tokenize("予算 会議"), vec!["予算", "会議"]);
        assert_eq!(query_terms("予 a"), vec!["予"]);
    }

    #[test]
    fn unsegmented_japanese_splits_into_bigrams() {
        assert_eq!(tokenize("予算案"), vec!["予算", "算案"]);
        assert_eq!(tokenize("Park予算2024"), vec!["park", "予算", "2024"]);
    }

    #[test]
    fn japanese_query_matches_inside_a_sentence() {
        let terms = query_terms("予算");
        assert_eq!(terms, vec!["予算"]);
        let score = overlap_score(&terms, "今年度の予算について審議した。");
        assert!((score - 1.0).abs() < f32::EPSILON);

        let terms = query_terms("図書館の予算");
        assert!(overlap_score(&terms, "今年度の予算について審議した。") > 0.0);
        assert_eq!(overlap_score(&terms, "会議の議事録"), 0.0);
    }
}
