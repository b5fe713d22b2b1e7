//! Sentence segmentation and language scoring.
//!
//! The pipeline treats this module as an oracle: given a message's text it
//! returns one scorecard per detected sentence, each with the raw tokens,
//! the cleaned tokens used for counting, and a score in `[0, 1]`. A sentence
//! at or above 0.8 counts as in-language.
//!
//! The scorer is deliberately self-contained and deterministic: a token
//! passes if it is a dictionary word, fits the language's phonotactics, or
//! looks like a proper name. The per-sentence score is the passing ratio,
//! softened so that longer sentences tolerate the odd stray token.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// The output of the scorer for one sentence.
#[derive(Debug, Clone)]
pub struct Scorecard {
    /// Raw whitespace tokens as they appeared in the text.
    pub tokens: Vec<String>,
    /// Lowercased tokens with edge punctuation stripped; never empty strings.
    pub cleaned: Vec<String>,
    /// Language score in `[0, 1]`.
    pub score: f64,
}

/// Dictionary of recognized words (pu plus widely used ku additions).
/// A handful of words that double as common English tokens are deliberately
/// absent; they are still discovered phonotactically inside real sentences.
const WORDS: &[&str] = &[
    "a", "akesi", "ala", "alasa", "ale", "ali", "anpa", "ante", "anu", "awen", "e", "en", "epiku",
    "esun", "ijo", "ike", "ilo", "insa", "jaki", "jan", "jasima", "jelo", "jo", "kala", "kalama",
    "kama", "kasi", "ken", "kepeken", "kijetesantakalu", "kili", "kin", "kipisi", "kiwen", "ko",
    "kokosila", "kon", "ku", "kule", "kulupu", "kute", "la", "lanpan", "lape", "laso", "lawa",
    "leko", "len", "lete", "li", "lili", "linja", "lipu", "loje", "lon", "luka", "lukin", "lupa",
    "ma", "mama", "mani", "meli", "meso", "mi", "mije", "misikeke", "moku", "moli", "monsi",
    "monsuta", "mu", "mun", "musi", "mute", "n", "namako", "nanpa", "nasa", "nasin", "nena",
    "ni", "nimi", "noka", "o", "oko", "olin", "ona", "open", "pakala", "pali", "palisa", "pan",
    "pana", "pi", "pilin", "pimeja", "pini", "pipi", "poka", "poki", "pona", "sama", "seli",
    "selo", "seme", "sewi", "sijelo", "sike", "sin", "sina", "sinpin", "sitelen", "soko", "sona",
    "soweli", "suli", "suno", "supa", "suwi", "tan", "taso", "tawa", "telo", "tenpo", "toki",
    "tomo", "tonsi", "tu", "unpa", "uta", "utala", "walo", "wan", "waso", "wawa", "wile",
];

fn dictionary() -> &'static HashSet<&'static str> {
    static DICT: OnceLock<HashSet<&'static str>> = OnceLock::new();
    DICT.get_or_init(|| WORDS.iter().copied().collect())
}

/// Markup that should never reach the tokenizer: URLs, emotes, channel and
/// user references.
fn preprocess(text: &str) -> String {
    static RES: OnceLock<Option<[Regex; 4]>> = OnceLock::new();
    let Some(res) = RES
        .get_or_init(|| {
            let build = |p| Regex::new(p).ok();
            Some([
                build(r"https?://\S+")?,
                build(r"<a?:\w+:\d+>")?,
                build(r"<#\d+>")?,
                build(r"<@[!&]?\d+>")?,
            ])
        })
        .as_ref()
    else {
        return text.to_string();
    };

    let mut out = text.to_string();
    for re in res {
        out = re.replace_all(&out, " ").into_owned();
    }
    out
}

/// Collapse runs of the same letter for dictionary matching ("ponaaa" → "pona").
fn collapse_duplicates(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut prev = None;
    for c in token.chars() {
        if prev != Some(c) {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

/// Whether a token fits the language's syllable shape: optional consonant
/// onset, vowel, optional n coda; `ji`, `ti`, `wo` and `wu` never occur.
fn is_syllabic(token: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?:[klmnps][aeiou]|[jt][aeou]|w[aei]|[aeiou])n?)+$").ok()
    })
    .as_ref()
    .is_some_and(|re| re.is_match(token))
}

/// Proper names are capitalized and otherwise lowercase.
fn is_proper_name(raw: &str) -> bool {
    let mut chars = raw.chars();
    chars
        .next()
        .is_some_and(|first| first.is_uppercase() && chars.all(|c| c.is_lowercase()))
}

fn strip_edge_punctuation(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

fn token_passes(raw: &str, cleaned: &str) -> bool {
    let collapsed = collapse_duplicates(cleaned);
    dictionary().contains(collapsed.as_str())
        || is_syllabic(&collapsed)
        || is_proper_name(strip_edge_punctuation(raw))
}

/// Score one sentence's cleaned tokens against their raw forms.
fn score_sentence(raw: &[String], cleaned: &[String]) -> f64 {
    debug_assert_eq!(raw.len(), cleaned.len());
    if cleaned.is_empty() {
        return 0.0;
    }
    let passing = raw
        .iter()
        .zip(cleaned)
        .filter(|(r, c)| token_passes(r, c))
        .count();
    let ratio = passing as f64 / cleaned.len() as f64;
    // soften by sentence length: one stray token in a long sentence is
    // tolerated, a one-word sentence must pass outright
    ratio.powf(1.0 / (cleaned.len() as f64).sqrt())
}

/// Segment a message into scored sentences. Sentences with no usable
/// tokens are not reported.
pub fn scorecards(text: &str) -> Vec<Scorecard> {
    let text = preprocess(text);

    text.split(['.', '!', '?', ';', ':', '\u{00b7}', '\u{2026}', '\n'])
        .filter_map(|segment| {
            let tokens: Vec<String> = segment.split_whitespace().map(ToString::to_string).collect();

            let mut raw = Vec::new();
            let mut cleaned = Vec::new();
            for token in &tokens {
                let stripped = strip_edge_punctuation(token).to_lowercase();
                // bare punctuation and numbers carry no language signal
                if stripped.is_empty() || stripped.chars().all(|c| c.is_ascii_digit()) {
                    continue;
                }
                raw.push(token.clone());
                cleaned.push(stripped);
            }
            if cleaned.is_empty() {
                return None;
            }

            let score = score_sentence(&raw, &cleaned);
            Some(Scorecard {
                tokens,
                cleaned,
                score,
            })
        })
        .collect()
}

/// Token-weighted mean of sentence scores; zero for messages with no
/// sentences.
#[must_use]
pub fn message_score(cards: &[Scorecard]) -> f64 {
    let total: usize = cards.iter().map(|c| c.cleaned.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = cards
        .iter()
        .map(|c| c.score * c.cleaned.len() as f64)
        .sum();
    weighted / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PASSING_SCORE;

    #[test]
    fn test_plain_sentence_passes() {
        let cards = scorecards("mi kama sona e toki pona");
        assert_eq!(cards.len(), 1);
        assert_eq!(
            cards[0].cleaned,
            vec!["mi", "kama", "sona", "e", "toki", "pona"]
        );
        assert!(cards[0].score >= PASSING_SCORE);
    }

    #[test]
    fn test_english_fails() {
        let cards = scorecards("the quick brown fox jumped over everything");
        assert_eq!(cards.len(), 1);
        assert!(cards[0].score < PASSING_SCORE);
    }

    #[test]
    fn test_sentence_splitting() {
        let cards = scorecards("toki! mi pona. sina seme");
        assert_eq!(cards.len(), 3);
        assert_eq!(cards[0].cleaned, vec!["toki"]);
        assert_eq!(cards[2].cleaned, vec!["sina", "seme"]);
    }

    #[test]
    fn test_middle_dot_splits_sentences() {
        let cards = scorecards("toki pona \u{00b7} mi moku");
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].cleaned, vec!["toki", "pona"]);
        assert_eq!(cards[1].cleaned, vec!["mi", "moku"]);
    }

    #[test]
    fn test_markup_and_numbers_dropped() {
        let cards = scorecards("toki <@12345> lon https://example.com tenpo 42");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].cleaned, vec!["toki", "lon", "tenpo"]);
        assert!(cards[0].score >= PASSING_SCORE);
    }

    #[test]
    fn test_punctuation_stripped_lowercased() {
        let cards = scorecards("Toki, pona");
        assert_eq!(cards[0].cleaned, vec!["toki", "pona"]);
    }

    #[test]
    fn test_proper_name_tolerated() {
        let cards = scorecards("jan Sonja li pona tawa mi");
        assert!(cards[0].score >= PASSING_SCORE);
    }

    #[test]
    fn test_phonotactic_discovery() {
        // not in the dictionary, but shaped like the language
        assert!(is_syllabic("kijetesantakalu"));
        assert!(!is_syllabic("world"));
        assert!(!is_syllabic("ti"));
        assert!(!is_syllabic("wu"));
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        assert!(scorecards("").is_empty());
        assert!(scorecards("?!... 123").is_empty());
    }

    #[test]
    fn test_message_score_weighting() {
        let cards = vec![
            Scorecard {
                tokens: vec!["toki".into()],
                cleaned: vec!["toki".into()],
                score: 1.0,
            },
            Scorecard {
                tokens: vec!["x".into(); 3],
                cleaned: vec!["x".into(); 3],
                score: 0.0,
            },
        ];
        assert!((message_score(&cards) - 0.25).abs() < 1e-9);
        assert!((message_score(&[]) - 0.0).abs() < f64::EPSILON);
    }
}
