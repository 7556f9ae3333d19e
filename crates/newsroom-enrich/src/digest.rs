//! Extractive digest: keeps the lead plus the most keyword-dense sentences so
//! remote prompts stay small.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9']+").expect("valid word regex"));

pub(crate) const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "you", "your", "they",
    "their", "them", "this", "these", "those", "or", "but", "not", "have", "had", "been", "if",
];

const LEAD_SENTENCES: usize = 2;
const KEYWORD_COUNT: usize = 12;
const MIN_SELECTED: usize = 3;

/// Filtered text is only used when at least this long.
pub const MIN_FILTERED_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSelector {
    /// Inputs with at most this many sentences pass through untouched.
    pub threshold: usize,
    pub max_sentences: usize,
}

impl DigestSelector {
    pub const SUMMARY: Self = Self {
        threshold: 3,
        max_sentences: 5,
    };

    pub const CLASSIFIER: Self = Self {
        threshold: 4,
        max_sentences: 4,
    };

    pub fn select(&self, text: &str) -> String {
        let sentences = split_sentences(text);
        if sentences.len() <= self.threshold {
            return text.to_string();
        }

        let keywords = extract_keywords(&sentences);
        if keywords.is_empty() {
            return sentences[..self.max_sentences.min(sentences.len())].join(" ");
        }

        let scores: Vec<usize> = sentences
            .iter()
            .map(|s| keyword_overlap(s, &keywords))
            .collect();

        let mut tail: Vec<usize> = (LEAD_SENTENCES.min(sentences.len())..sentences.len()).collect();
        tail.sort_by(|&a, &b| {
            (scores[b], sentences[b].chars().count()).cmp(&(scores[a], sentences[a].chars().count()))
        });

        let mut selected: Vec<usize> = (0..LEAD_SENTENCES.min(sentences.len())).collect();
        for idx in tail {
            if selected.len() >= self.max_sentences {
                break;
            }
            if scores[idx] == 0 {
                continue;
            }
            selected.push(idx);
        }
        if selected.len() < MIN_SELECTED {
            selected = (0..self.max_sentences.min(sentences.len())).collect();
        }
        selected.sort_unstable();

        selected
            .into_iter()
            .map(|idx| sentences[idx].as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Digest only when the result keeps enough material to be worth sending.
    pub fn shrink_for_prompt(&self, text: &str) -> String {
        let collapsed = collapse_whitespace(text);
        let filtered = self.select(&collapsed);
        if filtered.chars().count() >= MIN_FILTERED_CHARS {
            filtered
        } else {
            collapsed
        }
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits after `.`, `!` or `?` when the next word starts with a capital or digit.
pub fn split_sentences(text: &str) -> Vec<String> {
    let cleaned = collapse_whitespace(text);
    let chars: Vec<char> = cleaned.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    for i in 0..chars.len() {
        let boundary = matches!(chars[i], '.' | '!' | '?')
            && chars.get(i + 1) == Some(&' ')
            && chars
                .get(i + 2)
                .is_some_and(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if boundary {
            sentences.push(chars[start..=i].iter().collect::<String>());
            start = i + 2;
        }
    }
    if start < chars.len() {
        sentences.push(chars[start..].iter().collect::<String>());
    }

    sentences
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD_RE.find_iter(text).map(|m| m.as_str().to_lowercase())
}

pub(crate) fn is_content_word(word: &str) -> bool {
    if STOPWORDS.contains(&word) {
        return false;
    }
    word.chars().count() >= 3 || word.chars().all(|c| c.is_ascii_digit())
}

/// Most frequent content words; ties keep first-seen order.
fn extract_keywords(sentences: &[String]) -> HashSet<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in sentences.iter().flat_map(|s| words(s)).enumerate() {
        if !is_content_word(&word) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(KEYWORD_COUNT)
        .map(|(word, _)| word)
        .collect()
}

fn keyword_overlap(sentence: &str, keywords: &HashSet<String>) -> usize {
    words(sentence)
        .collect::<HashSet<_>>()
        .intersection(keywords)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORY: &str = "Storm Ida made landfall in Louisiana on Sunday. Power was cut to a million homes. \
        Officials said the storm surge breached two levees in Plaquemines. \
        A local bakery reopened after renovations. \
        The storm weakened inland but flooding from the surge continued across Louisiana. \
        Sports fixtures were postponed. \
        Federal officials promised storm relief for flooded Louisiana parishes.";

    #[test]
    fn splits_on_terminal_punctuation_before_capitals_and_digits() {
        let sentences = split_sentences("Rates rose. 3 banks failed!  Why? because.   Done.");
        assert_eq!(
            sentences,
            vec!["Rates rose.", "3 banks failed!", "Why? because.", "Done."]
        );
    }

    #[test]
    fn short_inputs_pass_through_unchanged() {
        let text = "One. Two.\n\nThree.";
        assert_eq!(DigestSelector::SUMMARY.select(text), text);
        assert_eq!(DigestSelector::CLASSIFIER.select(""), "");
    }

    #[test]
    fn keeps_lead_and_keyword_dense_sentences_in_original_order() {
        let digest = DigestSelector::CLASSIFIER.select(STORY);
        let kept = split_sentences(&digest);

        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0], "Storm Ida made landfall in Louisiana on Sunday.");
        assert_eq!(kept[1], "Power was cut to a million homes.");
        assert!(!digest.contains("bakery"));
        assert!(!digest.contains("Sports fixtures"));

        let positions: Vec<usize> = kept
            .iter()
            .map(|s| STORY.find(s.as_str()).expect("sentence from input"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn second_pass_is_a_noop() {
        let once = DigestSelector::CLASSIFIER.select(STORY);
        assert_eq!(DigestSelector::CLASSIFIER.select(&once), once);
    }

    #[test]
    fn keywordless_text_falls_back_to_leading_sentences() {
        let text = "It is. He was. It had. If so. Or not. By me.";
        assert_eq!(
            DigestSelector::CLASSIFIER.select(text),
            "It is. He was. It had. If so."
        );
    }

    #[test]
    fn short_digests_fall_back_to_collapsed_input() {
        let text = "Alpha  rose.\nBeta fell. Gamma held. Delta slid. Epsilon won.";
        assert_eq!(
            DigestSelector::CLASSIFIER.shrink_for_prompt(text),
            "Alpha rose. Beta fell. Gamma held. Delta slid. Epsilon won."
        );
    }
}
