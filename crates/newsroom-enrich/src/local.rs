//! CPU-only fallbacks used when the remote provider is missing or fails.
//!
//! Both models are deterministic for a given input and run on the blocking
//! pool, so they must not touch the async runtime.

use std::collections::HashMap;

use newsroom_core::Category;
use strsim::jaro_winkler;
use thiserror::Error;

use crate::digest::{is_content_word, split_sentences, words};

#[derive(Debug, Error)]
pub enum LocalModelError {
    #[error("input text is empty")]
    EmptyInput,
    #[error("no candidate labels supplied")]
    NoLabels,
}

pub trait LocalSummarizer: Send + Sync {
    fn summarize(&self, text: &str) -> Result<String, LocalModelError>;
}

pub trait LocalClassifier: Send + Sync {
    /// Candidate labels ranked best first, with their scores.
    fn rank(&self, text: &str, labels: &[Category]) -> Result<Vec<(Category, f64)>, LocalModelError>;
}

/// Frequency-scored sentence extraction bounded by a token budget.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveSummarizer {
    /// Input is hard-truncated to this many whitespace tokens.
    pub max_input_tokens: usize,
    pub min_output_tokens: usize,
    pub max_output_tokens: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_input_tokens: 900,
            min_output_tokens: 80,
            max_output_tokens: 200,
        }
    }
}

impl LocalSummarizer for ExtractiveSummarizer {
    fn summarize(&self, text: &str) -> Result<String, LocalModelError> {
        let tokens: Vec<&str> = text.split_whitespace().take(self.max_input_tokens).collect();
        if tokens.is_empty() {
            return Err(LocalModelError::EmptyInput);
        }
        if tokens.len() <= self.min_output_tokens {
            return Ok(tokens.join(" "));
        }

        let truncated = tokens.join(" ");
        let sentences = split_sentences(&truncated);

        let mut freq: HashMap<String, usize> = HashMap::new();
        for word in words(&truncated).filter(|w| is_content_word(w)) {
            *freq.entry(word).or_default() += 1;
        }

        let mut scored: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(idx, sentence)| {
                let content: Vec<String> = words(sentence).filter(|w| is_content_word(w)).collect();
                let total: usize = content.iter().filter_map(|w| freq.get(w)).sum();
                let score = if content.is_empty() {
                    0.0
                } else {
                    total as f64 / content.len() as f64
                };
                (idx, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut chosen = Vec::new();
        let mut budget = 0usize;
        for (idx, _) in scored {
            let len = sentences[idx].split_whitespace().count();
            if budget + len > self.max_output_tokens {
                continue;
            }
            chosen.push(idx);
            budget += len;
            if budget >= self.min_output_tokens {
                break;
            }
        }

        if chosen.is_empty() {
            return Ok(truncated
                .split_whitespace()
                .take(self.max_output_tokens)
                .collect::<Vec<_>>()
                .join(" "));
        }
        chosen.sort_unstable();
        Ok(chosen
            .into_iter()
            .map(|idx| sentences[idx].as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Lexicon-based zero-shot ranking; near-miss spellings earn partial credit.
#[derive(Debug, Clone, Copy)]
pub struct KeywordZeroShotClassifier {
    pub fuzzy_threshold: f64,
}

impl Default for KeywordZeroShotClassifier {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.93,
        }
    }
}

fn lexicon(label: Category) -> &'static [&'static str] {
    match label {
        Category::Politics => &["election", "parliament", "senate", "congress", "minister", "president", "vote", "campaign", "lawmaker", "party", "governor", "policy"],
        Category::Geopolitics => &["sanction", "diplomat", "treaty", "summit", "alliance", "nato", "embassy", "territorial", "tariff", "bilateral"],
        Category::War => &["war", "military", "troops", "missile", "airstrike", "invasion", "ceasefire", "army", "drone", "shelling", "combat"],
        Category::Economy => &["economy", "inflation", "gdp", "unemployment", "recession", "interest", "rates", "central", "growth", "wages", "jobs"],
        Category::Finance => &["bank", "bond", "lender", "credit", "debt", "loan", "fund", "treasury", "currency", "yield"],
        Category::Stocks => &["stock", "shares", "nasdaq", "dow", "index", "investors", "rally", "equities", "trading", "s&p"],
        Category::Business => &["company", "ceo", "merger", "acquisition", "earnings", "revenue", "profit", "startup", "retailer", "layoffs"],
        Category::Technology => &["tech", "software", "artificial", "chip", "semiconductor", "apple", "google", "microsoft", "smartphone", "cyber", "app"],
        Category::Science => &["scientists", "research", "study", "space", "nasa", "physics", "discovery", "telescope", "species", "researchers"],
        Category::Health => &["health", "hospital", "vaccine", "virus", "disease", "patients", "medical", "cancer", "drug", "outbreak"],
        Category::Energy => &["oil", "gas", "energy", "opec", "solar", "nuclear", "power", "crude", "fuel", "electricity"],
        Category::Environment => &["climate", "emissions", "wildfire", "flood", "drought", "pollution", "environmental", "carbon", "storm", "hurricane"],
        Category::Crypto => &["bitcoin", "crypto", "ethereum", "blockchain", "token", "stablecoin", "coinbase", "mining"],
        Category::Sports => &["match", "league", "goal", "coach", "tournament", "championship", "season", "player", "cup", "football", "tennis", "olympic"],
        Category::Entertainment => &["film", "movie", "music", "album", "celebrity", "actor", "singer", "festival", "series", "box office"],
        Category::Travel => &["airline", "flight", "airport", "tourism", "travel", "passengers", "hotel", "visa", "cruise"],
        Category::Education => &["school", "university", "students", "teachers", "education", "exam", "campus", "tuition"],
        Category::Crime => &["police", "arrest", "court", "murder", "charged", "trial", "prison", "fraud", "shooting", "suspect"],
        Category::Global => &["global", "international", "worldwide", "united nations", "migrants", "humanitarian", "aid", "refugees"],
        Category::General => &[],
    }
}

impl KeywordZeroShotClassifier {
    fn score(&self, tokens: &[String], label: Category) -> f64 {
        let mut score = 0.0;
        for entry in lexicon(label) {
            let parts: Vec<&str> = entry.split_whitespace().collect();
            if parts.len() > 1 {
                if tokens.windows(parts.len()).any(|w| w.iter().zip(&parts).all(|(t, p)| t == p)) {
                    score += 1.5;
                }
                continue;
            }
            for token in tokens {
                if token == entry || (entry.len() >= 4 && token.starts_with(entry)) {
                    score += 1.0;
                } else if token.len() >= 5 && jaro_winkler(token, entry) >= self.fuzzy_threshold {
                    score += 0.5;
                }
            }
        }
        score
    }
}

impl LocalClassifier for KeywordZeroShotClassifier {
    fn rank(&self, text: &str, labels: &[Category]) -> Result<Vec<(Category, f64)>, LocalModelError> {
        if labels.is_empty() {
            return Err(LocalModelError::NoLabels);
        }
        let tokens: Vec<String> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '&'))
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            return Err(LocalModelError::EmptyInput);
        }

        let mut ranked: Vec<(usize, Category, f64)> = labels
            .iter()
            .enumerate()
            .map(|(order, label)| (order, *label, self.score(&tokens, *label)))
            .collect();
        let nothing_matched = ranked.iter().all(|(_, _, s)| *s == 0.0);
        ranked.sort_by(|a, b| {
            if nothing_matched {
                let a_general = a.1 == Category::General;
                let b_general = b.1 == Category::General;
                b_general.cmp(&a_general).then(a.0.cmp(&b.0))
            } else {
                b.2.total_cmp(&a.2).then(a.0.cmp(&b.0))
            }
        });
        Ok(ranked.into_iter().map(|(_, label, s)| (label, s)).collect())
    }
}
