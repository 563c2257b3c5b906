//! Lexical relevance scoring.
//!
//! `score = matched query words / query words`, plus a title bonus of
//! `title_bonus × title match fraction`, clamped to `[0, 1]`. Only words
//! longer than `min_word_length` characters count; everything is
//! case-folded. Both constants are heuristics exposed through
//! `[optimization]` in the config file.

use std::collections::HashSet;
use tokenwise_config::OptimizationConfig;

#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    min_word_length: usize,
    title_bonus: f64,
}

impl RelevanceScorer {
    pub fn new(min_word_length: usize, title_bonus: f64) -> Self {
        Self {
            min_word_length,
            title_bonus,
        }
    }

    pub fn from_config(config: &OptimizationConfig) -> Self {
        Self::new(config.min_word_length, config.title_bonus)
    }

    /// Score `content` (and optionally its `title`) against `query`.
    ///
    /// Empty query or empty content scores 0.
    pub fn score(&self, query: &str, content: &str, title: Option<&str>) -> f64 {
        let query_words = self.distinct_words(query);
        if query_words.is_empty() || content.trim().is_empty() {
            return 0.0;
        }

        let content_words = word_set(content);
        let matches = query_words
            .iter()
            .filter(|w| content_words.contains(w.as_str()))
            .count();
        let mut score = matches as f64 / query_words.len() as f64;

        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            let title_words = word_set(title);
            let title_matches = query_words
                .iter()
                .filter(|w| title_words.contains(w.as_str()))
                .count();
            score += self.title_bonus * (title_matches as f64 / query_words.len() as f64);
        }

        score.clamp(0.0, 1.0)
    }

    /// Every significant word in `text`, in order, repeats included.
    pub fn significant_words(&self, text: &str) -> Vec<String> {
        words(text)
            .filter(|w| w.chars().count() > self.min_word_length)
            .collect()
    }

    /// Distinct significant words in `text`.
    pub fn distinct_words(&self, text: &str) -> HashSet<String> {
        self.significant_words(text).into_iter().collect()
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::from_config(&OptimizationConfig::default())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn word_set(text: &str) -> HashSet<String> {
    words(text).collect()
}
