//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Overrides from
//! `[telemetry.custom_pricing]` replace or extend the built-in entries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokenwise_config::PricingOverrideConfig;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    pub fn input_cost(&self, tokens: usize) -> f64 {
        tokens as f64 * self.input_per_m / 1_000_000.0
    }

    pub fn output_cost(&self, tokens: usize) -> f64 {
        tokens as f64 * self.output_per_m / 1_000_000.0
    }
}

impl From<&PricingOverrideConfig> for ModelPricing {
    fn from(cfg: &PricingOverrideConfig) -> Self {
        Self::new(cfg.input_per_m, cfg.output_per_m)
    }
}

const BUILTIN_PRICES: &[(&str, f64, f64)] = &[
    ("anthropic/claude-sonnet-4", 3.0, 15.0),
    ("anthropic/claude-opus-4", 15.0, 75.0),
    ("anthropic/claude-3.5-sonnet", 3.0, 15.0),
    ("anthropic/claude-3.5-haiku", 0.8, 4.0),
    ("openai/gpt-4o", 2.5, 10.0),
    ("openai/gpt-4o-mini", 0.15, 0.6),
    ("openai/gpt-4-turbo", 10.0, 30.0),
    ("openai/o3-mini", 1.1, 4.4),
    ("azure/gpt-4o", 2.5, 10.0),
    ("azure/gpt-4o-mini", 0.15, 0.6),
    ("google/gemini-2.0-flash", 0.1, 0.4),
    ("google/gemini-1.5-pro", 1.25, 5.0),
    ("mistral/mistral-large", 2.0, 6.0),
    ("deepseek/deepseek-v3", 0.27, 1.1),
];

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let prices = BUILTIN_PRICES
            .iter()
            .map(|(name, input, output)| ((*name).to_string(), ModelPricing::new(*input, *output)))
            .collect();
        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Built-in prices plus the configured overrides.
    pub fn with_overrides(overrides: &HashMap<String, PricingOverrideConfig>) -> Self {
        let table = Self::with_defaults();
        for (model, cfg) in overrides {
            table.set(model.clone(), cfg.into());
        }
        table
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name.
    ///
    /// Tries an exact match, then the bare name against any provider prefix
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest known bare name that
    /// prefixes the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let bare = bare_name(model).to_lowercase();
        let mut best: Option<(usize, ModelPricing)> = None;
        for (key, pricing) in prices.iter() {
            let key_bare = bare_name(key).to_lowercase();
            if bare == key_bare {
                return Some(*pricing);
            }
            if bare.starts_with(&key_bare) && best.is_none_or(|(len, _)| key_bare.len() > len) {
                best = Some((key_bare.len(), *pricing));
            }
        }
        best.map(|(_, p)| p)
    }

    /// Cost of `tokens` prompt tokens. Unknown models cost 0.0.
    pub fn prompt_cost(&self, model: &str, tokens: usize) -> f64 {
        self.resolve(model)
            .map(|p| p.input_cost(tokens))
            .unwrap_or(0.0)
    }

    /// Cost of `tokens` completion tokens. Unknown models cost 0.0.
    pub fn completion_cost(&self, model: &str, tokens: usize) -> f64 {
        self.resolve(model)
            .map(|p| p.output_cost(tokens))
            .unwrap_or(0.0)
    }

    /// All known model names, sorted.
    pub fn models(&self) -> Vec<(String, ModelPricing)> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, ModelPricing)> =
            prices.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn bare_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}
