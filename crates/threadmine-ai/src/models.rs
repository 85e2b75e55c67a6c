//! Model auto-selection against the provider catalog.

use serde::Deserialize;

/// Used when the catalog is unreachable or nothing qualifies.
pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Known cost-effective models, in preference order.
pub const PREFERRED_MODELS: &[&str] = &[
    "anthropic/claude-3.5-haiku",
    "openai/gpt-4o-mini",
    "google/gemini-flash-1.5",
    "meta-llama/llama-3.1-70b-instruct",
];

/// Smallest context that fits an extraction window plus a clustering prompt.
const MIN_CONTEXT_LENGTH: u64 = 16_384;
/// Upper bound on per-prompt-token cost (USD) for the catalog fallback.
const MAX_PROMPT_PRICE: f64 = 0.000_005;

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub pricing: ModelPricing,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPricing {
    /// OpenRouter reports prices as decimal strings.
    #[serde(default)]
    pub prompt: String,
}

impl ModelInfo {
    fn prompt_price(&self) -> Option<f64> {
        self.pricing.prompt.parse().ok()
    }
}

/// Pick a model from the catalog: the first preferred model that is listed,
/// else the cheapest entry meeting the context floor and price ceiling.
pub fn choose_model(catalog: &[ModelInfo]) -> Option<String> {
    for preferred in PREFERRED_MODELS {
        if catalog.iter().any(|m| m.id == *preferred) {
            return Some((*preferred).to_string());
        }
    }

    let mut qualifying: Vec<&ModelInfo> = catalog
        .iter()
        .filter(|m| m.context_length.unwrap_or(0) >= MIN_CONTEXT_LENGTH)
        .filter(|m| m.prompt_price().is_some_and(|p| p > 0.0 && p <= MAX_PROMPT_PRICE))
        .collect();
    qualifying.sort_by(|a, b| {
        a.prompt_price()
            .partial_cmp(&b.prompt_price())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    qualifying.first().map(|m| m.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, context: u64, prompt_price: &str) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            context_length: Some(context),
            pricing: ModelPricing {
                prompt: prompt_price.to_string(),
            },
        }
    }

    #[test]
    fn preferred_model_wins_regardless_of_price() {
        let catalog = vec![
            model("some/cheap-model", 200_000, "0.0000001"),
            model("openai/gpt-4o-mini", 128_000, "0.00000015"),
            model("anthropic/claude-3.5-haiku", 200_000, "0.000001"),
        ];
        assert_eq!(
            choose_model(&catalog).as_deref(),
            Some("anthropic/claude-3.5-haiku")
        );
    }

    #[test]
    fn fallback_filters_by_context_and_price_then_picks_cheapest() {
        let catalog = vec![
            model("a/too-small", 4_096, "0.0000001"),
            model("b/too-expensive", 128_000, "0.00002"),
            model("c/qualifies", 32_768, "0.000002"),
            model("d/cheaper", 32_768, "0.000001"),
        ];
        assert_eq!(choose_model(&catalog).as_deref(), Some("d/cheaper"));
    }

    #[test]
    fn empty_or_unqualified_catalog_yields_none() {
        assert_eq!(choose_model(&[]), None);
        let catalog = vec![model("a/too-small", 1_000, "0.000001")];
        assert_eq!(choose_model(&catalog), None);
    }

    #[test]
    fn unparseable_price_is_excluded() {
        let catalog = vec![model("a/free-tier", 32_768, "variable")];
        assert_eq!(choose_model(&catalog), None);
    }
}
