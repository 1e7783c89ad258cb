//! Per-model price and context-window table.
//!
//! Prices are quoted per 1K tokens. Defaults cover the common chat models and
//! can be overridden programmatically, from configuration, or from environment
//! variables (`TOLLGATE_PRICING_<MODEL>_PROMPT`, `_COMPLETION`, `_CONTEXT`).

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TOKENS_PER_UNIT: Decimal = dec!(1000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error("No pricing configured for model: {model}")]
    NotFound { model: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt_per_ktok: Decimal,
    pub completion_per_ktok: Decimal,
    pub context_window: u64,
}

impl ModelPricing {
    pub const fn new(
        prompt_per_ktok: Decimal,
        completion_per_ktok: Decimal,
        context_window: u64,
    ) -> Self {
        Self {
            prompt_per_ktok,
            completion_per_ktok,
            context_window,
        }
    }

    pub fn calculate(&self, prompt_tokens: u64, completion_tokens: u64) -> Decimal {
        let prompt = Decimal::from(prompt_tokens) / TOKENS_PER_UNIT * self.prompt_per_ktok;
        let completion =
            Decimal::from(completion_tokens) / TOKENS_PER_UNIT * self.completion_per_ktok;
        prompt + completion
    }

    /// Negative rates are treated as zero.
    fn sanitized(self, model: &str) -> Self {
        if self.prompt_per_ktok.is_sign_negative() || self.completion_per_ktok.is_sign_negative() {
            tracing::warn!(model, "negative price configured, clamping to zero");
        }
        Self {
            prompt_per_ktok: self.prompt_per_ktok.max(Decimal::ZERO),
            completion_per_ktok: self.completion_per_ktok.max(Decimal::ZERO),
            context_window: self.context_window,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn builder() -> PricingTableBuilder {
        PricingTableBuilder::new()
    }

    /// Looks up a model by exact id, then as a dated snapshot of a registered
    /// id (`gpt-4o-2024-08-06`, `gpt-4-0613`). Any other id is unknown.
    pub fn lookup(&self, model: &str) -> Result<&ModelPricing, PricingError> {
        let normalized = model.trim().to_lowercase();
        if let Some(pricing) = self.models.get(&normalized) {
            return Ok(pricing);
        }
        self.models
            .iter()
            .filter(|(id, _)| {
                normalized
                    .strip_prefix(id.as_str())
                    .is_some_and(is_snapshot_suffix)
            })
            .max_by_key(|(id, _)| id.len())
            .map(|(_, pricing)| pricing)
            .ok_or_else(|| PricingError::NotFound {
                model: model.to_string(),
            })
    }

    /// Cost of a request. Unknown models cost zero so that missing pricing
    /// never blocks an otherwise valid request.
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Decimal {
        match self.lookup(model) {
            Ok(pricing) => pricing.calculate(prompt_tokens, completion_tokens),
            Err(e) => {
                tracing::warn!(error = %e, "pricing unavailable, recording zero cost");
                Decimal::ZERO
            }
        }
    }

    pub fn context_window(&self, model: &str) -> Option<u64> {
        self.lookup(model).ok().map(|p| p.context_window)
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPricing)> {
        self.models.iter().map(|(id, p)| (id.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// `-` followed by a date stamp: digits and dashes only, at least four digits.
fn is_snapshot_suffix(rest: &str) -> bool {
    let Some(stamp) = rest.strip_prefix('-') else {
        return false;
    };
    stamp.chars().all(|c| c.is_ascii_digit() || c == '-')
        && stamp.chars().filter(char::is_ascii_digit).count() >= 4
}

#[derive(Debug, Default)]
pub struct PricingTableBuilder {
    models: HashMap<String, ModelPricing>,
}

impl PricingTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self) -> Self {
        for (id, pricing) in [
            ("gpt-4o-mini", ModelPricing::new(dec!(0.00015), dec!(0.0006), 128_000)),
            ("gpt-4o", ModelPricing::new(dec!(0.0025), dec!(0.01), 128_000)),
            ("gpt-4-turbo", ModelPricing::new(dec!(0.01), dec!(0.03), 128_000)),
            ("gpt-4", ModelPricing::new(dec!(0.03), dec!(0.06), 8_192)),
            ("gpt-3.5-turbo", ModelPricing::new(dec!(0.0005), dec!(0.0015), 16_385)),
        ] {
            self.models.insert(id.into(), pricing);
        }
        self
    }

    pub fn model(mut self, name: impl Into<String>, pricing: ModelPricing) -> Self {
        let name = name.into().to_lowercase();
        let pricing = pricing.sanitized(&name);
        self.models.insert(name, pricing);
        self
    }

    pub fn models(self, models: impl IntoIterator<Item = (String, ModelPricing)>) -> Self {
        models
            .into_iter()
            .fold(self, |builder, (name, pricing)| builder.model(name, pricing))
    }

    /// Applies `TOLLGATE_PRICING_<MODEL>_*` overrides to every known model.
    pub fn from_env(mut self) -> Self {
        let ids: Vec<String> = self.models.keys().cloned().collect();
        for id in ids {
            if let Some(pricing) = Self::parse_env_pricing(&id, self.models.get(&id).copied()) {
                self.models.insert(id, pricing);
            }
        }
        self
    }

    fn env_key(model: &str) -> String {
        model.to_uppercase().replace(['-', '.'], "_")
    }

    fn parse_env_pricing(model: &str, base: Option<ModelPricing>) -> Option<ModelPricing> {
        let key = Self::env_key(model);
        let read =
            |suffix: &str| std::env::var(format!("TOLLGATE_PRICING_{}_{}", key, suffix)).ok();

        let prompt = read("PROMPT").and_then(|v| v.parse::<Decimal>().ok());
        let completion = read("COMPLETION").and_then(|v| v.parse::<Decimal>().ok());
        let context = read("CONTEXT").and_then(|v| v.parse::<u64>().ok());

        if prompt.is_none() && completion.is_none() && context.is_none() {
            return None;
        }

        let base = base.unwrap_or(ModelPricing::new(Decimal::ZERO, Decimal::ZERO, 0));
        Some(
            ModelPricing::new(
                prompt.unwrap_or(base.prompt_per_ktok),
                completion.unwrap_or(base.completion_per_ktok),
                context.unwrap_or(base.context_window),
            )
            .sanitized(model),
        )
    }

    pub fn build(self) -> PricingTable {
        PricingTable {
            models: self.models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PricingTable {
        PricingTableBuilder::new()
            .model("m", ModelPricing::new(dec!(0.03), dec!(0.06), 8_192))
            .build()
    }

    #[test]
    fn test_cost_calculation() {
        let cost = table().cost("m", 1000, 500);
        assert_eq!(cost, dec!(0.06));
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let table = table();
        assert_eq!(table.cost("mystery", 1_000_000, 1_000_000), Decimal::ZERO);
        assert!(matches!(
            table.lookup("mystery"),
            Err(PricingError::NotFound { .. })
        ));
        assert_eq!(table.context_window("mystery"), None);
    }

    #[test]
    fn test_dated_snapshot_resolves_to_longest_prefix() {
        let table = PricingTable::builder().with_defaults().build();
        let pricing = table.lookup("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(pricing.prompt_per_ktok, dec!(0.00015));

        let pricing = table.lookup("GPT-4o-2024-08-06").unwrap();
        assert_eq!(pricing.prompt_per_ktok, dec!(0.0025));
    }

    #[test]
    fn test_sibling_model_does_not_borrow_pricing() {
        let table = PricingTable::builder().with_defaults().build();

        assert!(matches!(
            table.lookup("gpt-4.1"),
            Err(PricingError::NotFound { .. })
        ));
        assert_eq!(table.cost("gpt-4.1", 1000, 1000), Decimal::ZERO);
        assert_eq!(table.context_window("gpt-4.1"), None);
        assert!(table.lookup("gpt-4o-audio").is_err());

        assert_eq!(table.lookup("gpt-4-0613").unwrap().context_window, 8_192);
        assert_eq!(
            table.lookup("gpt-4-turbo-2024-04-09").unwrap().prompt_per_ktok,
            dec!(0.01)
        );
    }

    #[test]
    fn test_negative_rates_clamped() {
        let table = PricingTableBuilder::new()
            .model("bad", ModelPricing::new(dec!(-1), dec!(0.002), 4_096))
            .build();
        let pricing = table.lookup("bad").unwrap();
        assert_eq!(pricing.prompt_per_ktok, Decimal::ZERO);
        assert_eq!(pricing.completion_per_ktok, dec!(0.002));
    }

    #[test]
    fn test_env_key_normalization() {
        assert_eq!(PricingTableBuilder::env_key("gpt-3.5-turbo"), "GPT_3_5_TURBO");
    }
}
