//! Model-tier pricing for spend derivation and pre-flight estimates.
//!
//! Used when agent events carry token counts but no billed cost, and to
//! project backlog cost before the loop starts.

/// Pricing per million tokens for a specific model tier.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per million input tokens (USD).
    pub input: f64,
    /// Cost per million output tokens (USD).
    pub output: f64,
}

/// Known tier pricing table (costs in USD per million tokens).
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("opus", ModelPricing { input: 15.0, output: 75.0 }),
    ("sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("haiku", ModelPricing { input: 0.80, output: 4.0 }),
];

/// Get pricing for a tier by name or alias.
///
/// Matches by substring so full model ids (e.g.
/// "claude-sonnet-4-5-20250929") resolve to their tier.
pub fn get_model_pricing(model: &str) -> Option<ModelPricing> {
    let model_lower = model.to_lowercase();
    PRICING_TABLE
        .iter()
        .find(|(name, _)| model_lower.contains(name))
        .map(|(_, pricing)| *pricing)
}

/// Estimate cost in USD for a token split; None for unknown tiers.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    let pricing = get_model_pricing(model)?;
    Some(
        (input_tokens as f64 * pricing.input + output_tokens as f64 * pricing.output)
            / 1_000_000.0,
    )
}

/// Estimate cost for an aggregate token count, assuming the same 30/70
/// input/output split the kernel uses for spend records.
pub fn estimate_cost_for_total(model: &str, total_tokens: u64) -> Option<f64> {
    let input = (total_tokens as f64 * 0.3).round() as u64;
    estimate_cost(model, input, total_tokens - input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_and_full_name_resolution() {
        assert!(get_model_pricing("opus").is_some());
        assert!(get_model_pricing("claude-sonnet-4-5-20250929").is_some());
        assert!(get_model_pricing("unknown-model").is_none());
    }

    #[test]
    fn test_estimate_cost_split() {
        // 1M input on sonnet = $3, 1M output = $15
        let cost = estimate_cost("sonnet", 1_000_000, 0).unwrap();
        assert!((cost - 3.0).abs() < 0.001);
        let cost = estimate_cost("sonnet", 0, 1_000_000).unwrap();
        assert!((cost - 15.0).abs() < 0.001);
    }

    #[test]
    fn test_estimate_cost_for_total_uses_30_70() {
        // 1M tokens on haiku: 300K * 0.80 + 700K * 4.0 = 0.24 + 2.80
        let cost = estimate_cost_for_total("haiku", 1_000_000).unwrap();
        assert!((cost - 3.04).abs() < 0.001);
    }
}
