//! Token pricing and currency rounding.

use serde::{Deserialize, Serialize};

/// Decimal places kept on every currency figure.
pub const CURRENCY_DECIMALS: i32 = 4;

/// Per-million-token prices, in account currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub price_per_million_input_tokens: f64,
    pub price_per_million_output_tokens: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            price_per_million_input_tokens: 5.0,
            price_per_million_output_tokens: 20.0,
        }
    }
}

/// Cost split into its input and output parts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl Pricing {
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            price_per_million_input_tokens: input_per_million,
            price_per_million_output_tokens: output_per_million,
        }
    }

    /// Price a token count. Each figure is rounded independently; the total
    /// is rounded from the unrounded parts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let input = input_tokens as f64 / 1_000_000.0 * self.price_per_million_input_tokens;
        let output = output_tokens as f64 / 1_000_000.0 * self.price_per_million_output_tokens;

        CostBreakdown {
            input_cost: round_currency(input),
            output_cost: round_currency(output),
            total_cost: round_currency(input + output),
        }
    }
}

/// Round half away from zero to [`CURRENCY_DECIMALS`] places.
pub fn round_currency(value: f64) -> f64 {
    let factor = 10f64.powi(CURRENCY_DECIMALS);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_default_rates() {
        let cost = Pricing::default().cost(1_000_000, 1_000_000);
        assert!(approx(cost.input_cost, 5.0));
        assert!(approx(cost.output_cost, 20.0));
        assert!(approx(cost.total_cost, 25.0));
    }

    #[test]
    fn test_small_counts_round_to_four_places() {
        // 123 tokens * 5 / 1M = 0.000615
        let cost = Pricing::default().cost(123, 0);
        assert!(approx(cost.input_cost, 0.0006));
        assert!(approx(cost.output_cost, 0.0));

        // 1_234 output tokens * 20 / 1M = 0.02468
        let cost = Pricing::default().cost(0, 1_234);
        assert!(approx(cost.output_cost, 0.0247));
    }

    #[test]
    fn test_round_currency() {
        assert!(approx(round_currency(1.23456), 1.2346));
        assert!(approx(round_currency(-0.00004), 0.0));
        assert!(approx(round_currency(2.0), 2.0));
    }
}
