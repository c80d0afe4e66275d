//! Pre-submission token and cost estimation.

use serde::{Deserialize, Serialize};

use super::pricing::{CostBreakdown, Pricing};
use crate::records::{CategorySet, ExampleSet, InputTextSet};

/// Fixed instruction text counted on every estimate.
pub const ESTIMATE_TEMPLATE_TEXT: &str = "You are a text classification algorithm. The user will provide you with 3 tables. Table 1 contains one column named input text. Under this column are one or more user input text instances that have to be categorized. Table 2 contains 2 columns, named category and category description. Table 3 contains 2 columns named example input text and desired category.";

/// Strategy turning text into a token count.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u64;
}

/// Approximates tokens as `ceil(characters / ratio)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharRatioEstimator {
    chars_per_token: u64,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: u64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> u64 {
        (text.chars().count() as u64).div_ceil(self.chars_per_token)
    }
}

/// Projected usage and cost of classifying the current inputs.
///
/// Output is never guessed: `output_tokens` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: CostBreakdown,
}

/// Estimate the input cost of a classification run.
///
/// Yields a zero estimate unless all three record sets are present.
pub fn estimate_cost(
    estimator: &dyn TokenEstimator,
    pricing: &Pricing,
    inputs: Option<&InputTextSet>,
    categories: Option<&CategorySet>,
    examples: Option<&ExampleSet>,
) -> CostEstimate {
    let (Some(inputs), Some(categories), Some(examples)) = (inputs, categories, examples) else {
        return CostEstimate::default();
    };

    let text = estimation_text(inputs, categories, examples);
    let input_tokens = estimator.estimate(&text);

    CostEstimate {
        input_tokens,
        output_tokens: 0,
        cost: pricing.cost(input_tokens, 0),
    }
}

/// The synthetic string the estimate is computed over.
pub fn estimation_text(
    inputs: &InputTextSet,
    categories: &CategorySet,
    examples: &ExampleSet,
) -> String {
    let mut text = String::new();

    for input in inputs.texts() {
        text.push_str(input);
        text.push(' ');
    }

    for entry in categories.entries() {
        text.push_str(&entry.category);
        text.push(' ');
        text.push_str(&entry.description);
        text.push(' ');
    }

    for example in examples.entries() {
        text.push_str(&example.text);
        text.push(' ');
        text.push_str(&example.desired_category);
        text.push(' ');
    }

    text.push_str(ESTIMATE_TEMPLATE_TEXT);
    text
}
