//! Budget module - token estimation and pricing.
//!
//! # Key Concepts
//! - Pricing: per-million-token rates and 4-decimal currency rounding
//! - Estimator: pluggable text-to-token strategy (character ratio by default)
//! - Estimate: advisory input cost computed before a job is submitted

mod estimator;
mod pricing;

pub use estimator::{
    estimate_cost, estimation_text, CharRatioEstimator, CostEstimate, TokenEstimator,
    ESTIMATE_TEMPLATE_TEXT,
};
pub use pricing::{round_currency, CostBreakdown, Pricing, CURRENCY_DECIMALS};
