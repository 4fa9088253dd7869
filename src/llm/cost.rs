//! Cost accounting for LLM usage.
//!
//! Costs are accumulated in micro-dollars to avoid floating-point drift when
//! summing many small calls; public accessors convert back to dollars.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Micro-dollars per dollar for internal calculations.
const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

/// Price of a model in dollars per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl ModelPricing {
    pub const fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m,
            output_per_1m,
        }
    }

    /// Known list prices for the default models; unknown models fall back to a
    /// conservative mid-range estimate.
    pub fn for_model(model: &str) -> Self {
        match model {
            m if m.starts_with("perplexity/sonar-pro") => Self::new(3.0, 15.0),
            m if m.starts_with("perplexity/sonar") => Self::new(1.0, 1.0),
            m if m.starts_with("openai/gpt-4o-mini") => Self::new(0.15, 0.6),
            m if m.starts_with("openai/gpt-4o") => Self::new(2.5, 10.0),
            m if m.starts_with("anthropic/claude") => Self::new(3.0, 15.0),
            m if m.starts_with("google/gemini") => Self::new(0.3, 2.5),
            _ => Self::new(1.0, 3.0),
        }
    }

    /// Cost in micro-dollars.
    ///
    /// Formula: (tokens / 1_000_000) * price_per_1m, scaled to micro-dollars.
    pub fn cost_micros(&self, input_tokens: u64, output_tokens: u64) -> u64 {
        let input = (input_tokens as f64 / 1_000_000.0) * self.input_per_1m;
        let output = (output_tokens as f64 / 1_000_000.0) * self.output_per_1m;
        ((input + output) * MICROS_PER_DOLLAR).round() as u64
    }
}

/// Cost of one or more external calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostUnits {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// HTTP requests issued, retries included.
    pub requests: u32,
    pub cost_micros: u64,
}

impl CostUnits {
    pub fn from_usage(pricing: &ModelPricing, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            requests: 1,
            cost_micros: pricing.cost_micros(input_tokens, output_tokens),
        }
    }

    /// Cost of a request that failed before usage was reported.
    pub fn failed_request() -> Self {
        Self {
            requests: 1,
            ..Self::default()
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn usd(&self) -> f64 {
        self.cost_micros as f64 / MICROS_PER_DOLLAR
    }
}

impl Add for CostUnits {
    type Output = CostUnits;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            requests: self.requests + rhs.requests,
            cost_micros: self.cost_micros + rhs.cost_micros,
        }
    }
}

impl AddAssign for CostUnits {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
