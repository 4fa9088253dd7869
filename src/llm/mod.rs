//! LLM backends for keyword-forge.
//!
//! The pipeline uses two OpenAI-compatible backends: a generation model and a
//! search-grounded model. Both are driven through the [`LlmProvider`] trait so
//! tests can substitute scripted providers.
//!
//! ```ignore
//! use keyword_forge::llm::{GenerationRequest, HttpLlmClient, LlmProvider, Message};
//!
//! let client = HttpLlmClient::openrouter(api_key, "openai/gpt-4o-mini")?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod client;
pub mod cost;

pub use client::{
    Choice, GenerationRequest, GenerationResponse, HttpLlmClient, LlmProvider, Message, Usage,
    OPENROUTER_BASE_URL,
};
pub use cost::{CostUnits, ModelPricing};
