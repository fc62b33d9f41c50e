//! Language-model gateway implementations for Concierge.
//!
//! All gateways implement the `concierge_core::LanguageModelGateway` trait.
//! The router selects the correct gateway based on configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiGateway;
pub use router::{GatewayRouter, build_from_config};
