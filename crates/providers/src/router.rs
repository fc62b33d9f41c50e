//! Gateway router: selects the language-model gateway based on config.
//!
//! Handles gateway construction from `[providers.<name>]` sections and
//! lookup of the default backend.

use concierge_config::{AppConfig, ProviderConfig};
use concierge_core::gateway::LanguageModelGateway;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::openai_compat::OpenAiGateway;

const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// Named gateways plus the one used by default.
pub struct GatewayRouter {
    gateways: HashMap<String, Arc<dyn LanguageModelGateway>>,
    default_gateway: String,
}

impl GatewayRouter {
    /// Create a new router with a default gateway name.
    pub fn new(default_gateway: impl Into<String>) -> Self {
        Self {
            gateways: HashMap::new(),
            default_gateway: default_gateway.into(),
        }
    }

    /// Register a gateway.
    pub fn register(&mut self, name: impl Into<String>, gateway: Arc<dyn LanguageModelGateway>) {
        self.gateways.insert(name.into(), gateway);
    }

    /// Get the default gateway.
    pub fn default(&self) -> Option<Arc<dyn LanguageModelGateway>> {
        self.gateways.get(&self.default_gateway).cloned()
    }

    /// Get a specific gateway by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LanguageModelGateway>> {
        self.gateways.get(name).cloned()
    }

    /// All registered gateway names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Build gateways from configuration.
pub fn build_from_config(config: &AppConfig) -> GatewayRouter {
    let mut router = GatewayRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        router.register(name.clone(), build_gateway(config, name, provider_config));
    }

    // Ensure the default gateway exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let gateway = build_gateway(config, &config.default_provider, &ProviderConfig::default());
        router.register(config.default_provider.clone(), gateway);
    }

    info!(
        default = %config.default_provider,
        gateways = ?router.list(),
        "Gateways configured"
    );
    router
}

fn build_gateway(
    config: &AppConfig,
    name: &str,
    provider: &ProviderConfig,
) -> Arc<dyn LanguageModelGateway> {
    let api_key = config.api_key_for(name).unwrap_or_default();
    if api_key.is_empty() {
        warn!(gateway = %name, "No API key configured");
    }
    let model = config.model_for(name);

    let gateway = match (name, provider.azure_deployment.as_deref()) {
        ("azure", Some(deployment)) => {
            let endpoint = provider.api_url.as_deref().unwrap_or_default();
            let api_version = provider
                .azure_api_version
                .as_deref()
                .unwrap_or(DEFAULT_AZURE_API_VERSION);
            OpenAiGateway::azure(endpoint, deployment, api_version, api_key)
        }
        _ => {
            let base_url = provider
                .api_url
                .clone()
                .unwrap_or_else(|| default_base_url(name));
            OpenAiGateway::new(name, base_url, api_key).with_model(model)
        }
    };

    Arc::new(
        gateway
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens),
    )
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_register_and_lookup() {
        let mut router = GatewayRouter::new("openai");
        router.register("openai", Arc::new(OpenAiGateway::openai("sk-test")));

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let router = build_from_config(&config);
        let gateway = router.default().unwrap();
        assert_eq!(gateway.name(), "openai");
    }

    #[test]
    fn build_registers_configured_providers() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "azure".into(),
            ProviderConfig {
                api_key: Some("azure-key".into()),
                api_url: Some("https://example.openai.azure.com".into()),
                azure_deployment: Some("assistant".into()),
                ..ProviderConfig::default()
            },
        );
        config.providers.insert(
            "ollama".into(),
            ProviderConfig::default(),
        );
        let router = build_from_config(&config);
        assert_eq!(router.list(), ["azure", "ollama", "openai"]);
        assert_eq!(router.get("azure").unwrap().name(), "azure");
    }
}
