//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default language-model provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Pinned instruction turn at the head of every session
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Limits applied by the orchestration loop
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub weather: WeatherConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_system_prompt() -> String {
    "You are a helpful, polite and concise personal assistant. Use the available \
     functions when they help you give accurate, up-to-date answers."
        .into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("orchestration", &self.orchestration)
            .field("weather", &self.weather)
            .field("search", &self.search)
            .field("reminders", &self.reminders)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("azure_deployment", &self.azure_deployment)
            .field("azure_api_version", &self.azure_api_version)
            .finish()
    }
}

impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_units", &self.default_units)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_language", &self.default_language)
            .field("default_country", &self.default_country)
            .field("default_num_results", &self.default_num_results)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Numbers consumed by the function-calling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Unpinned turns retained in the context window
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Per-call handler timeout
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Maximum model round trips per user turn
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,

    /// Function calls allowed in flight at once
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

fn default_context_window() -> usize {
    10
}
fn default_call_timeout_ms() -> u64 {
    5000
}
fn default_max_round_trips() -> u32 {
    5
}
fn default_max_concurrent_calls() -> usize {
    4
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            call_timeout_ms: default_call_timeout_ms(),
            max_round_trips: default_max_round_trips(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

/// `get_weather` settings. Without an API key the skill simulates data.
#[derive(Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_weather_url")]
    pub api_url: String,

    /// "metric" or "imperial"
    #[serde(default = "default_units")]
    pub default_units: String,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_weather_url() -> String {
    "https://api.openweathermap.org/data/2.5".into()
}
fn default_units() -> String {
    "metric".into()
}
fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_weather_url(),
            default_units: default_units(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// `search_google` settings (Serper.dev).
#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_url")]
    pub api_url: String,

    #[serde(default = "default_language")]
    pub default_language: String,

    #[serde(default = "default_country")]
    pub default_country: String,

    #[serde(default = "default_num_results")]
    pub default_num_results: u32,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_search_url() -> String {
    "https://google.serper.dev".into()
}
fn default_language() -> String {
    "es-419".into()
}
fn default_country() -> String {
    "mx".into()
}
fn default_num_results() -> u32 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_search_url(),
            default_language: default_language(),
            default_country: default_country(),
            default_num_results: default_num_results(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often the scheduler looks for due reminders
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_check_interval() -> u64 {
    60
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Azure OpenAI deployment name (provider "azure" only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_deployment: Option<String>,

    /// Azure OpenAI API version (provider "azure" only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_api_version: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CONCIERGE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CONCIERGE_PROVIDER`, `CONCIERGE_MODEL`
    /// - `OPENWEATHERMAP_API_KEY`, `SERPER_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`, so tests need not
    /// touch the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("CONCIERGE_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(provider) = lookup("CONCIERGE_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("CONCIERGE_MODEL") {
            self.default_model = model;
        }
        if self.weather.api_key.is_none() {
            self.weather.api_key = lookup("OPENWEATHERMAP_API_KEY");
        }
        if self.search.api_key.is_none() {
            self.search.api_key = lookup("SERPER_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let o = &self.orchestration;
        for (name, value) in [
            ("orchestration.context_window", o.context_window as u64),
            ("orchestration.call_timeout_ms", o.call_timeout_ms),
            ("orchestration.max_round_trips", u64::from(o.max_round_trips)),
            ("orchestration.max_concurrent_calls", o.max_concurrent_calls as u64),
            ("reminders.check_interval_secs", self.reminders.check_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }

        if !matches!(self.weather.default_units.as_str(), "metric" | "imperial") {
            return Err(ConfigError::ValidationError(
                "weather.default_units must be \"metric\" or \"imperial\"".into(),
            ));
        }

        if !(1..=10).contains(&self.search.default_num_results) {
            return Err(ConfigError::ValidationError(
                "search.default_num_results must be between 1 and 10".into(),
            ));
        }

        Ok(())
    }

    /// API key for `provider`: provider section first, then the global key.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Model for `provider`: provider section first, then the default.
    pub fn model_for(&self, provider: &str) -> String {
        self.providers
            .get(provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.default_provider).is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            orchestration: OrchestrationConfig::default(),
            weather: WeatherConfig::default(),
            search: SearchConfig::default(),
            reminders: ReminderConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
