pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which hosted model API the relay talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenaiResponses,
    Vertex,
}

impl ProviderKind {
    /// Parse the value accepted by the `PROVIDER` environment variable.
    #[must_use]
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" | "openai-responses" => Some(Self::OpenaiResponses),
            "vertex" | "vertex-ai" => Some(Self::Vertex),
            _ => None,
        }
    }

    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::OpenaiResponses => "https://api.openai.com/v1",
            ProviderKind::Vertex => "https://us-central1-aiplatform.googleapis.com",
        }
    }

    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini | ProviderKind::Vertex => "gemini-1.5-flash",
            ProviderKind::OpenaiResponses => "gpt-4.1-mini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::OpenaiResponses => write!(f, "openai-responses"),
            ProviderKind::Vertex => write!(f, "vertex"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            base_path: String::new(),
            cors_allowed_origins: Vec::new(),
            runtime_worker_threads: None,
        }
    }
}

/// Upstream model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Empty means the provider's public endpoint.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Empty means the provider's default model.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
}

fn default_location() -> String {
    "us-central1".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            project: None,
            location: default_location(),
        }
    }
}

impl ProviderConfig {
    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            self.kind.default_base_url()
        } else {
            trimmed.trim_end_matches('/')
        }
    }

    /// Base URL with the Vertex regional host derived from `location`.
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        if self.kind == ProviderKind::Vertex && self.base_url.trim().is_empty() {
            return format!("https://{}-aiplatform.googleapis.com", self.location.trim());
        }
        self.effective_base_url().to_string()
    }

    #[must_use]
    pub fn effective_model(&self) -> &str {
        let trimmed = self.model.trim();
        if trimmed.is_empty() {
            self.kind.default_model()
        } else {
            trimmed
        }
    }

    /// API key with everything but the first four characters hidden.
    #[must_use]
    pub fn masked_api_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(4).collect();
        format!("{prefix}...")
    }
}

/// Streaming relay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_thinking_open_tag")]
    pub thinking_open_tag: String,
    #[serde(default = "default_thinking_close_tag")]
    pub thinking_close_tag: String,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant for a creative agency. Answer clearly and, when the \
     user asks about client material, use the search_documents tool before answering."
        .to_string()
}
fn default_thinking_open_tag() -> String {
    "<thinking>".to_string()
}
fn default_thinking_close_tag() -> String {
    "</thinking>".to_string()
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            thinking_open_tag: default_thinking_open_tag(),
            thinking_close_tag: default_thinking_close_tag(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// Document search tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tool_name")]
    pub name: String,
    #[serde(default = "default_tool_description")]
    pub description: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool_name() -> String {
    "search_documents".to_string()
}
fn default_tool_description() -> String {
    "Search the agency's document store (briefs, proposals, reports) and return the \
     most relevant passages for a free-text query."
        .to_string()
}
fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_tool_name(),
            description: default_tool_description(),
            endpoint: None,
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from an optional YAML file, apply process environment
/// overrides, and validate the result.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading an existing file fails,
/// [`ConfigError::Yaml`] when parsing fails, or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with an injectable environment lookup.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with_env<F>(path: &str, env: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)?
    } else {
        AppConfig::default()
    };
    apply_env_overrides(&mut config, env)?;
    validate_config(&config)?;
    Ok(config)
}

/// Overlay the deployment environment variables onto a parsed config.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when a variable carries an unusable value.
pub fn apply_env_overrides<F>(config: &mut AppConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    if let Some(port) = non_empty("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::Validation(format!("PORT is not a valid port: {port}")))?;
    }
    if let Some(host) = non_empty("HOST") {
        config.server.host = host;
    }
    if let Some(origins) = non_empty("ALLOWED_ORIGINS") {
        config.server.cors_allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToString::to_string)
            .collect();
    }
    if let Some(provider) = non_empty("PROVIDER") {
        config.provider.kind = ProviderKind::from_env_value(&provider).ok_or_else(|| {
            ConfigError::Validation(format!("PROVIDER has unknown value '{provider}'"))
        })?;
    }
    if let Some(api_key) = non_empty("API_KEY").or_else(|| non_empty("GEMINI_API_KEY")) {
        config.provider.api_key = api_key;
    }
    if let Some(model) = non_empty("MODEL_NAME").or_else(|| non_empty("GEMINI_MODEL")) {
        config.provider.model = model;
    }
    if let Some(project) = non_empty("VERTEX_PROJECT") {
        config.provider.project = Some(project);
    }
    if let Some(location) = non_empty("VERTEX_LOCATION") {
        config.provider.location = location;
    }
    if let Some(endpoint) = non_empty("SEARCH_ENDPOINT") {
        config.tool.endpoint = Some(endpoint);
        config.tool.enabled = true;
    }
    if let Some(level) = non_empty("LOG_LEVEL") {
        config.features.log_level = level;
    }
    Ok(())
}
