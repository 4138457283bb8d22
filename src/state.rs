use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::provider::build_model_client;
use crate::relay::ChatRelay;
use crate::routing::cors::AllowedOrigins;
use crate::stream::ThinkingTags;
use crate::tool::{HttpSearchTool, ToolDeclaration};
use crate::transport::{HttpTransport, RetryPolicy};

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub relay: Arc<ChatRelay>,
    pub allowed_origins: AllowedOrigins,
    request_seq: AtomicU64,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, relay: ChatRelay) -> Self {
        let allowed_origins = AllowedOrigins::from_config(&config.server);
        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            allowed_origins,
            request_seq: AtomicU64::new(1),
        }
    }

    /// Wire the provider adapter, search tool and relay from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the HTTP client cannot be built or
    /// the provider settings are unusable.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let transport = HttpTransport::new(&config.server)?;

        let declaration = config
            .tool
            .enabled
            .then(|| ToolDeclaration::search(&config.tool.name, &config.tool.description));
        let model = build_model_client(transport.clone(), &config.provider, declaration.clone())?;

        let tags = ThinkingTags::new(
            &config.relay.thinking_open_tag,
            &config.relay.thinking_close_tag,
        );
        let mut relay = ChatRelay::new(
            model,
            RetryPolicy::from_config(&config.relay),
            tags,
            config.relay.system_prompt.clone(),
        );

        let endpoint = config.tool.endpoint.as_deref();
        if let (Some(declaration), Some(endpoint)) = (declaration, endpoint) {
            let tool = HttpSearchTool::new(
                transport.client().clone(),
                endpoint,
                Duration::from_secs(config.tool.timeout_secs),
            );
            relay = relay.with_search_tool(declaration, Arc::new(tool));
        }

        Ok(Self::new(config, relay))
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed)
    }
}
