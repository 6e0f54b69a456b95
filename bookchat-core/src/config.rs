use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4-turbo";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BookchatConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
    pub environment: RuntimeEnvironment,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            environment: RuntimeEnvironment::Development,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub vector_store_id: Option<String>,
    pub top_k: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_store_id: None,
            top_k: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Whether `/api/chat` streams when the request does not say.
    pub streaming: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            streaming: true,
        }
    }
}

/// History bounds applied before a conversation is sent to the model.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_history_length: usize,
    /// Approximate token budget. Not enforced; truncation is by message count.
    pub max_history_tokens: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_length: 20,
            max_history_tokens: 4000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptConfig {
    /// Directory holding the system prompt fragments. Searched before the
    /// bundled defaults.
    pub dir: Option<PathBuf>,
}

impl BookchatConfig {
    /// Load from an optional TOML file, `BOOKCHAT__SECTION__KEY` environment
    /// variables and the conventional `OPENAI_*` variables, in increasing
    /// order of precedence.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("BOOKCHAT").separator("__"))
            .set_override_option("provider.api_key", std::env::var("OPENAI_API_KEY").ok())?
            .set_override_option("provider.model", std::env::var("OPENAI_MODEL").ok())?
            .set_override_option("provider.base_url", std::env::var("OPENAI_BASE_URL").ok())?
            .set_override_option(
                "retrieval.vector_store_id",
                std::env::var("OPENAI_VECTOR_STORE_ID").ok(),
            )?
            .build()?;

        let mut config: Self = s.try_deserialize()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Blank optional values are treated as unset.
    pub fn normalize(&mut self) {
        fn blank_to_none(value: &mut Option<String>) {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }
        blank_to_none(&mut self.provider.api_key);
        blank_to_none(&mut self.retrieval.vector_store_id);
        if self.provider.model.trim().is_empty() {
            self.provider.model = DEFAULT_MODEL.to_string();
        }
    }

    /// Production deployments require the provider credentials up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.environment != RuntimeEnvironment::Production {
            return Ok(());
        }
        if self.provider.api_key.is_none() {
            return Err(ConfigError::Message(
                "Missing required setting: provider.api_key (OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.retrieval.vector_store_id.is_none() {
            return Err(ConfigError::Message(
                "Missing required setting: retrieval.vector_store_id (OPENAI_VECTOR_STORE_ID)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Log which features are degraded by missing settings.
    pub fn warn_missing(&self) {
        if self.provider.api_key.is_none() {
            tracing::warn!(
                "OPENAI_API_KEY is not set; chat requests will fail until it is configured"
            );
        }
        if self.retrieval.vector_store_id.is_none() {
            tracing::warn!("No vector store id configured; answers will not be grounded in the book");
        }
    }
}
