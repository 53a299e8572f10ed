use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::models::Platform;

/// Main configuration structure for the tutor orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub provider: ProviderConfig,
    pub completion: CompletionConfig,
    pub search: SearchConfig,
    pub usage: UsageConfig,
    pub history: HistoryConfig,
    pub cache: CacheConfig,
    pub input: InputConfig,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub path: String,
    /// Whole-run deadline for one question
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional shared secret expected as `Authorization: Bearer ...`
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_request_timeout_ms() -> u64 {
    90_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: u8,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_size: usize,
    pub timeout_seconds: u64,
    pub create_timeout_seconds: u64,
    pub recycle_timeout_seconds: u64,
}

/// Chat-completions provider (OpenRouter compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub referer: String,
    pub title: String,
    pub default_model: String,
    pub vision_model: String,
    /// Model id -> variant that searches the web on its own
    #[serde(default)]
    pub live_variants: HashMap<String, String>,
    pub classification_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub timeout_ms: u64,
    pub latency_sensitive_timeout_ms: u64,
    pub max_tokens: u32,
    pub latency_sensitive_max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub duckduckgo_url: String,
    /// `{lang}` is replaced with the requested language
    pub wikipedia_url: String,
    pub language: String,
    pub user_agent: String,
    pub tool_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    pub enabled: bool,
    pub daily_limit: u32,
    pub min_interval_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub check_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Interactions kept per requester
    pub window: usize,
    /// Interactions rendered into the system instruction
    pub prompt_window: usize,
    pub answer_preview_chars: usize,
    /// Deadline for each history read or write
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    1_500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub max_question_chars: usize,
    /// Base URL of the object storage that issues signed image URLs
    pub storage_base_url: String,
}

/// Curated-content similarity search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub search_url: String,
    pub api_key: String,
    pub match_threshold: f32,
    pub match_count: u32,
    pub timeout_ms: u64,
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env from: {}", path.display()),
            Err(_) => tracing::warn!("No .env file found - continuing with env vars only"),
        }

        let config_path =
            env::var("TUTOR_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from {}", config_path);
                        config
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to parse config file {}: {} - using defaults",
                            config_path,
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::error!(
                        "Failed to read config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::warn!("Config file not found at {} - using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
            v.and_then(|s| s.trim().parse().ok())
        }

        if let Some(bind) = var("TUTOR_HTTP_BIND") {
            self.server.bind = bind;
        }
        if let Some(path) = var("TUTOR_HTTP_PATH") {
            self.server.path = path;
        }
        if let Some(token) = var("TUTOR_BEARER_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.server.bearer_token = Some(token);
        }

        // Redis overrides
        if let Some(host) = var("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Some(port) = parsed(var("REDIS_PORT")) {
            self.redis.port = port;
        }
        if let Some(db) = parsed(var("REDIS_DB")) {
            self.redis.database = db;
        }
        if let Some(size) = parsed(var("TUTOR_REDIS_POOL_SIZE")) {
            self.redis.pool.max_size = size;
        }

        // Provider overrides
        if let Some(key) = var("OPENROUTER_API_KEY") {
            self.provider.api_key = key;
        }
        if let Some(url) = var("OPENROUTER_BASE_URL") {
            self.provider.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = var("TUTOR_DEFAULT_MODEL") {
            self.provider.default_model = model;
        }
        if let Some(model) = var("TUTOR_VISION_MODEL") {
            self.provider.vision_model = model;
        }
        if let Some(ms) = parsed(var("WHATSAPP_AI_REQUEST_TIMEOUT")) {
            self.provider.classification_timeout_ms = ms;
        }

        // Usage gate overrides
        if let Some(enabled) = var("HUMANIZED_USAGE_LIMITS_ENABLED") {
            self.usage.enabled = enabled.trim() == "true";
        }
        if let Some(limit) = parsed(var("HUMANIZED_DAILY_LIMIT")) {
            self.usage.daily_limit = limit;
        }
        if let Some(ms) = parsed(var("HUMANIZED_MIN_INTERVAL_MS")) {
            self.usage.min_interval_ms = ms;
        }

        // Input overrides
        if let Some(max) = parsed(var("HUMANIZED_MAX_QUESTION_CHARS")) {
            self.input.max_question_chars = max;
        }
        if let Some(url) = var("SUPABASE_URL") {
            self.input.storage_base_url = url;
        }

        if let Some(enabled) = var("TUTOR_CACHE_ENABLED") {
            self.cache.enabled = enabled.trim() == "true";
        }

        if let Some(url) = var("TUTOR_CONTENT_SEARCH_URL") {
            self.content.search_url = url;
        }
        if let Some(key) = var("TUTOR_CONTENT_API_KEY") {
            self.content.api_key = key;
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.redis.port == 0 {
            return Err("Redis port cannot be 0".into());
        }
        if self.provider.api_key.is_empty() {
            return Err("OPENROUTER_API_KEY environment variable must be set".into());
        }
        if self.history.window == 0 {
            return Err("history.window must be at least 1".into());
        }
        if self.usage.enabled && self.usage.daily_limit == 0 {
            return Err("usage.daily_limit cannot be 0 while the gate is enabled".into());
        }
        if self.input.storage_base_url.is_empty() {
            return Err("SUPABASE_URL not set - image questions will be rejected".into());
        }
        Ok(())
    }

    /// Get Redis URL with password from environment
    pub fn get_redis_url(&self) -> String {
        let password = env::var("REDIS_PASSWORD")
            .or_else(|_| env::var("REDIS_PASS"))
            .unwrap_or_default();

        if password.is_empty() {
            format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.database
            )
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.database
            )
        }
    }

    pub fn get_pool_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.pool.timeout_seconds)
    }

    pub fn get_pool_create_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.pool.create_timeout_seconds)
    }

    pub fn get_pool_recycle_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.pool.recycle_timeout_seconds)
    }
}

impl CompletionConfig {
    pub fn timeout_for(&self, platform: Platform) -> Duration {
        if platform.is_latency_sensitive() {
            Duration::from_millis(self.latency_sensitive_timeout_ms)
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    pub fn max_tokens_for(&self, platform: Platform) -> u32 {
        if platform.is_latency_sensitive() {
            self.latency_sensitive_max_tokens
        } else {
            self.max_tokens
        }
    }
}

fn default_live_variants() -> HashMap<String, String> {
    [
        "deepseek/deepseek-chat",
        "openai/gpt-4o-mini",
        "openai/gpt-4o",
        "anthropic/claude-3.5-sonnet",
        "meta-llama/llama-3.1-70b-instruct",
        "google/gemini-flash-1.5",
    ]
    .into_iter()
    .map(|m| (m.to_string(), format!("{m}:online")))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8788".to_string(),
                path: "/tutor".to_string(),
                request_timeout_ms: default_request_timeout_ms(),
                bearer_token: None,
            },
            redis: RedisConfig {
                host: "localhost".to_string(),
                port: 6379,
                database: 0,
                pool: PoolConfig {
                    max_size: 16,
                    timeout_seconds: 5,
                    create_timeout_seconds: 5,
                    recycle_timeout_seconds: 5,
                },
            },
            provider: ProviderConfig {
                api_key: env::var("OPENROUTER_API_KEY").unwrap_or_else(|_| {
                    tracing::warn!("OPENROUTER_API_KEY not set, classification will use local rules");
                    String::new()
                }),
                base_url: "https://openrouter.ai/api/v1".to_string(),
                referer: "https://clever-school-pal-ai".to_string(),
                title: "EduBot Tutor".to_string(),
                default_model: "deepseek/deepseek-chat".to_string(),
                vision_model: "qwen/qwen2.5-vl-7b-instruct".to_string(),
                live_variants: default_live_variants(),
                classification_timeout_ms: 10_000,
            },
            completion: CompletionConfig {
                timeout_ms: 30_000,
                latency_sensitive_timeout_ms: 20_000,
                max_tokens: 2000,
                latency_sensitive_max_tokens: 1200,
                temperature: 0.7,
                top_p: 0.9,
                frequency_penalty: 0.1,
                presence_penalty: 0.1,
            },
            search: SearchConfig {
                duckduckgo_url: "https://api.duckduckgo.com/".to_string(),
                wikipedia_url: "https://{lang}.wikipedia.org/w/api.php".to_string(),
                language: "pt".to_string(),
                user_agent: "CleverSchoolPalAI/1.0".to_string(),
                tool_timeout_ms: 6_000,
            },
            usage: UsageConfig {
                enabled: false,
                daily_limit: 50,
                min_interval_ms: 2_500,
                check_timeout_ms: default_store_timeout_ms(),
            },
            history: HistoryConfig {
                window: 7,
                prompt_window: 8,
                answer_preview_chars: 200,
                timeout_ms: default_store_timeout_ms(),
            },
            cache: CacheConfig {
                enabled: true,
                ttl_seconds: 604_800,
                lookup_timeout_ms: 1_500,
                store_timeout_ms: default_store_timeout_ms(),
            },
            input: InputConfig {
                max_question_chars: 1000,
                storage_base_url: env::var("SUPABASE_URL").unwrap_or_default(),
            },
            content: ContentConfig {
                search_url: String::new(),
                api_key: String::new(),
                match_threshold: 0.3,
                match_count: 5,
                timeout_ms: 5_000,
            },
        }
    }
}
