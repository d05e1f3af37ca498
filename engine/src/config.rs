//! File and environment configuration.
//!
//! Precedence, lowest first: built-in defaults, `~/.threadline/config.toml`
//! (with `${VAR}` expansion in string values), then environment overrides.
//! Empty environment values are ignored.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use threadline_context::{
    ContextLimits, DEFAULT_MAX_TOKENS, Encoding, MemoryStore, SessionStore, SqliteStore,
};
use threadline_providers::retry::RetryConfig;
use threadline_providers::{DEFAULT_API_BASE, OpenAiCompletions, OpenAiConfig, ProviderError};
use threadline_types::{
    ApiKey, DEFAULT_BOT_NAME, DEFAULT_END_MARKER, Temperature, TurnMarkers,
};

use crate::orchestrator::SessionConfig;

pub const DEFAULT_MODEL: &str = "text-davinci-003";

const CONFIG_DIR: &str = ".threadline";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThreadlineConfig {
    pub app: AppConfig,
    pub context: ContextConfig,
    pub provider: ProviderConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Completion model name sent with every request.
    pub model: String,
    /// Label the model speaks under; also used in the default base prompt.
    pub bot_name: String,
    /// Appended to the default base prompt.
    pub extra_prompt: String,
    /// Provider end-of-turn token.
    pub end_marker: String,
    pub temperature: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            bot_name: DEFAULT_BOT_NAME.to_string(),
            extra_prompt: String::new(),
            end_marker: DEFAULT_END_MARKER.to_string(),
            temperature: Temperature::DEFAULT.value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: u32,
    pub min_reply_tokens: u32,
    /// tiktoken encoding name, e.g. `r50k_base`.
    pub encoding: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            min_reply_tokens: 0,
            encoding: Encoding::default().to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub proxy: Option<String>,
    pub max_retries: u32,
    pub stream_idle_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            proxy: None,
            max_retries: RetryConfig::default().max_retries,
            stream_idle_timeout_secs: 60,
        }
    }
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("proxy", &self.proxy)
            .field("max_retries", &self.max_retries)
            .field("stream_idle_timeout_secs", &self.stream_idle_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
    Redis,
}

impl StoreBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Redis => "redis",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Invalid {
                field: "store.backend",
                message: format!("unknown backend `{other}` (expected memory, sqlite or redis)"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file; defaults to `~/.threadline/sessions.db`.
    pub path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Replaces `${VAR}` with the variable's value (empty if unset).
/// Unterminated `${` is kept literally.
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        if !name.is_empty() {
            out.push_str(&lookup(name).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ThreadlineConfig {
    /// Loads `path` (or the default location) and applies the process
    /// environment. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => config_path(),
        };

        let mut config = match path {
            Some(path) if path.exists() => Self::read(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "Failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let mut config = Self::parse(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "Failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.expand_vars(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn expand_vars(&mut self, lookup: impl Fn(&str) -> Option<String> + Copy) {
        let expand = |s: &mut String| *s = expand_with(s, lookup);
        let expand_opt = |s: &mut Option<String>| {
            if let Some(value) = s.as_mut() {
                *value = expand_with(value, lookup);
            }
        };

        expand(&mut self.app.model);
        expand(&mut self.app.bot_name);
        expand(&mut self.app.extra_prompt);
        expand(&mut self.provider.api_base);
        expand_opt(&mut self.provider.api_key);
        expand_opt(&mut self.provider.proxy);
        expand(&mut self.store.host);
        expand_opt(&mut self.store.username);
        expand_opt(&mut self.store.password);
    }

    /// Applies the environment overrides understood by earlier deployments.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| non_empty(lookup(name));

        if let Some(model) = var("GPT_ENGINE") {
            self.app.model = model;
        }
        if let Some(bot_name) = var("BOTNAME") {
            self.app.bot_name = bot_name;
        }
        if let Some(extra) = var("EXTRA_PROMPT") {
            self.app.extra_prompt = extra;
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(proxy) = var("OPENAI_PROXY") {
            self.provider.proxy = Some(proxy);
        }
        if let Some(host) = var("REDIS_HOST") {
            self.store.host = host;
        }
        if let Some(port) = var("REDIS_PORT") {
            self.store.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "REDIS_PORT",
                message: format!("`{port}` is not a port number"),
            })?;
        }
        if let Some(username) = var("REDIS_USERNAME") {
            self.store.username = Some(username);
        }
        if let Some(password) = var("REDIS_PASSWORD") {
            self.store.password = Some(password);
        }
        Ok(())
    }

    pub fn encoding(&self) -> Result<Encoding, ConfigError> {
        self.context
            .encoding
            .parse()
            .map_err(|err: threadline_context::UnknownEncoding| ConfigError::Invalid {
                field: "context.encoding",
                message: err.to_string(),
            })
    }

    #[must_use]
    pub fn markers(&self) -> TurnMarkers {
        TurnMarkers::new(self.app.bot_name.clone(), self.app.end_marker.clone())
    }

    #[must_use]
    pub fn temperature(&self) -> Temperature {
        Temperature::new(self.app.temperature)
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.app.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "app.model",
                message: "must not be empty".to_string(),
            });
        }
        if self.app.bot_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "app.bot_name",
                message: "must not be empty".to_string(),
            });
        }
        if self.context.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "context.max_tokens",
                message: "must be positive".to_string(),
            });
        }

        Ok(SessionConfig {
            model: self.app.model.clone(),
            markers: self.markers(),
            extra_prompt: self.app.extra_prompt.clone(),
            limits: ContextLimits {
                max_tokens: self.context.max_tokens,
                min_reply_tokens: self.context.min_reply_tokens,
            },
        })
    }

    #[must_use]
    pub fn sqlite_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| {
            config_dir()
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR))
                .join("sessions.db")
        })
    }

    /// Opens the configured session store.
    pub fn open_store(&self) -> anyhow::Result<Arc<dyn SessionStore>> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(self.sqlite_path())?)),
            StoreBackend::Redis => self.open_redis(),
        }
    }

    #[cfg(feature = "redis-backend")]
    fn open_redis(&self) -> anyhow::Result<Arc<dyn SessionStore>> {
        let config = threadline_context::RedisConfig {
            host: self.store.host.clone(),
            port: self.store.port,
            username: self.store.username.clone(),
            password: self.store.password.clone(),
        };
        Ok(Arc::new(threadline_context::RedisStore::connect(&config)?))
    }

    #[cfg(not(feature = "redis-backend"))]
    fn open_redis(&self) -> anyhow::Result<Arc<dyn SessionStore>> {
        Err(ConfigError::Invalid {
            field: "store.backend",
            message: "this build does not include the redis backend".to_string(),
        }
        .into())
    }

    pub fn provider_config(&self) -> OpenAiConfig {
        let api_key = ApiKey::new(self.provider.api_key.clone().unwrap_or_default());
        OpenAiConfig::new(api_key)
            .with_api_base(self.provider.api_base.clone())
            .with_proxy(self.provider.proxy.clone())
            .with_retry(RetryConfig::default().with_max_retries(self.provider.max_retries))
            .with_stream_idle_timeout(Duration::from_secs(
                self.provider.stream_idle_timeout_secs.max(1),
            ))
    }

    pub fn open_provider(&self) -> Result<OpenAiCompletions, ProviderError> {
        OpenAiCompletions::new(self.provider_config())
    }
}
