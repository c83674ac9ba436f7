//! Configuration management for chat-relay
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Loading happens in three phases (read, parse, validate) so each failure keeps
//! its own context. Environment overrides are applied between parsing and
//! validation.

use crate::backend::BackendKind;
use crate::conversation::{HistoryBudgeter, TokenBudget, TrimPolicy};
use crate::error::{AppError, AppResult};
use crate::tokenizer::TokenizerKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Overrides `backend.base_url`
pub const ENV_BASE_URL: &str = "CHAT_RELAY_BASE_URL";
/// Overrides `backend.api_key`
pub const ENV_API_KEY: &str = "CHAT_RELAY_API_KEY";
/// Overrides `backend.model`
pub const ENV_MODEL: &str = "CHAT_RELAY_MODEL";
/// Overrides `budget.token_limit`
pub const ENV_TOKEN_LIMIT: &str = "CHAT_RELAY_TOKEN_LIMIT";

const MAX_CONNECT_TIMEOUT_SECONDS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on establishing the upstream connection. The overall request
    /// deadline is owned by whatever fronts this service.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

fn default_connect_timeout() -> u64 {
    10
}

/// Upstream completion service
///
/// Fields are private; use the accessors. `base_url` and `api_key` are optional
/// here because their absence is reported per request, not at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    kind: BackendKind,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    /// Fixed model; `/api/models` returns only this when set
    #[serde(default)]
    model: Option<String>,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            base_url: None,
            api_key: None,
            model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Base URL, treating an empty string as unset
    pub fn base_url(&self) -> Option<&str> {
        non_empty(&self.base_url)
    }

    /// API key, treating an empty string as unset
    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn model(&self) -> Option<&str> {
        non_empty(&self.model)
    }

    /// Base URL or a configuration error naming the backend
    pub fn require_base_url(&self) -> AppResult<&str> {
        self.base_url().ok_or_else(|| {
            AppError::Config(format!(
                "Base URL is not configured for the {} backend",
                self.kind.as_str()
            ))
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// History budgeting settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default = "default_reserved_response_tokens")]
    pub reserved_response_tokens: usize,
    #[serde(default)]
    pub policy: TrimPolicy,
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            reserved_response_tokens: default_reserved_response_tokens(),
            policy: TrimPolicy::default(),
            tokenizer: TokenizerKind::default(),
        }
    }
}

impl BudgetConfig {
    pub fn token_budget(&self) -> AppResult<TokenBudget> {
        TokenBudget::new(self.token_limit, self.reserved_response_tokens)
    }

    pub fn budgeter(&self) -> AppResult<HistoryBudgeter> {
        Ok(HistoryBudgeter::new(self.token_budget()?, self.policy))
    }
}

fn default_token_limit() -> usize {
    TokenBudget::DEFAULT_LIMIT
}

fn default_reserved_response_tokens() -> usize {
    TokenBudget::DEFAULT_RESERVED
}

/// Upload edge checks
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
    /// MIME types accepted by `/api/upload`; an empty list accepts anything
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_upload_bytes(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

impl UploadConfig {
    /// Whether `content_type` is on the allow list
    ///
    /// Parameters such as `; charset=utf-8` are ignored and the comparison is
    /// case-insensitive.
    pub fn allows(&self, content_type: &str) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_allowed_content_types() -> Vec<String> {
    ["application/pdf", "text/plain", "text/markdown"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Saved conversation limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Distinct conversation ids held before `PUT /api/chats/{id}` refuses new ones
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
        }
    }
}

fn default_max_conversations() -> usize {
    1000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file, applying environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: read
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        // Phase 2: parse
        let mut config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: overrides, then validation
        config
            .apply_overrides_from(|key| std::env::var(key).ok())
            .and_then(|()| config.validate())
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Apply `CHAT_RELAY_*` overrides using `lookup` to resolve variables
    ///
    /// `from_file` passes the process environment; tests pass a closure.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            tracing::debug!(variable = ENV_BASE_URL, "Applying environment override");
            self.backend.base_url = Some(base_url);
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            tracing::debug!(variable = ENV_API_KEY, "Applying environment override");
            self.backend.api_key = Some(api_key);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            tracing::debug!(variable = ENV_MODEL, "Applying environment override");
            self.backend.model = Some(model);
        }
        if let Some(raw) = lookup(ENV_TOKEN_LIMIT) {
            self.budget.token_limit = raw.trim().parse().map_err(|_| {
                AppError::Config(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_TOKEN_LIMIT, raw
                ))
            })?;
            tracing::debug!(
                variable = ENV_TOKEN_LIMIT,
                token_limit = self.budget.token_limit,
                "Applying environment override"
            );
        }
        Ok(())
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`. Can also be called explicitly
    /// after building a `Config` by other means.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.connect_timeout_seconds == 0 {
            return Err(AppError::Config(
                "server.connect_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.server.connect_timeout_seconds > MAX_CONNECT_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "server.connect_timeout_seconds cannot exceed {} seconds, got {}",
                MAX_CONNECT_TIMEOUT_SECONDS, self.server.connect_timeout_seconds
            )));
        }

        if let Some(base_url) = self.backend.base_url()
            && !base_url.starts_with("http://")
            && !base_url.starts_with("https://")
        {
            return Err(AppError::Config(format!(
                "backend.base_url '{}' must start with 'http://' or 'https://'",
                base_url
            )));
        }

        if self.budget.token_limit == 0 {
            return Err(AppError::Config(
                "budget.token_limit must be greater than 0".to_string(),
            ));
        }
        if self.budget.reserved_response_tokens >= self.budget.token_limit {
            return Err(AppError::Config(format!(
                "budget.reserved_response_tokens ({}) must be less than budget.token_limit ({})",
                self.budget.reserved_response_tokens, self.budget.token_limit
            )));
        }

        if self.upload.max_bytes == 0 {
            return Err(AppError::Config(
                "upload.max_bytes must be greater than 0".to_string(),
            ));
        }
        if self.store.max_conversations == 0 {
            return Err(AppError::Config(
                "store.max_conversations must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    /// Parse and validate without consulting the environment
    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 3000

        [backend]
        kind = "openai"
        base_url = "https://api.openai.com/v1"
        api_key = "sk-test"
    "#;

    fn with_budget(token_limit: usize, reserved: usize) -> String {
        format!(
            "{MINIMAL}\n[budget]\ntoken_limit = {token_limit}\nreserved_response_tokens = {reserved}\n"
        )
    }

    #[test]
    fn test_config_from_str_parses_successfully() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.backend.kind(), BackendKind::OpenAi);
        assert_eq!(config.backend.base_url(), Some("https://api.openai.com/v1"));
        assert_eq!(config.backend.api_key(), Some("sk-test"));
        assert_eq!(config.backend.model(), None);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.connect_timeout_seconds, 10);
        assert_eq!(config.budget.token_limit, 4096);
        assert_eq!(config.budget.reserved_response_tokens, 512);
        assert_eq!(config.budget.policy, TrimPolicy::Middle);
        assert_eq!(config.budget.tokenizer, TokenizerKind::Cl100k);
        assert_eq!(config.upload.max_bytes, 10 * 1024 * 1024);
        assert!(config.upload.allows("application/pdf"));
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.store.max_conversations, 1000);
    }

    #[test]
    fn test_simple_backend_without_credentials_parses() {
        let config = Config::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [backend]
            kind = "simple"
            base_url = "http://localhost:8000"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.kind(), BackendKind::Simple);
        assert_eq!(config.backend.api_key(), None);
    }

    #[test]
    fn test_backend_without_base_url_is_accepted_at_load_time() {
        let config = Config::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [backend]
            kind = "openai"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.backend.require_base_url(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_empty_strings_are_treated_as_unset() {
        let backend = BackendConfig::new(BackendKind::OpenAi)
            .with_base_url("")
            .with_api_key("");
        assert_eq!(backend.base_url(), None);
        assert_eq!(backend.api_key(), None);
    }

    #[test]
    fn test_unknown_backend_kind_fails_to_parse() {
        let toml = MINIMAL.replace(r#"kind = "openai""#, r#"kind = "anthropic""#);
        let err = Config::from_str(&toml).unwrap_err();
        assert!(matches!(err, AppError::ConfigParseFailed { .. }));
    }

    #[test]
    fn test_budget_section_parses_policy_and_tokenizer() {
        let toml = format!(
            "{MINIMAL}\n[budget]\ntoken_limit = 8192\nreserved_response_tokens = 0\npolicy = \"front\"\ntokenizer = \"heuristic\"\n"
        );
        let config = Config::from_str(&toml).unwrap();
        assert_eq!(config.budget.token_limit, 8192);
        assert_eq!(config.budget.policy, TrimPolicy::Front);
        assert_eq!(config.budget.tokenizer, TokenizerKind::Heuristic);

        let budgeter = config.budget.budgeter().unwrap();
        assert_eq!(budgeter.budget().usable(), 8192);
        assert_eq!(budgeter.policy(), TrimPolicy::Front);
    }

    #[test]
    fn test_zero_token_limit_fails_validation() {
        let err = Config::from_str(&with_budget(0, 0)).unwrap_err();
        assert!(err.to_string().contains("token_limit"));
    }

    #[test]
    fn test_reserved_must_be_below_limit() {
        assert!(Config::from_str(&with_budget(512, 512)).is_err());
        assert!(Config::from_str(&with_budget(512, 600)).is_err());
        assert!(Config::from_str(&with_budget(513, 512)).is_ok());
    }

    #[test]
    fn test_invalid_base_url_scheme_fails_validation() {
        let toml = MINIMAL.replace("https://api.openai.com/v1", "ftp://example.com");
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_connect_timeout_bounds() {
        for (timeout, ok) in [(0, false), (1, true), (300, true), (301, false)] {
            let toml = MINIMAL.replace(
                "port = 3000",
                &format!("port = 3000\nconnect_timeout_seconds = {timeout}"),
            );
            assert_eq!(Config::from_str(&toml).is_ok(), ok, "timeout {timeout}");
        }
    }

    #[test]
    fn test_zero_max_upload_bytes_fails_validation() {
        let toml = format!("{MINIMAL}\n[upload]\nmax_bytes = 0\n");
        assert!(Config::from_str(&toml).is_err());
    }

    #[test]
    fn test_zero_max_conversations_fails_validation() {
        let toml = format!("{MINIMAL}\n[store]\nmax_conversations = 0\n");
        let err = Config::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("store.max_conversations"));
    }

    #[test]
    fn test_upload_allows_ignores_parameters_and_case() {
        let upload = UploadConfig::default();
        assert!(upload.allows("text/plain; charset=utf-8"));
        assert!(upload.allows("Application/PDF"));
        assert!(!upload.allows("image/png"));

        let open = UploadConfig {
            max_bytes: 1,
            allowed_content_types: Vec::new(),
        };
        assert!(open.allows("image/png"));
    }

    #[test]
    fn test_overrides_replace_backend_and_limit() {
        let mut config = Config::from_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BASE_URL, "http://localhost:9999/v1"),
            (ENV_API_KEY, "sk-override"),
            (ENV_MODEL, "gpt-4o-mini"),
            (ENV_TOKEN_LIMIT, "2048"),
        ]);

        config
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.backend.base_url(), Some("http://localhost:9999/v1"));
        assert_eq!(config.backend.api_key(), Some("sk-override"));
        assert_eq!(config.backend.model(), Some("gpt-4o-mini"));
        assert_eq!(config.budget.token_limit, 2048);
    }

    #[test]
    fn test_non_numeric_token_limit_override_fails() {
        let mut config = Config::from_str(MINIMAL).unwrap();
        let err = config
            .apply_overrides_from(|key| (key == ENV_TOKEN_LIMIT).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TOKEN_LIMIT));
    }

    #[test]
    fn test_absent_overrides_change_nothing() {
        let mut config = Config::from_str(MINIMAL).unwrap();
        config.apply_overrides_from(|_| None).unwrap();
        assert_eq!(config.backend.api_key(), Some("sk-test"));
        assert_eq!(config.budget.token_limit, 4096);
    }

    #[test]
    fn test_from_file_reads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_from_file_missing_file_reports_read_error() {
        let err = Config::from_file("/nonexistent/chat-relay.toml").unwrap_err();
        assert!(matches!(err, AppError::ConfigFileRead { .. }));
    }
}
