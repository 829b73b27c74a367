use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// Root configuration for chatnest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct Config {
    pub backend: Backend,
    pub supabase: SupabaseConfig,
    pub auth: AuthConfig,
    pub completion: CompletionConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Check that the settings required by the selected backend are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == Backend::Supabase {
            if self.supabase.url.is_empty() {
                return Err(ConfigError::Missing("supabase.url"));
            }
            if self.supabase.anon_key.is_empty() {
                return Err(ConfigError::Missing("supabase.anonKey"));
            }
            if self.auth.auto_confirm && self.supabase.service_role_key.is_empty() {
                return Err(ConfigError::Missing("supabase.serviceRoleKey"));
            }
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::Invalid(format!(
                "completion.temperature must be within 0.0..=2.0, got {}",
                self.completion.temperature
            )));
        }
        if self.completion.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "completion.historyLimit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Link embedded in verification emails, if a site URL is configured.
    pub fn verification_redirect(&self) -> Option<String> {
        let site = self.auth.site_url.trim().trim_end_matches('/');
        if site.is_empty() {
            return None;
        }
        Some(format!("{}{}", site, self.auth.verify_path))
    }

    /// Copy of the config with every secret masked, for display.
    pub fn redacted(&self) -> Config {
        fn mask(s: &str) -> String {
            if s.is_empty() {
                String::new()
            } else {
                "***".to_string()
            }
        }
        let mut cfg = self.clone();
        cfg.supabase.anon_key = mask(&cfg.supabase.anon_key);
        cfg.supabase.service_role_key = mask(&cfg.supabase.service_role_key);
        cfg.completion.api_key = mask(&cfg.completion.api_key);
        cfg
    }
}

/// Which implementation backs identity and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Supabase,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "supabase" => Ok(Backend::Supabase),
            "memory" => Ok(Backend::Memory),
            _ => Err(format!("Unknown backend: {s}")),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Supabase => write!(f, "supabase"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub service_role_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Confirm new accounts immediately instead of sending a verification email.
    pub auto_confirm: bool,
    pub site_url: String,
    pub verify_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auto_confirm: false,
            site_url: String::new(),
            verify_path: "/verify-email".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub history_limit: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            temperature: 0.7,
            max_tokens: 1000,
            system_prompt: "You are a helpful assistant. Answer clearly and concisely.".to_string(),
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

// ====== Config loading/saving ======

/// Load configuration from environment variables.
///
/// The base document is `CHATNEST_CONFIG` (full JSON) when set, otherwise the
/// config file (`config_path` or `~/.chatnest/config.json`). Individual env
/// vars are then overlaid on top.
pub fn load_config_from_env(config_path: Option<&Path>) -> Config {
    let mut cfg = match std::env::var("CHATNEST_CONFIG") {
        Ok(json) => match serde_json::from_str::<Config>(&json) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to parse CHATNEST_CONFIG: {}", e);
                load_config(config_path)
            }
        },
        Err(_) => load_config(config_path),
    };

    // Supabase
    if let Some(v) = first_env(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"]) {
        cfg.supabase.url = v;
    }
    if let Some(v) = first_env(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"]) {
        cfg.supabase.anon_key = v;
    }
    if let Ok(v) = std::env::var("SUPABASE_SERVICE_ROLE_KEY") {
        cfg.supabase.service_role_key = v;
    }

    // Auth
    if let Some(v) = first_env(&["SITE_URL", "NEXT_PUBLIC_SITE_URL"]) {
        cfg.auth.site_url = v;
    }
    env_parse("AUTH_AUTO_CONFIRM", &mut cfg.auth.auto_confirm);

    // Completion provider
    if let Ok(v) = std::env::var("OPENAI_API_KEY") {
        cfg.completion.api_key = v;
    }
    if let Ok(v) = std::env::var("OPENAI_API_BASE") {
        cfg.completion.api_base = Some(v).filter(|s| !s.is_empty());
    }
    if let Ok(v) = std::env::var("OPENAI_MODEL") {
        cfg.completion.model = v;
    }
    env_parse("OPENAI_TIMEOUT_SECS", &mut cfg.completion.timeout_secs);
    env_parse("OPENAI_MAX_RETRIES", &mut cfg.completion.max_retries);
    env_parse("OPENAI_TEMPERATURE", &mut cfg.completion.temperature);
    env_parse("OPENAI_MAX_TOKENS", &mut cfg.completion.max_tokens);
    env_parse("CHAT_HISTORY_LIMIT", &mut cfg.completion.history_limit);
    if let Ok(v) = std::env::var("CHAT_SYSTEM_PROMPT") {
        cfg.completion.system_prompt = v;
    }

    // Gateway
    if let Ok(v) = std::env::var("CHATNEST_HOST") {
        cfg.gateway.host = v;
    }
    env_parse("CHATNEST_PORT", &mut cfg.gateway.port);
    if let Ok(v) = std::env::var("CHATNEST_BACKEND") {
        match v.parse() {
            Ok(backend) => cfg.backend = backend,
            Err(e) => tracing::warn!("Ignoring CHATNEST_BACKEND: {}", e),
        }
    }

    cfg
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Overwrite `target` with the parsed env var; unparseable values keep the old one.
fn env_parse<T: FromStr>(name: &str, target: &mut T)
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(e) => tracing::warn!("Ignoring {}={:?}: {}", name, raw, e),
        }
    }
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatnest")
        .join("config.json")
}

/// Load configuration from file or create default.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
