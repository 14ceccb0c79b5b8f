//! MIRA configuration loaded from file and environment.
//!
//! Precedence: built-in defaults < TOML file (`MIRA_CONFIG`, default `config/mira.toml`)
//! < `MIRA__*` environment variables (`__` separates nested keys, e.g.
//! `MIRA__REFLECTION__MODE=live`). The legacy variables the backend always used
//! (`OPENROUTER_API_KEY`, `MIRA_AGENT_URL`, `SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY`)
//! fill any secret the file and `MIRA__*` left empty.
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | port | 5000 | Gateway listen port. |
//! | storage | sled | `sled` (on disk under `storage_path`) or `memory`. |
//! | crisis_phrases | built-in list | Ordered crisis phrases for the local scan. |
//! | few_shot_limit | 5 | Examples embedded per prompt (never more than 5). |
//! | reflection.mode | mock | `mock` or `live`. |
//! | reflection.timeout_ms | 15000 | Bound on one generation call. |
//! | safety_agent.url | unset | Remote safety agent; chat runs locally when unset. |
//! | safety_agent.timeout_ms | 20000 | Bound on one safety-agent call. |
//! | identity.timeout_ms | 5000 | Bound on one token check against Supabase. |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crisis::DEFAULT_CRISIS_PHRASES;
use crate::error::MiraResult;
use crate::few_shot::MAX_FEW_SHOT;
use crate::generator::LlmMode;

const DEFAULT_CONFIG_PATH: &str = "config/mira.toml";
const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

fn default_port() -> u16 {
    5000
}

fn default_storage_path() -> String {
    "./data".to_string()
}

fn default_crisis_phrases() -> Vec<String> {
    DEFAULT_CRISIS_PHRASES.iter().map(|s| s.to_string()).collect()
}

fn default_few_shot_limit() -> usize {
    MAX_FEW_SHOT
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sled,
    Memory,
}

/// Generative reflection collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionSettings {
    pub mode: LlmMode,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            mode: LlmMode::Mock,
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: 15_000,
            temperature: 0.7,
            max_tokens: 300,
        }
    }
}

impl ReflectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Remote safety-agent collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyAgentSettings {
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SafetyAgentSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 20_000,
        }
    }
}

impl SafetyAgentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Identity collaborator settings. `static_tokens` maps bearer token → user id for
/// development and tests; it is ignored when a Supabase URL is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub timeout_ms: u64,
    pub static_tokens: HashMap<String, String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            timeout_ms: 5_000,
            static_tokens: HashMap::new(),
        }
    }
}

impl IdentitySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiraConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default = "default_crisis_phrases")]
    pub crisis_phrases: Vec<String>,
    #[serde(default)]
    pub sentiment_lexicon_path: Option<PathBuf>,
    #[serde(default)]
    pub few_shot_path: Option<PathBuf>,
    #[serde(default = "default_few_shot_limit")]
    pub few_shot_limit: usize,
    #[serde(default)]
    pub reflection: ReflectionSettings,
    #[serde(default)]
    pub safety_agent: SafetyAgentSettings,
    #[serde(default)]
    pub identity: IdentitySettings,
    /// Bearer token for admin routes. Admin routes are disabled when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for MiraConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            storage: StorageBackend::default(),
            storage_path: default_storage_path(),
            crisis_phrases: default_crisis_phrases(),
            sentiment_lexicon_path: None,
            few_shot_path: None,
            few_shot_limit: default_few_shot_limit(),
            reflection: ReflectionSettings::default(),
            safety_agent: SafetyAgentSettings::default(),
            identity: IdentitySettings::default(),
            admin_token: None,
        }
    }
}

impl MiraConfig {
    /// Load from `MIRA_CONFIG` (or `config/mira.toml`) and the environment.
    pub fn load() -> MiraResult<Self> {
        let path = std::env::var("MIRA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from(Some(Path::new(&path)), true)?;
        cfg.apply_env_fallbacks(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Builds the config from an optional file, optionally layering `MIRA__*` variables.
    pub fn load_from(path: Option<&Path>, with_env: bool) -> MiraResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(p) = path.filter(|p| p.exists()) {
            builder = builder.add_source(config::File::from(p));
        }
        if with_env {
            builder = builder.add_source(config::Environment::with_prefix("MIRA").separator("__"));
        }
        let mut cfg: MiraConfig = builder.build()?.try_deserialize()?;
        cfg.few_shot_limit = cfg.few_shot_limit.min(MAX_FEW_SHOT);
        Ok(cfg)
    }

    /// Fills unset secrets and endpoints from the backend's long-standing variable names.
    pub fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if self.reflection.api_key.is_none() {
            self.reflection.api_key = get("OPENROUTER_API_KEY").or_else(|| get("OPENAI_API_KEY"));
        }
        if self.safety_agent.url.is_none() {
            self.safety_agent.url = get("MIRA_AGENT_URL");
        }
        if self.identity.supabase_url.is_none() {
            self.identity.supabase_url = get("SUPABASE_URL");
        }
        if self.identity.supabase_key.is_none() {
            self.identity.supabase_key = get("SUPABASE_SERVICE_ROLE_KEY").or_else(|| get("SUPABASE_ANON_KEY"));
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.storage_path).join("mira_ledger")
    }
}
