//! Configuration — YAML config + env var overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Known provider presets
const PROVIDER_PRESETS: &[(&str, Option<&str>)] = &[
    ("openai", Some("https://api.openai.com/v1")),
    ("openrouter", Some("https://openrouter.ai/api/v1")),
];

/// Provider-specific API key env vars (checked before OPENAI_API_KEY fallback)
const PROVIDER_KEY_ENV_VARS: &[(&str, &str)] = &[("openrouter", "OPENROUTER_API_KEY")];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Websocket address of the pub/sub broker
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// "openai" | "openrouter" | "custom"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// LLM model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (set here or via env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL for Chat Completions API (auto-set for known providers)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Max output tokens per reply
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Pause between reactor iterations
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Upper bound on one decision call, per provider
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,

    /// Tried in priority order after the primary provider fails
    #[serde(default)]
    pub fallback_providers: Vec<ProviderEntry>,

    /// Who lives in town
    #[serde(default = "default_residents")]
    pub residents: Vec<Resident>,

    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Lower is tried first
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub name: String,
    pub persona: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_broker_url() -> String {
    "ws://localhost:8080".into()
}
fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4.1".into()
}
fn default_max_output_tokens() -> u32 {
    500
}
fn default_tick_millis() -> u64 {
    1000
}
fn default_decision_timeout() -> u64 {
    60
}
fn default_residents() -> Vec<Resident> {
    vec![
        Resident {
            name: "Alice".into(),
            persona: "A friendly resident who loves gardening.".into(),
        },
        Resident {
            name: "Bob".into(),
            persona: "A grumpy neighbor who complains about noise.".into(),
        },
    ]
}

impl Config {
    /// Load config from a YAML file with env var overrides.
    /// `config_path` is the path to config.yaml.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;

        let mut config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config.yaml")?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus env var overrides, for running without a config file.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("HAMLET_BROKER_URL") {
            self.broker_url = url;
        }

        // Provider (env var override)
        if let Ok(p) = std::env::var("HAMLET_PROVIDER") {
            self.provider = p;
        }

        // Base URL: env var > config > provider preset
        if let Ok(url) = std::env::var("HAMLET_BASE_URL") {
            self.base_url = Some(url);
        } else if self.base_url.is_none() {
            self.base_url = PROVIDER_PRESETS
                .iter()
                .find(|(p, _)| *p == self.provider)
                .and_then(|(_, url)| url.map(String::from));
        }

        // API key: provider-specific env var > OPENAI_API_KEY > config
        let provider_key_var = PROVIDER_KEY_ENV_VARS
            .iter()
            .find(|(p, _)| *p == self.provider)
            .map(|(_, var)| *var);

        if let Some(var) = provider_key_var {
            if let Ok(key) = std::env::var(var) {
                self.api_key = Some(key);
            }
        }
        if self.api_key.is_none() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.api_key = Some(key);
            }
        }

        // Model (env var override)
        if let Ok(m) = std::env::var("HAMLET_MODEL") {
            self.model = m;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.provider == "custom" && self.base_url.is_none() {
            anyhow::bail!(
                "Provider 'custom' requires base_url in config.yaml or HAMLET_BASE_URL env var"
            );
        }
        if self.residents.is_empty() {
            anyhow::bail!("config.yaml lists no residents");
        }
        Ok(())
    }

    /// Reactor pacing. Never zero, so an idle agent cannot busy-spin.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    /// Longest one reply may take across the primary provider and every
    /// fallback, counting the single retry each provider may make.
    pub fn decision_deadline(&self) -> Duration {
        let per_provider = |timeout: Duration| timeout * 2 + Duration::from_secs(2);
        let fallbacks: Duration = self
            .fallback_providers
            .iter()
            .map(|p| {
                per_provider(
                    p.timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.decision_timeout()),
                )
            })
            .sum();
        per_provider(self.decision_timeout()) + fallbacks
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            max_output_tokens: default_max_output_tokens(),
            tick_millis: default_tick_millis(),
            decision_timeout_secs: default_decision_timeout(),
            fallback_providers: Vec::new(),
            residents: default_residents(),
            log_format: LogFormat::default(),
        }
    }
}
