//! Governor settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::ConfigResult;
use super::env::EnvOverrides;
use crate::client::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::coordinator::{
    CoordinatorSettings, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_COMPLETION_TOKENS,
};
use crate::pricing::{ModelPricing, PricingTable};
use crate::quota::QuotaPolicy;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const STORE_FILE: &str = "usage.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub max_completion_tokens: u32,
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub system_prompt: Option<String>,
    /// Initial policy; a policy saved in the store takes precedence
    pub quota: QuotaPolicy,
    /// Per-model overrides merged over the built-in table
    pub pricing: BTreeMap<String, ModelPricing>,
    pub store_path: Option<PathBuf>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            system_prompt: None,
            quota: QuotaPolicy::default(),
            pricing: BTreeMap::new(),
            store_path: None,
        }
    }
}

impl GovernorConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = serde_json::from_str(&content)?;
                tracing::debug!(path = %path.display(), "configuration loaded");
                Ok(config.sanitized())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`load`](Self::load), but falls back to defaults on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.as_ref().display(),
                error = %e,
                "invalid configuration, using defaults"
            );
            Self::default()
        })
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(EnvOverrides::from_env())
    }

    pub fn with_overrides(mut self, overrides: EnvOverrides) -> Self {
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(secs) = overrides.idle_timeout_secs {
            self.idle_timeout_secs = secs;
        }
        if let Some(tokens) = overrides.max_completion_tokens {
            self.max_completion_tokens = tokens;
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        if self.idle_timeout_secs == 0 {
            tracing::warn!("idle timeout of 0s ignored");
            self.idle_timeout_secs = DEFAULT_IDLE_TIMEOUT.as_secs();
        }
        if self.request_timeout_secs == 0 {
            tracing::warn!("request timeout of 0s ignored");
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT.as_secs();
        }
        self.quota = self.quota.sanitized();
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key from the variable named by `api_key_env`.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
    }

    /// Built-in prices, then file overrides, then environment overrides.
    pub fn pricing_table(&self) -> PricingTable {
        PricingTable::builder()
            .with_defaults()
            .models(self.pricing.iter().map(|(k, v)| (k.clone(), *v)))
            .from_env()
            .build()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key(),
            request_timeout: self.request_timeout(),
            ..Default::default()
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            model: self.model.clone(),
            max_completion_tokens: self.max_completion_tokens,
            idle_timeout: self.idle_timeout(),
        }
    }

    /// Configured store path, or `usage.json` in the platform data directory.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store_path.clone().or_else(default_store_path)
    }
}

pub fn default_store_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tollgate").map(|dirs| dirs.data_dir().join(STORE_FILE))
}
