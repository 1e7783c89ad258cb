//! Environment variable overrides.

pub const ENV_MODEL: &str = "TOLLGATE_MODEL";
pub const ENV_BASE_URL: &str = "TOLLGATE_BASE_URL";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "TOLLGATE_IDLE_TIMEOUT_SECS";
pub const ENV_MAX_COMPLETION_TOKENS: &str = "TOLLGATE_MAX_COMPLETION_TOKENS";

/// Overrides read from the environment. Unparseable numbers are logged and
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub max_completion_tokens: Option<u32>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            model: text(ENV_MODEL),
            base_url: text(ENV_BASE_URL),
            idle_timeout_secs: text(ENV_IDLE_TIMEOUT_SECS)
                .and_then(|v| parse_number(ENV_IDLE_TIMEOUT_SECS, &v)),
            max_completion_tokens: text(ENV_MAX_COMPLETION_TOKENS)
                .and_then(|v| parse_number(ENV_MAX_COMPLETION_TOKENS, &v)),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    value
        .parse()
        .inspect_err(|_| tracing::warn!(key, value, "ignoring non-numeric override"))
        .ok()
}
