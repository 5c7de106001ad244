//! Session configuration: optional `shellchat.toml` plus provider credentials
//! from the environment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_PATH: &str = "shellchat.toml";

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_VECTOR_STORE_ID: &str = "OPENAI_VECTOR_STORE_ID";
pub const OLLAMA_HOST: &str = "OLLAMA_HOST";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set; export it or add it to a .env file")]
    MissingCredential(&'static str),
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which model API the session talks to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    #[value(name = "openai")]
    OpenAi,
    Ollama,
}

/// How many of the actions in one model response are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPolicy {
    /// Execute only the first action; the rest stay in history text.
    #[default]
    First,
    /// Execute every action, in response order.
    All,
}

/// Session configuration (TOML). Missing fields use defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub provider: Provider,

    /// Model name; the provider's default when unset.
    pub model: Option<String>,

    /// Replaces the seeded instruction message.
    pub instructions: Option<String>,

    /// Directory for `session_<timestamp>.md|json` logs.
    pub log_dir: PathBuf,

    /// Ask the operator before running each shell command.
    pub confirm_actions: bool,

    pub action_policy: ActionPolicy,

    /// Offer the website and Docker inspection tools to the model.
    pub inspection_tools: bool,

    /// Per-request timeout for model calls.
    pub model_timeout_secs: u64,

    /// Extra attempts after a transport error (0 disables retry).
    pub model_retries: u32,

    /// Delay before the first retry; doubled for each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: None,
            instructions: None,
            log_dir: PathBuf::from("logs"),
            confirm_actions: true,
            action_policy: ActionPolicy::First,
            inspection_tools: false,
            model_timeout_secs: 120,
            model_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "model_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("log_dir must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, Provider::OpenAi) => "codex-mini-latest",
            (None, Provider::Ollama) => "llama3.2",
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: AppConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Where and how to reach the model API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    OpenAi {
        base_url: String,
        api_key: String,
        vector_store_id: Option<String>,
    },
    Ollama {
        host: String,
    },
}

/// Resolve the endpoint for `provider` from environment-like lookups.
///
/// A missing credential is reported here, before any network call.
pub fn resolve_endpoint<F>(provider: Provider, lookup: F) -> Result<Endpoint, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match provider {
        Provider::OpenAi => {
            let api_key =
                lookup(OPENAI_API_KEY).ok_or(ConfigError::MissingCredential(OPENAI_API_KEY))?;
            let base_url = lookup(OPENAI_BASE_URL)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            Ok(Endpoint::OpenAi {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
                vector_store_id: lookup(OPENAI_VECTOR_STORE_ID),
            })
        }
        Provider::Ollama => {
            let host = lookup(OLLAMA_HOST).unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
            Ok(Endpoint::Ollama {
                host: host.trim_end_matches('/').to_string(),
            })
        }
    }
}

/// Process environment lookup; blank values count as unset.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.model_name(), "codex-mini-latest");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shellchat.toml");
        fs::write(
            &path,
            "provider = \"ollama\"\naction_policy = \"all\"\nconfirm_actions = false\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.provider, Provider::Ollama);
        assert_eq!(cfg.action_policy, ActionPolicy::All);
        assert!(!cfg.confirm_actions);
        assert_eq!(cfg.log_dir, PathBuf::from("logs"));
        assert_eq!(cfg.model_name(), "llama3.2");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("shellchat.toml");
        fs::write(&path, "model_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        fs::write(&path, "provider = \"mystery\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_openai_key_is_a_config_error() {
        let err = resolve_endpoint(Provider::OpenAi, lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(OPENAI_API_KEY)));
        assert!(err.to_string().contains("OPENAI_API_KEY is not set"));
    }

    #[test]
    fn openai_endpoint_uses_defaults_and_overrides() {
        let endpoint =
            resolve_endpoint(Provider::OpenAi, lookup_from(&[(OPENAI_API_KEY, "sk-test")]))
                .expect("endpoint");
        assert_eq!(
            endpoint,
            Endpoint::OpenAi {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: "sk-test".to_string(),
                vector_store_id: None,
            }
        );

        let endpoint = resolve_endpoint(
            Provider::OpenAi,
            lookup_from(&[
                (OPENAI_API_KEY, "sk-test"),
                (OPENAI_BASE_URL, "http://proxy.local/v1/"),
                (OPENAI_VECTOR_STORE_ID, "vs_123"),
            ]),
        )
        .expect("endpoint");
        assert_eq!(
            endpoint,
            Endpoint::OpenAi {
                base_url: "http://proxy.local/v1".to_string(),
                api_key: "sk-test".to_string(),
                vector_store_id: Some("vs_123".to_string()),
            }
        );
    }

    #[test]
    fn ollama_needs_no_credential() {
        let endpoint = resolve_endpoint(Provider::Ollama, lookup_from(&[])).expect("endpoint");
        assert_eq!(
            endpoint,
            Endpoint::Ollama {
                host: "http://localhost:11434".to_string()
            }
        );
    }
}
