use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{ChatStreamError, CoreResult};
use crate::model::{CompletionParams, RESERVED_PARAM_KEYS};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientCfg {
    /// Full chat-completions URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub organization: Option<String>,
}

impl Default for ClientCfg {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            organization: None,
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    #[serde(default)]
    pub client: ClientCfg,
    /// Completion parameters forwarded verbatim in every request body.
    #[serde(default)]
    pub params: CompletionParams,
    /// HTTP client configuration. Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            client: ClientCfg::default(),
            params: CompletionParams::default(),
            http: HttpCfg::default(),
        }
    }

    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ChatStreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| ChatStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| ChatStreamError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| ChatStreamError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| ChatStreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| ChatStreamError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.model.trim().is_empty() {
            return Err(ChatStreamError::Validation("model must not be empty".into()));
        }
        if let Some(key) = RESERVED_PARAM_KEYS
            .iter()
            .find(|k| self.params.extra.contains_key(**k))
        {
            return Err(ChatStreamError::Validation(format!(
                "params may not override '{key}'"
            )));
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> CoreResult<SecretString> {
        match std::env::var(&self.client.api_key_env) {
            Ok(v) if !v.trim().is_empty() => Ok(SecretString::new(v.into())),
            _ => Err(ChatStreamError::Validation(format!(
                "environment variable {} is not set",
                self.client.api_key_env
            ))),
        }
    }
}
