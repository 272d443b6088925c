//! Oracle and handle configuration.
//!
//! Loaded from a TOML file, from `ORACLE_RC_*` environment variables, or both
//! (`OracleConfig::load`: file first, then env overrides).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Reply pieces read per lifecycle question.
pub const DEFAULT_MAX_REPLY_TOKENS: usize = 20;

pub const DEFAULT_MODEL_PATH: &str = "models/deepseek-coder-6.7b-instruct.Q4_K_M.gguf";

/// Environment variable naming a TOML file read by `OracleConfig::load`.
pub const CONFIG_PATH_ENV: &str = "ORACLE_RC_CONFIG";

/// Top-level configuration of an `OracleClient`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OracleConfig {
    /// Decision engine selection and parameters
    #[serde(default)]
    pub engine: EngineConfig,
    /// Upper bound on reply pieces read from the engine per query
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: usize,
    /// Optional per-query deadline, checked between reply pieces
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
    /// What a handle copy does when the oracle says no
    #[serde(default)]
    pub copy_denial: CopyDenialPolicy,
}

fn default_max_reply_tokens() -> usize {
    DEFAULT_MAX_REPLY_TOKENS
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            max_reply_tokens: DEFAULT_MAX_REPLY_TOKENS,
            query_timeout_ms: None,
            copy_denial: CopyDenialPolicy::default(),
        }
    }
}

/// Available decision engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Fixed reply, no model (default deployment and tests)
    #[default]
    Stub,
    /// Local GGUF model through llama.cpp (requires the `llama` feature)
    Llama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub model_path: String,
    pub context_size: u32,
    pub gpu_layers: u32,
    /// Reply returned by the stub engine for every prompt. Defaults to
    /// `"false"`, so an unconfigured process never copies or deletes.
    pub stub_reply: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Stub,
            model_path: DEFAULT_MODEL_PATH.to_string(),
            context_size: 512,
            gpu_layers: 99,
            stub_reply: "false".to_string(),
        }
    }
}

/// Behaviour of a copy or assignment the oracle denies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CopyDenialPolicy {
    /// Fail the copy with `HandleError::CopyDenied`
    #[default]
    Reject,
    /// Hand out a handle that shares the block without being counted
    ShareUnretained,
}

impl OracleConfig {
    /// Create a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OracleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Read the file named by `ORACLE_RC_CONFIG` if set, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `ORACLE_RC_*` variables onto this configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(kind) = var("ORACLE_RC_ENGINE") {
            self.engine.kind = match kind.as_str() {
                "stub" => EngineKind::Stub,
                "llama" => EngineKind::Llama,
                other => return Err(ConfigError::Invalid(format!("unknown engine '{}'", other))),
            };
        }
        if let Some(path) = var("ORACLE_RC_MODEL_PATH") {
            self.engine.model_path = path;
        }
        if let Some(n) = var("ORACLE_RC_CONTEXT_SIZE") {
            self.engine.context_size = parse_number("ORACLE_RC_CONTEXT_SIZE", &n)?;
        }
        if let Some(n) = var("ORACLE_RC_GPU_LAYERS") {
            self.engine.gpu_layers = parse_number("ORACLE_RC_GPU_LAYERS", &n)?;
        }
        if let Some(reply) = var("ORACLE_RC_STUB_REPLY") {
            self.engine.stub_reply = reply;
        }
        if let Some(n) = var("ORACLE_RC_MAX_REPLY_TOKENS") {
            self.max_reply_tokens = parse_number("ORACLE_RC_MAX_REPLY_TOKENS", &n)?;
        }
        if let Some(ms) = var("ORACLE_RC_QUERY_TIMEOUT_MS") {
            self.query_timeout_ms = Some(parse_number("ORACLE_RC_QUERY_TIMEOUT_MS", &ms)?);
        }
        if let Some(policy) = var("ORACLE_RC_COPY_DENIAL") {
            self.copy_denial = match policy.as_str() {
                "reject" => CopyDenialPolicy::Reject,
                "share_unretained" => CopyDenialPolicy::ShareUnretained,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown copy denial policy '{}'",
                        other
                    )))
                }
            };
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reply_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max_reply_tokens must be at least 1".to_string(),
            ));
        }
        if self.engine.context_size == 0 {
            return Err(ConfigError::Invalid(
                "engine.context_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, raw: &str) -> Result<N, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got '{}'", key, raw)))
}
