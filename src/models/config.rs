//! Configuration models for verisynth.
//!
//! Every field has a default, so a run without a config file behaves like the
//! reference batch setup (Llama-3.1 models behind a vLLM batch endpoint).

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion endpoint used by `run-batch`
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Per-stage sampling parameters
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Best-of-k selection settings
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Shard settings for `--index`
    #[serde(default)]
    pub shard: ShardConfig,
}

/// OpenAI-compatible endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL (e.g. "http://localhost:8000/v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; supports ${ENV_VAR} expansion
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Requests in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_api_key_env() -> String {
    "VERISYNTH_API_KEY".to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    64
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
        }
    }
}

/// Sampling parameters attached to every request of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_top_p() -> f64 {
    1.0
}

const RESPONDER_MODEL: &str = "meta-llama/Llama-3.1-8B-Instruct";
const EXTRACTOR_MODEL: &str = "meta-llama/Meta-Llama-3.1-70B-Instruct";
const COMPOSER_MODEL: &str = "ultracomposer";

impl SamplingParams {
    /// Greedy decoding with the given model.
    pub fn greedy(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            top_p: 1.0,
            stop: Vec::new(),
        }
    }
}

/// Sampling parameters per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_resample")]
    pub resample: SamplingParams,

    #[serde(default = "default_evaluate")]
    pub evaluate: SamplingParams,

    #[serde(default = "default_extract")]
    pub extract: SamplingParams,

    #[serde(default = "default_extract")]
    pub questions: SamplingParams,

    #[serde(default = "default_augment")]
    pub augment: SamplingParams,
}

fn default_resample() -> SamplingParams {
    SamplingParams {
        model: RESPONDER_MODEL.to_string(),
        max_tokens: default_max_tokens(),
        temperature: 1.0,
        top_p: 0.95,
        stop: vec!["<|eot_id|>".to_string(), "<|end_of_text|>".to_string()],
    }
}

fn default_evaluate() -> SamplingParams {
    SamplingParams::greedy(RESPONDER_MODEL)
}

fn default_extract() -> SamplingParams {
    SamplingParams::greedy(EXTRACTOR_MODEL)
}

fn default_augment() -> SamplingParams {
    SamplingParams {
        model: COMPOSER_MODEL.to_string(),
        max_tokens: default_max_tokens(),
        temperature: 0.7,
        top_p: 1.0,
        stop: vec!["<|eot_id|>".to_string()],
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            resample: default_resample(),
            evaluate: default_evaluate(),
            extract: default_extract(),
            questions: default_extract(),
            augment: default_augment(),
        }
    }
}

/// What the SFT merge does with a query none of whose replicas satisfied
/// every constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnUnresolved {
    /// Emit the last replica's response as if it had passed
    #[default]
    EmitLast,
    /// Emit nothing for the query
    Drop,
    /// Emit the last replica's response with `constraints_satisfied: false`
    EmitFlagged,
}

/// Best-of-k selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Replicas sampled per query (k)
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    #[serde(default)]
    pub on_unresolved: OnUnresolved,
}

fn default_replicas() -> usize {
    5
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            on_unresolved: OnUnresolved::default(),
        }
    }
}

/// Fixed-size sharding of the source record list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    #[serde(default = "default_shard_size")]
    pub size: usize,
}

fn default_shard_size() -> usize {
    10_000
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            size: default_shard_size(),
        }
    }
}

/// A window over the source records.
///
/// `index: None` covers the whole file. Correlation ids restart at 1 for
/// every window, so ids are only unique within one shard's artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: Option<usize>,
    pub size: usize,
}

impl Shard {
    pub fn new(index: Option<usize>, size: usize) -> Self {
        Self { index, size }
    }

    pub fn all() -> Self {
        Self {
            index: None,
            size: default_shard_size(),
        }
    }

    /// Record range covered by this shard, clamped to `len`.
    pub fn window(&self, len: usize) -> Range<usize> {
        match self.index {
            None => 0..len,
            Some(index) => {
                let start = index.saturating_mul(self.size).min(len);
                let end = index.saturating_add(1).saturating_mul(self.size).min(len);
                start..end
            }
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or fall back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selection.replicas == 0 {
            return Err(ConfigError::Invalid("selection.replicas must be >= 1".into()));
        }
        if self.shard.size == 0 {
            return Err(ConfigError::Invalid("shard.size must be >= 1".into()));
        }
        if self.endpoint.concurrency == 0 {
            return Err(ConfigError::Invalid("endpoint.concurrency must be >= 1".into()));
        }
        Ok(())
    }

    /// Resolve the endpoint API key from config or environment.
    ///
    /// Local endpoints commonly run without auth, so a missing key is `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.endpoint.api_key {
            return Some(expand_env_vars(key));
        }
        std::env::var(&self.endpoint.api_key_env).ok()
    }

    pub fn shard(&self, index: Option<usize>) -> Shard {
        Shard::new(index, self.shard.size)
    }
}

/// Expand `${VAR_NAME}` placeholders; unset variables are left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }
    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = Config::default();
        assert_eq!(config.selection.replicas, 5);
        assert_eq!(config.selection.on_unresolved, OnUnresolved::EmitLast);
        assert_eq!(config.shard.size, 10_000);
        assert_eq!(config.sampling.resample.temperature, 1.0);
        assert_eq!(config.sampling.resample.top_p, 0.95);
        assert_eq!(config.sampling.evaluate.temperature, 0.0);
        assert!(config.sampling.evaluate.stop.is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
[selection]
replicas = 3
on_unresolved = "emit_flagged"

[sampling.resample]
model = "local-model"
temperature = 0.9
"#,
        )
        .unwrap();

        assert_eq!(config.selection.replicas, 3);
        assert_eq!(config.selection.on_unresolved, OnUnresolved::EmitFlagged);
        assert_eq!(config.sampling.resample.model, "local-model");
        assert_eq!(config.sampling.resample.max_tokens, 4096);
        assert_eq!(config.sampling.resample.top_p, 1.0);
        assert_eq!(config.endpoint.concurrency, 64);
    }

    #[test]
    fn test_validate_rejects_zero_replicas() {
        let mut config = Config::default();
        config.selection.replicas = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_shard_window() {
        assert_eq!(Shard::new(None, 10).window(25), 0..25);
        assert_eq!(Shard::new(Some(0), 10).window(25), 0..10);
        assert_eq!(Shard::new(Some(2), 10).window(25), 20..25);
        assert_eq!(Shard::new(Some(5), 10).window(25), 25..25);
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown() {
        assert_eq!(
            expand_env_vars("${VERISYNTH_SURELY_UNSET_VAR}"),
            "${VERISYNTH_SURELY_UNSET_VAR}"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/verisynth.toml")).unwrap();
        assert_eq!(config.selection.replicas, 5);
    }
}
