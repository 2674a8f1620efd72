//! Configuration models for plotbench.
//!
//! Everything the pipeline needs at start-up is read once from a TOML file
//! and passed explicitly into constructors. Nothing is loaded at import time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Top-level configuration for plotbench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat completions API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry/backoff bounds for the completion engine
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default generation knobs applied to every request
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Dataset and output roots
    pub paths: PathsConfig,

    /// Prompt-set files, one per stage
    pub prompts: PromptsConfig,

    /// Visual judge settings
    #[serde(default)]
    pub judge: JudgeConfig,
}

/// Chat completions API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key (supports ${VAR} expansion)
    #[serde(default)]
    pub api_key: Option<String>,

    /// File holding the API key
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_file: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Retry/backoff bounds.
///
/// `max_attempts` only counts unrecognized errors. Rate-limit waits are
/// bounded by `max_iterations` and `max_total_wait_secs` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after an unrecognized error
    #[serde(default = "default_fallback_wait")]
    pub fallback_wait_secs: f64,

    /// Factor applied to the server-suggested retry-after delay
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: f64,

    /// Ceiling on total time spent sleeping for one logical request
    #[serde(default = "default_max_total_wait")]
    pub max_total_wait_secs: f64,

    /// Ceiling on request cycles for one logical request, across all branches
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_fallback_wait() -> f64 {
    20.0
}

fn default_rate_limit_multiplier() -> f64 {
    1.5
}

fn default_max_total_wait() -> f64 {
    3600.0
}

fn default_max_iterations() -> u32 {
    200
}

impl RetryConfig {
    /// Reject values the retry engine cannot turn into waits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("fallback_wait_secs", self.fallback_wait_secs),
            ("max_total_wait_secs", self.max_total_wait_secs),
        ];
        for (field, value) in durations {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::InvalidRetry { field, value });
            }
        }
        if !self.rate_limit_multiplier.is_finite() || self.rate_limit_multiplier < 0.0 {
            return Err(ConfigError::InvalidRetry {
                field: "rate_limit_multiplier",
                value: self.rate_limit_multiplier,
            });
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fallback_wait_secs: default_fallback_wait(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
            max_total_wait_secs: default_max_total_wait(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Default generation knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Dataset and output roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Validated raw datapoints (input of the task stage)
    pub raw_dataset: PathBuf,

    /// Final datapoints with task.json (input of the plot and judge stages)
    pub dataset: PathBuf,

    /// Folder for job logs and score files
    pub out_folder: PathBuf,
}

/// Prompt-set JSON files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    pub tasks: PathBuf,
    pub plots: PathBuf,
    pub judge: PathBuf,
}

/// Level of detail requested for image inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    #[default]
    Auto,
    High,
}

/// Visual judge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Constrain the answer to one score token and read its logprobs
    #[serde(default)]
    pub logprobs: bool,

    /// Tokens nudged by logit bias in logprob mode
    #[serde(default = "default_highlighted_tokens")]
    pub highlighted_tokens: Vec<String>,

    #[serde(default = "default_logit_bias")]
    pub logit_bias: f64,

    #[serde(default = "default_top_logprobs")]
    pub top_logprobs: u32,

    #[serde(default)]
    pub image_detail: ImageDetail,

    /// Compare each generated plot against another datapoint's ground truth
    #[serde(default)]
    pub random_pairing: bool,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_highlighted_tokens() -> Vec<String> {
    (0..=10).map(|i| i.to_string()).collect()
}

fn default_logit_bias() -> f64 {
    100.0
}

fn default_top_logprobs() -> u32 {
    20
}

fn default_seed() -> u64 {
    42
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            logprobs: false,
            highlighted_tokens: default_highlighted_tokens(),
            logit_bias: default_logit_bias(),
            top_logprobs: default_top_logprobs(),
            image_detail: ImageDetail::default(),
            random_pairing: false,
            seed: default_seed(),
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

        Self::from_toml(&content, path)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.retry.validate()?;
        Ok(config)
    }

    /// Resolve the API key: explicit key, then key file, then environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api.api_key {
            return Ok(expand_env_vars(key));
        }

        if let Some(path) = &self.api.api_key_file {
            let key = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            return Ok(key.trim().to_string());
        }

        std::env::var(&self.api.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.api.api_key_env.clone(),
        })
    }
}

static ENV_VAR_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_RE.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors. All of them are fatal at setup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var, api_key or api_key_file in config")]
    MissingApiKey { env_var: String },

    #[error("No tokenizer available for model '{model}': {reason}")]
    Tokenizer { model: String, reason: String },

    #[error("Logit bias token {token:?} encodes to {count} tokens, expected exactly one")]
    MultiTokenBias { token: String, count: usize },

    #[error("Invalid retry setting {field} = {value}: expected a finite, non-negative number")]
    InvalidRetry { field: &'static str, value: f64 },

    #[error("Invalid prompt set {path}: {reason}")]
    PromptSet { path: PathBuf, reason: String },
}
