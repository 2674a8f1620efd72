//! Logit-bias vocabulary resolution.
//!
//! The API takes logit bias keyed by token id, so every highlighted string has
//! to map to exactly one token of the target model. Anything else is a
//! configuration error raised before the first request.

use crate::models::ConfigError;
use std::collections::BTreeMap;
use tiktoken_rs::CoreBPE;

/// Something that can split text into model token ids.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Vec<u64>;
}

/// BPE tokenizer of an OpenAI model.
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// Tokenizer for `model`, falling back to `o200k_base` for unknown ids.
    pub fn for_model(model: &str) -> Result<Self, ConfigError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::o200k_base())
            .map_err(|e| ConfigError::Tokenizer {
                model: model.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u64> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as u64)
            .collect()
    }
}

/// Resolve `token string -> bias` into the wire form `token id -> bias`.
pub fn resolve_logit_bias(
    biases: &BTreeMap<String, f64>,
    tokenizer: &dyn Tokenizer,
) -> Result<BTreeMap<String, f64>, ConfigError> {
    let mut resolved = BTreeMap::new();
    for (token, bias) in biases {
        let ids = tokenizer.encode(token);
        match ids.as_slice() {
            [id] => {
                resolved.insert(id.to_string(), *bias);
            }
            _ => {
                return Err(ConfigError::MultiTokenBias {
                    token: token.clone(),
                    count: ids.len(),
                });
            }
        }
    }
    Ok(resolved)
}

/// Same bias for every highlighted token.
pub fn uniform_bias(tokens: &[String], bias: f64) -> BTreeMap<String, f64> {
    tokens.iter().map(|t| (t.clone(), bias)).collect()
}
