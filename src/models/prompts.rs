//! Prompt sets for each pipeline stage.
//!
//! A prompt set is a flat JSON object of named instructions. The raw object is
//! written as the header line of every job log so a run can be traced back to
//! the exact instructions it used.

use super::ConfigError;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;

/// A loaded prompt set: the raw JSON header plus its typed view.
#[derive(Debug, Clone)]
pub struct PromptSet<T> {
    pub header: Map<String, Value>,
    pub prompts: T,
}

impl<T: DeserializeOwned> PromptSet<T> {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;
        Self::from_json(&content, path)
    }

    fn from_json(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let header: Map<String, Value> =
            serde_json::from_str(content).map_err(|e| ConfigError::PromptSet {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        let prompts = serde_json::from_value(Value::Object(header.clone())).map_err(|e| {
            ConfigError::PromptSet {
                path: path.to_owned(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { header, prompts })
    }
}

/// Instructions for turning a plot's code into a task description.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskPrompts {
    #[serde(rename = "system prompt", default)]
    pub system_prompt: String,
    #[serde(rename = "part 1")]
    pub part_1: String,
    #[serde(rename = "part 2")]
    pub part_2: String,
}

/// Instructions for writing plotting code from a task.
#[derive(Debug, Clone, Deserialize)]
pub struct PlotPrompts {
    #[serde(rename = "system prompt", default)]
    pub system_prompt: String,
    #[serde(rename = "plot instruct", default)]
    pub plot_instruct: String,
    /// Prepended to the dataframe description when it is inlined
    #[serde(rename = "data instruct", default)]
    pub data_instruct: Option<String>,
}

/// Instructions for the visual judge.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgePrompts {
    #[serde(rename = "system prompt", default)]
    pub system_prompt: String,
    #[serde(rename = "request judge")]
    pub request_judge: String,
}
