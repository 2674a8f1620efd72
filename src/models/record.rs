//! Record types flowing through the pipeline.
//!
//! Completion results come back from the engine, get stamped into job
//! records, and end up as benchmark score records.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One alternative token at a generated position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
}

/// Successful completion, normalized.
///
/// The generated text lives in `response` regardless of where the wire format
/// nests it. Everything else the API returned is kept in `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Generated text of the first choice
    pub response: String,

    /// API-side identifier of the completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_id: Option<String>,

    /// Per-position alternative tokens, when logprobs were requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<Vec<TokenLogprob>>>,

    /// Remaining wire payload (model, usage, choices, ...)
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl CompletionResult {
    /// Build a result carrying only text.
    pub fn from_text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            completion_id: None,
            logprobs: None,
            raw: Map::new(),
        }
    }
}

/// Keys owned by [`JobRecord`]; stripped from the raw payload to keep lines unambiguous.
const JOB_RECORD_KEYS: &[&str] = &["id", "task", "code", "plot results", "pair id", "probs"];

/// Summary of the external rendering step stored alongside a judge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSummary {
    #[serde(default)]
    pub error: String,
    pub images: usize,
}

/// A completion stamped with the work item's identity and stage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Datapoint identity, stable across runs
    pub id: u64,

    /// Task text sent to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Code extracted from the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(
        rename = "plot results",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub plot_results: Option<PlotSummary>,

    /// Datapoint whose ground truth was used, when randomly paired
    #[serde(rename = "pair id", default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<u64>,

    /// The request was logit-bias constrained and carries logprobs
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub probs: bool,

    #[serde(flatten)]
    pub result: CompletionResult,
}

impl JobRecord {
    pub fn new(id: u64, mut result: CompletionResult) -> Self {
        for key in JOB_RECORD_KEYS {
            result.raw.remove(*key);
        }
        Self {
            id,
            task: None,
            code: None,
            plot_results: None,
            pair_id: None,
            probs: false,
            result,
        }
    }
}

/// Output of the external plot execution step for one datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotOutcome {
    /// Rendered images, base64 encoded PNG
    #[serde(default)]
    pub images: Vec<String>,

    /// Execution error ("" when the code ran cleanly)
    #[serde(default)]
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Benchmark score of one datapoint.
///
/// Serialized as a JSON integer, a JSON float, or the string `"UNK"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    /// Integer parsed from a free-text verdict
    Discrete(u32),
    /// Probability-weighted expectation over score tokens
    Expected(f64),
    /// Response could not be parsed
    Unparsed,
}

const UNPARSED_SENTINEL: &str = "UNK";

impl Score {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Discrete(v) => Some(f64::from(*v)),
            Self::Expected(v) => Some(*v),
            Self::Unparsed => None,
        }
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Discrete(v) => serializer.serialize_u32(*v),
            Self::Expected(v) => serializer.serialize_f64(*v),
            Self::Unparsed => serializer.serialize_str(UNPARSED_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(u32),
            Float(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(Self::Discrete(v)),
            Repr::Float(v) => Ok(Self::Expected(v)),
            Repr::Text(s) if s == UNPARSED_SENTINEL => Ok(Self::Unparsed),
            Repr::Text(s) => Err(de::Error::custom(format!("unexpected score {s:?}"))),
        }
    }
}

/// Final benchmark record of one datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: u64,
    pub score: Score,
    /// Plot execution error ("" if none)
    #[serde(default)]
    pub error: String,
    #[serde(rename = "has plot")]
    pub has_plot: bool,
    #[serde(rename = "pair id", default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<u64>,
}

/// Summary statistics of a scoring pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchStats {
    #[serde(rename = "min score")]
    pub min_score: Option<f64>,
    #[serde(rename = "max score")]
    pub max_score: Option<f64>,
    #[serde(rename = "mean score")]
    pub mean_score: Option<f64>,
    #[serde(rename = "median score")]
    pub median_score: Option<f64>,
    #[serde(rename = "num items")]
    pub num_items: usize,
    #[serde(rename = "error number")]
    pub error_number: usize,
    #[serde(rename = "error rate")]
    pub error_rate: f64,
    pub unparsed: usize,
}

/// Statistics for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Items offered by the dataset
    pub total_items: usize,

    /// Items skipped because the job log already had them
    pub already_done: usize,

    /// Records appended during this run
    pub appended: usize,

    /// Items whose retries were exhausted
    pub exhausted: usize,

    /// Items the stage declined before any request
    pub declined: usize,

    /// Run stopped on cancellation
    pub interrupted: bool,

    pub started_at: DateTime<Utc>,

    pub runtime_secs: f64,
}

impl RunStats {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            already_done: 0,
            appended: 0,
            exhausted: 0,
            declined: 0,
            interrupted: false,
            started_at: Utc::now(),
            runtime_secs: 0.0,
        }
    }

    /// Items neither done before nor during this run.
    pub fn remaining(&self) -> usize {
        self.total_items
            .saturating_sub(self.already_done + self.appended + self.declined)
    }
}
