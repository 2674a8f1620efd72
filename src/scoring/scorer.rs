//! Score extraction from judge responses.
//!
//! Two modes, chosen by the shape of the stored result:
//! - text: the judge writes `FINAL SCORE: <n>` somewhere in free text
//! - probability: the answer was logit-bias constrained to score tokens and
//!   the result carries logprobs; the score is the expectation under the
//!   softmax over the allowed tokens

use crate::models::{CompletionResult, PlotbenchError, Result, Score, TokenLogprob};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static SCORE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FINAL SCORE\W*(\d+)").expect("valid score tag pattern"));

/// Integer following the `FINAL SCORE` tag.
pub fn parse_text_score(message: &str) -> Option<u32> {
    SCORE_TAG_RE
        .captures(message)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Allowed score tokens and the value each one stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVocabulary {
    entries: Vec<(String, f64)>,
}

impl ScoreVocabulary {
    /// Every token must parse as a number.
    pub fn new(tokens: &[String]) -> Result<Self> {
        let entries = tokens
            .iter()
            .map(|token| {
                token
                    .trim()
                    .parse::<f64>()
                    .map(|value| (token.clone(), value))
                    .map_err(|_| {
                        PlotbenchError::InvalidInput(format!("score token {token:?} is not a number"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn value_of(&self, token: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expected score over the first position that offers any allowed token.
///
/// Alternatives outside the vocabulary are dropped before normalizing.
pub fn expected_score(positions: &[Vec<TokenLogprob>], vocabulary: &ScoreVocabulary) -> Option<f64> {
    positions.iter().find_map(|alternatives| {
        let allowed: Vec<(f64, f64)> = alternatives
            .iter()
            .filter_map(|alt| vocabulary.value_of(&alt.token).map(|v| (alt.logprob, v)))
            .collect();
        softmax_expectation(&allowed)
    })
}

/// Σ softmax(logprob)_i × value_i, or `None` for an empty input.
fn softmax_expectation(entries: &[(f64, f64)]) -> Option<f64> {
    let max = entries
        .iter()
        .map(|(logprob, _)| *logprob)
        .filter(|lp| lp.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }

    let mut total = 0.0;
    let mut weighted = 0.0;
    for (logprob, value) in entries {
        let weight = (logprob - max).exp();
        total += weight;
        weighted += weight * value;
    }
    (total > 0.0).then(|| weighted / total)
}

/// Score one stored judge result.
pub fn score_result(id: u64, result: &CompletionResult, vocabulary: &ScoreVocabulary) -> Score {
    let score = match &result.logprobs {
        Some(positions) => expected_score(positions, vocabulary).map(Score::Expected),
        None => parse_text_score(&result.response).map(Score::Discrete),
    };

    score.unwrap_or_else(|| {
        warn!(id, response = %result.response, "Could not parse judge response");
        Score::Unparsed
    })
}
