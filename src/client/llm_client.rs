//! Completion client: request building, retry classification and response
//! normalization around a [`Transport`].
//!
//! Each logical request runs as a small state machine:
//! - no `error` key in the body: done, normalize and return
//! - `Please try again in <N>s.` in the error message: wait 1.5 x N, retry
//! - any other error: wait the fallback delay, consume an attempt, retry
//!
//! A request whose budget runs out yields `Ok(None)`.

use crate::client::retry::{Exhaustion, RetryPolicy, parse_retry_after};
use crate::client::{CancelToken, CompletionModel, ModelRequest, RequestBuilder, Transport};
use crate::models::{CompletionResult, PlotbenchError, Result, TokenLogprob};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// How a single response body was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(CompletionResult),
    RateLimited { retry_after_secs: u64, message: String },
    Failed(String),
}

/// Classify a raw response body.
pub fn classify(body: Value) -> Outcome {
    let mut map = match body {
        Value::Object(map) => map,
        other => return Outcome::Failed(format!("unexpected response body: {other}")),
    };

    if let Some(error) = map.remove("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return match parse_retry_after(&message) {
            Some(secs) => Outcome::RateLimited {
                retry_after_secs: secs,
                message,
            },
            None => Outcome::Failed(message),
        };
    }

    match normalize(map) {
        Ok(result) => Outcome::Done(result),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

/// Lift the first choice's text (and logprobs, if any) to the top level.
fn normalize(mut raw: Map<String, Value>) -> Result<CompletionResult> {
    let choice = raw
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| PlotbenchError::ParseError("No choices in response".to_string()))?;

    let response = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let logprobs = choice
        .pointer("/logprobs/content")
        .and_then(Value::as_array)
        .map(|positions| positions.iter().map(top_logprobs).collect::<Vec<_>>());

    let completion_id = match raw.remove("id") {
        Some(Value::String(id)) => Some(id),
        Some(other) => Some(other.to_string()),
        None => None,
    };

    Ok(CompletionResult {
        response,
        completion_id,
        logprobs,
        raw,
    })
}

fn top_logprobs(position: &Value) -> Vec<TokenLogprob> {
    position
        .get("top_logprobs")
        .and_then(Value::as_array)
        .map(|alternatives| {
            alternatives
                .iter()
                .filter_map(|alt| serde_json::from_value(alt.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// A model endpoint with retry semantics.
pub struct CompletionClient<T: Transport> {
    builder: RequestBuilder,
    transport: T,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl<T: Transport> CompletionClient<T> {
    pub fn new(builder: RequestBuilder, transport: T) -> Self {
        Self {
            builder,
            transport,
            policy: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn send(&self, payload: &crate::client::ChatCompletionRequest) -> Result<Outcome> {
        let sent = tokio::select! {
            sent = self.transport.send(payload) => sent,
            _ = self.cancel.cancelled() => return Err(PlotbenchError::Cancelled),
        };

        match sent {
            Ok(body) => Ok(classify(body)),
            Err(e) if e.is_retryable() => Ok(Outcome::Failed(e.to_string())),
            Err(e) => Err(e),
        }
    }

    fn give_up(&self, why: Exhaustion, iterations: u32, waited: Duration) -> Result<Option<CompletionResult>> {
        warn!(
            model = %self.builder.model(),
            reason = ?why,
            iterations,
            waited_secs = waited.as_secs_f64(),
            "Retry budget exhausted"
        );
        Ok(None)
    }
}

#[async_trait]
impl<T: Transport> CompletionModel for CompletionClient<T> {
    async fn make_request(&self, request: ModelRequest) -> Result<Option<CompletionResult>> {
        let payload = self.builder.build(&request)?;
        let mut budget = self.policy.budget();

        loop {
            self.cancel.check()?;
            if let Err(why) = budget.begin_iteration() {
                return self.give_up(why, budget.iterations(), budget.waited());
            }

            let planned = match self.send(&payload).await? {
                Outcome::Done(result) => {
                    debug!(
                        model = %self.builder.model(),
                        iterations = budget.iterations(),
                        "Completion succeeded"
                    );
                    return Ok(Some(result));
                }
                Outcome::RateLimited {
                    retry_after_secs,
                    message,
                } => {
                    debug!(retry_after_secs, %message, "Rate limited");
                    budget.rate_limited(retry_after_secs)
                }
                Outcome::Failed(message) => {
                    warn!(
                        attempt = budget.attempts() + 1,
                        max_attempts = self.policy.max_attempts,
                        %message,
                        "Request failed"
                    );
                    budget.unknown_error()
                }
            };

            match planned {
                Ok(wait) => self.cancel.sleep(wait).await?,
                Err(why) => return self.give_up(why, budget.iterations(), budget.waited()),
            }
        }
    }
}
