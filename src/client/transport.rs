//! HTTP transport for chat completions.
//!
//! The transport only moves bytes: it returns whatever JSON the API sent,
//! error bodies included. Classifying and retrying is the engine's job.

use crate::client::ChatCompletionRequest;
use crate::models::{PlotbenchError, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Sends one payload and returns the raw JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &ChatCompletionRequest) -> Result<Value>;
}

/// reqwest-backed transport for any OpenAI-compatible endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// `timeout` bounds each call, independent of any retry backoff.
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PlotbenchError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| PlotbenchError::InvalidInput(format!("API key is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &ChatCompletionRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlotbenchError::Timeout(self.timeout)
                } else {
                    PlotbenchError::Network(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(PlotbenchError::Network)?;
        debug!(status = status.as_u16(), bytes = body.len(), "Completion response received");

        // Failures always surface as an `error` object so the engine can classify them.
        let wrapped = || {
            json!({
                "error": { "message": format!("HTTP {}: {}", status.as_u16(), body) }
            })
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(value) if status.is_success() || value.get("error").is_some() => Ok(value),
            Ok(_) => Ok(wrapped()),
            Err(_) if !status.is_success() => Ok(wrapped()),
            Err(e) => Err(PlotbenchError::Api {
                status: status.as_u16(),
                message: format!("Response is not JSON: {e}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CompletionClient, CompletionModel, ModelRequest, RequestBuilder, RetryPolicy};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> ChatCompletionRequest {
        RequestBuilder::new("gpt-4o", "sys")
            .build(&ModelRequest::new("hello"))
            .unwrap()
    }

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(
            "sk-test".to_string(),
            format!("{}/", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_body_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hi"}}]
            })))
            .mount(&server)
            .await;

        let value = transport(&server).send(&payload()).await.unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "hi");
    }

    #[tokio::test]
    async fn test_error_body_passed_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Please try again in 3s.", "type": "requests"}
            })))
            .mount(&server)
            .await;

        let value = transport(&server).send(&payload()).await.unwrap();
        assert_eq!(value["error"]["message"], "Please try again in 3s.");
    }

    #[tokio::test]
    async fn test_non_json_failure_wrapped_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let value = transport(&server).send(&payload()).await.unwrap();
        assert_eq!(value["error"]["message"], "HTTP 502: Bad Gateway");
    }

    async fn slow_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        server
    }

    fn impatient(server: &MockServer) -> HttpTransport {
        HttpTransport::new("sk-test".to_string(), server.uri(), Duration::from_millis(200)).unwrap()
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = slow_server().await;

        let err = impatient(&server).send(&payload()).await.unwrap_err();
        assert!(matches!(err, PlotbenchError::Timeout(t) if t == Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_timeouts_consume_fallback_attempts() {
        let server = slow_server().await;
        let policy = RetryPolicy {
            max_attempts: 2,
            fallback_wait: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let client = CompletionClient::new(RequestBuilder::new("gpt-4o", "sys"), impatient(&server))
            .with_policy(policy);

        let result = client.make_request(ModelRequest::new("hello")).await.unwrap();
        assert!(result.is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
