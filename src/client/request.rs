//! Chat completion request payloads.
//!
//! Wire shape (OpenAI-compatible):
//! one system message with a single text block, then one user message whose
//! content is a text block followed by one image block per image.

use crate::client::image::encode_images;
use crate::client::tokenizer::{Tokenizer, resolve_logit_bias};
use crate::client::{ImageRef, ModelRequest};
use crate::models::{ConfigError, ImageDetail, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Optional generation knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u32>,

    /// Token id -> bias, already resolved against the model tokenizer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, f64>>,

    #[serde(rename = "logprobs", skip_serializing_if = "Option::is_none")]
    pub request_logprobs: Option<bool>,

    #[serde(rename = "top_logprobs", skip_serializing_if = "Option::is_none")]
    pub top_logprobs_count: Option<u32>,
}

impl GenerationArgs {
    /// Merge `self` over `other`; keys set on `self` win.
    pub fn merged_over(&self, other: &GenerationArgs) -> GenerationArgs {
        GenerationArgs {
            max_tokens: self.max_tokens.or(other.max_tokens),
            temperature: self.temperature.or(other.temperature),
            sample_count: self.sample_count.or(other.sample_count),
            logit_bias: self.logit_bias.clone().or_else(|| other.logit_bias.clone()),
            request_logprobs: self.request_logprobs.or(other.request_logprobs),
            top_logprobs_count: self.top_logprobs_count.or(other.top_logprobs_count),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: ImageDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Wire-ready chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub args: GenerationArgs,
}

/// Builds chat completion payloads for one model and system prompt.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: String,
    system_prompt: String,
    args: GenerationArgs,
}

impl RequestBuilder {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            args: GenerationArgs::default(),
        }
    }

    /// Instance-level generation args, applied to every request.
    pub fn with_args(mut self, args: GenerationArgs) -> Self {
        self.args = args;
        self
    }

    /// Constrain answers to the given single-token strings.
    ///
    /// Fails if any string is not exactly one token for the model.
    pub fn with_logit_bias(
        mut self,
        biases: &BTreeMap<String, f64>,
        tokenizer: &dyn Tokenizer,
    ) -> std::result::Result<Self, ConfigError> {
        self.args.logit_bias = Some(resolve_logit_bias(biases, tokenizer)?);
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the payload for one call.
    ///
    /// A non-empty `request.system_prompt` replaces the stored prompt for this
    /// call only.
    pub fn build(&self, request: &ModelRequest) -> Result<ChatCompletionRequest> {
        let system_prompt = match request.system_prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => self.system_prompt.as_str(),
        };

        Ok(ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_content(
                    &request.text,
                    &request.images,
                    request.image_detail,
                )?),
            ],
            args: self.args.merged_over(&request.args),
        })
    }
}

fn user_content(text: &str, images: &[ImageRef], detail: ImageDetail) -> Result<Vec<ContentBlock>> {
    let mut content = Vec::with_capacity(images.len() + 1);
    content.push(ContentBlock::Text {
        text: text.to_string(),
    });
    for image in encode_images(images)? {
        content.push(ContentBlock::ImageUrl {
            image_url: ImageUrl {
                url: image.data_uri(),
                detail,
            },
        });
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn payload(builder: &RequestBuilder, request: &ModelRequest) -> Value {
        serde_json::to_value(builder.build(request).unwrap()).unwrap()
    }

    #[test]
    fn test_two_images_yield_three_blocks_in_order() {
        let builder = RequestBuilder::new("gpt-4o", "You judge plots.");
        let request = ModelRequest::new("Compare these")
            .with_images(vec![ImageRef::encoded("AAAA"), ImageRef::encoded("BBBB")])
            .with_detail(ImageDetail::Low);

        let value = payload(&builder, &request);
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"][0]["text"], "You judge plots.");

        let content = messages[1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0], json!({"type": "text", "text": "Compare these"}));
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
        assert_eq!(content[1]["image_url"]["detail"], "low");
        assert_eq!(content[2]["image_url"]["url"], "data:image/jpeg;base64,BBBB");
    }

    #[test]
    fn test_system_override_is_call_scoped() {
        let builder = RequestBuilder::new("gpt-4o", "default prompt");

        let overridden = payload(
            &builder,
            &ModelRequest::new("hi").with_system_prompt("special prompt"),
        );
        assert_eq!(overridden["messages"][0]["content"][0]["text"], "special prompt");

        let next = payload(&builder, &ModelRequest::new("hi"));
        assert_eq!(next["messages"][0]["content"][0]["text"], "default prompt");

        let empty = payload(&builder, &ModelRequest::new("hi").with_system_prompt(""));
        assert_eq!(empty["messages"][0]["content"][0]["text"], "default prompt");
    }

    #[test]
    fn test_instance_args_win_on_collision() {
        let builder = RequestBuilder::new("gpt-4o", "").with_args(GenerationArgs {
            temperature: Some(0.0),
            max_tokens: Some(1),
            ..Default::default()
        });
        let request = ModelRequest::new("hi").with_args(GenerationArgs {
            temperature: Some(0.9),
            sample_count: Some(3),
            ..Default::default()
        });

        let value = payload(&builder, &request);
        assert_eq!(value["temperature"], json!(0.0));
        assert_eq!(value["max_tokens"], json!(1));
        assert_eq!(value["n"], json!(3));
        assert!(value.get("logit_bias").is_none());
        assert!(value.get("logprobs").is_none());
    }

    #[test]
    fn test_no_images_yields_text_only() {
        let builder = RequestBuilder::new("gpt-4o", "sys");
        let value = payload(&builder, &ModelRequest::new("write code"));
        assert_eq!(value["messages"][1]["content"].as_array().unwrap().len(), 1);
        assert_eq!(value["model"], "gpt-4o");
    }
}
