//! The capability every pipeline stage needs from a model.

use crate::client::{GenerationArgs, ImageRef};
use crate::models::{CompletionResult, ImageDetail, Result};
use async_trait::async_trait;

/// One logical request to a model.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub text: String,
    pub images: Vec<ImageRef>,
    /// Replaces the model's system prompt for this call when non-empty
    pub system_prompt: Option<String>,
    pub image_detail: ImageDetail,
    pub args: GenerationArgs,
}

impl ModelRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.image_detail = detail;
        self
    }

    pub fn with_args(mut self, args: GenerationArgs) -> Self {
        self.args = args;
        self
    }
}

/// A model that answers requests.
///
/// `Ok(None)` means no usable result was obtained for this request (retries
/// exhausted); callers skip the item. `Err` is reserved for fatal conditions
/// such as unreadable images or cancellation.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn make_request(&self, request: ModelRequest) -> Result<Option<CompletionResult>>;
}
