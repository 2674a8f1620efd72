//! Model client: payload building, transport, retries and cancellation.

mod cancel;
pub mod image;
mod llm_client;
mod model;
mod request;
pub mod retry;
pub mod tokenizer;
mod transport;

pub use cancel::CancelToken;
pub use image::{EncodedImage, ImageRef};
pub use llm_client::{CompletionClient, Outcome, classify};
pub use model::{CompletionModel, ModelRequest};
pub use request::{ChatCompletionRequest, ChatMessage, ContentBlock, GenerationArgs, ImageUrl, RequestBuilder};
pub use retry::RetryPolicy;
pub use tokenizer::{TiktokenTokenizer, Tokenizer};
pub use transport::{HttpTransport, Transport};
