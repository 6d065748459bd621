pub mod client;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::Conversation;
use crate::tools::ToolSpec;

pub use client::LlmClient;
pub use types::{ChatMessage, LlmConfig, LlmError, ModelResponse};

/// Everything sent to the model on one turn.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_instruction: &'a str,
    pub conversation: &'a Conversation,
    pub tools: &'a [ToolSpec],
}

/// The conversational model, seen as a plain call-and-response service.
///
/// Implementations report a reply that breaks the response contract as
/// [`LlmError::InvalidResponse`].
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError>;
}

#[async_trait]
impl<T: ModelService + ?Sized> ModelService for Arc<T> {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError> {
        (**self).generate(request).await
    }
}
