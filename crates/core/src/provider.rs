//! Model client seam: the collaborator that turns a prompt into a chunk stream.
//!
//! The network client that talks to the model provider lives outside this
//! core. It only has to hand back raw, arbitrarily chunked bytes; the stream
//! parser does the rest.

use crate::context::AssembledContext;
use crate::error::ProviderError;
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Raw output chunks from the model, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ProviderError>>;

/// What the turn controller sends per model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub session_id: String,
    pub context: AssembledContext,
    pub tools: Vec<ToolDefinition>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// The client name (e.g., "anthropic", "replay").
    fn name(&self) -> &str;

    /// Send the prompt and return the model's output stream.
    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, ProviderError>;
}
