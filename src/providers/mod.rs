pub mod claude;
pub mod local;
pub mod router;
pub mod traits;
pub mod types;

pub use router::ProviderRouter;
pub use traits::AiProvider;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ProviderError, StopReason, ToolCall, ToolDefinition,
};
