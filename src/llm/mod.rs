//! LLM integration for pkg-mender.
//!
//! The repair loop only depends on the [`LlmProvider`] trait; the concrete
//! [`OpenAiCompatProvider`] talks to any OpenAI-compatible chat completions
//! endpoint with function calling.
//!
//! ```ignore
//! use pkg_mender::llm::{GenerationRequest, LlmProvider, Message, OpenAiCompatProvider};
//!
//! let provider = OpenAiCompatProvider::from_config(&config.llm)?;
//! let request = GenerationRequest::new("", vec![Message::user("hello")]);
//! let response = provider.generate(request).await?;
//! ```

pub mod litellm;
pub mod providers;

pub use litellm::{
    Choice, FinishReason, FunctionCall, FunctionDefinition, GenerationRequest, GenerationResponse,
    LlmProvider, Message, ToolCallInfo, ToolChoice, ToolDefinition, Usage,
};
pub use providers::OpenAiCompatProvider;
