//! LLM integration for flowforge.
//!
//! The generation backend is any OpenAI-compatible chat endpoint. Structured
//! output is requested through `response_format` so the model returns data
//! shaped like the artifact schema rather than free text.
//!
//! ```ignore
//! use flowforge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::new("https://openrouter.ai/api/v1", Some(key), "openai/gpt-4o")?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello!")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, JsonSchemaFormat, LiteLlmClient, LlmProvider,
    Message, ResponseFormat, Usage,
};
