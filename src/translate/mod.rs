//! API translation between Anthropic and `OpenAI` formats.
//!
//! The core of the proxy: converts requests, responses, and streaming events
//! between the Anthropic Messages API and the two upstream dialects (Chat
//! Completions and the ChatGPT Responses backend). All translation functions
//! are pure (no I/O).

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod responses_request;
pub mod responses_streaming;
pub mod responses_types;
pub mod streaming;
