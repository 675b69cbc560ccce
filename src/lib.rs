//! azchat - Azure OpenAI chat sessions, concurrent batching and Batch API jobs.
//!
//! ## Architecture
//!
//! - **Identity**: API key or Entra ID service principal (bearer tokens)
//! - **Client**: `AzureOpenAIClientFactory` builds configured `AzureOpenAIClient`s
//! - **Chat**: `ChatSession` keeps history; `ChatUtil` runs one-shot and
//!   concurrent stateless calls
//! - **Batch**: offline Batch API jobs (JSONL upload, submit, poll, correlate)
//!
//! ## Failure policy
//!
//! Configuration problems fail before any request is sent. Remote failures are
//! returned as reported; nothing is retried.

pub mod batch;
pub mod chat;
pub mod client;
pub mod identity;
pub mod json_util;
pub mod models;

// Re-exports for convenience
pub use batch::{BatchJob, BatchJobRunner, BatchOutcome, BatchReply, BatchRun, BatchStatus};
pub use chat::{ChatOptions, ChatSession, ChatUtil};
pub use client::{
    Auth, AzureOpenAIClient, AzureOpenAIClientFactory, ChatClient, ClientFactory, ResponseRequest,
};
pub use identity::{AzureIdentity, TokenProvider};
pub use json_util::{JsonArrayOptions, to_json_array};
pub use models::{AzChatError, Config, Message, Result, Role};
