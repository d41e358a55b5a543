//! # Strata LLM
//!
//! Minimal chat-completion client speaking the OpenAI-compatible wire format.
//! Strata uses it to turn source files into one-paragraph context descriptions;
//! every caller is expected to fall back to a local heuristic when a request fails.
//!
//! ```rust,no_run
//! use strata_llm::{ChatMessage, Client, ClientConfig};
//!
//! # async fn example() -> Result<(), strata_llm::LlmError> {
//! let client = Client::new(ClientConfig::new("https://api.openai.com/v1", "sk-...", "gpt-4o-mini"))?;
//! let response = client.chat_completion(vec![ChatMessage::user("Describe this file")]).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{LlmError, LlmResult};
pub use types::{ChatMessage, ChatResponse, MessageRole, Usage};
