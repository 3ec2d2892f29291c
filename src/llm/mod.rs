//! # LLM Module
//!
//! The oracle seam between the agent loop and whatever language model backs
//! it: a text-in / text-out trait plus a default OpenAI-compatible transport.

pub mod openai;
pub mod oracle;

pub use openai::OpenAiTextOracle;
pub use oracle::{OracleError, PromptMessage, PromptRole, TextOracle};
