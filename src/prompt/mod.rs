//! # Prompt Module
//!
//! Everything between the agent state and the text handed to the oracle:
//! token counting, progressive observation truncation, and the turn-aware
//! prompt builder that keeps each request under a hard token budget.

pub mod builder;
pub mod tokens;
pub mod truncate;

pub use builder::{PromptBuilder, TruncationReport};
pub use tokens::TokenCounter;
pub use truncate::Aggression;
