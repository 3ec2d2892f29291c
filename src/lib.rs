//! # Reagent
//!
//! An autonomous agent runtime that drives a language model through a
//! Reflect → Strategize → Act → Observe loop until a user goal is achieved,
//! the turn budget runs out, or a fatal error occurs.
//!
//! The crate is a library; hosts assemble a run from three pieces:
//!
//! - a [`tools::ToolRegistry`] of callable tool descriptors,
//! - a [`llm::TextOracle`] implementation (the bundled
//!   [`llm::OpenAiTextOracle`] or anything deterministic for tests),
//! - an [`config::AgentConfig`] with budgets, timeouts, and the workspace
//!   root.
//!
//! ```no_run
//! use reagent::agent::AgentController;
//! use reagent::config::AgentConfig;
//! use reagent::llm::OpenAiTextOracle;
//! use reagent::tools::ToolRegistry;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AgentConfig::load("agent_config.json", None)?;
//! let registry = Arc::new(ToolRegistry::new()); // host registers its tools
//! let oracle = Arc::new(OpenAiTextOracle::new(config.oracle.clone())?);
//!
//! let mut controller = AgentController::new(registry, oracle, config)?;
//! let result = controller
//!     .execute_goal("Create hello.txt with content Hi and read it back.", None)
//!     .await;
//! println!("{}", result.summary);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod tools;
pub mod workspace;

pub use agent::AgentController;
pub use config::AgentConfig;
pub use models::{AgentState, Goal, Intent, ParsedAction, RunResult, TurnRecord};
