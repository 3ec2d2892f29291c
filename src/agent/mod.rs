//! # Agent Module
//!
//! The reasoning side of the loop: the total response parser, the
//! completeness gate that guards `finish`, the final-results serializer,
//! and the controller that ties prompt building, the oracle, and tool
//! dispatch into one run.

pub mod controller;
pub mod gate;
pub mod parser;
pub mod report;

pub use controller::AgentController;
pub use gate::{verify_goal_completeness, GateOutcome};
pub use parser::{parse_response, ParsedResponse};
