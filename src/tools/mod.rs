//! # Tools Module
//!
//! The tool side of the loop: descriptors and the registry that holds them,
//! schema validation compiled at registration time, the timeout-bounded
//! dispatcher, and the 3-layer observation funnel that keeps oversize
//! outputs from destroying the context window.
//!
//! Concrete production tools (shell, file I/O, code search, provisioner)
//! belong to the host application; this module only defines the contract
//! they register against.

pub mod dispatcher;
pub mod funnel;
pub mod registry;
pub mod schema;

pub use dispatcher::{Dispatcher, ToolResult, ToolStatus};
pub use funnel::{ObservationFunnel, ObservationSummary};
pub use registry::{FnTool, RegisteredTool, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
pub use schema::{CompiledValidator, InputSchema, ParamType, PropertySchema, ValidationError};
