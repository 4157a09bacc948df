//! # Veritas Core
//!
//! Domain types, traits, and error definitions for the Veritas research
//! agent. Everything else in the workspace depends inward on this crate.
//!
//! ## Contents
//!
//! - `Provider`: the opaque model interface
//! - `Tool` / `ToolRegistry`: capabilities exposed to the model
//! - `Evidence`, `Claim`, `Observation`: what the verifier reasons over
//! - `EventBus`: auditing hooks for the research loop

pub mod error;
pub mod event;
pub mod evidence;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use evidence::{Claim, Evidence, EvidenceKind, Observation, VerificationStatus};
pub use message::{Message, MessageToolCall, Role, SessionId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Parameters, Tool, ToolCall, ToolRegistry, ToolResult};
