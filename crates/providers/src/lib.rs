//! Model client and routing for Veritas.
//!
//! The client implements `veritas_core::Provider`; the router decides which
//! model name each call uses.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ModelRouter, build_provider};
