//! # tianyi-core
//!
//! Core types and error taxonomy for the Tianyi hybrid memory subsystem.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod event;
pub mod instruction;
pub mod retrieval;
pub mod types;

pub use error::{Result, TianyiError};
pub use event::{MemoryEvent, Role, estimate_tokens};
pub use instruction::{Instruction, InstructionKind, VectorWrite, WriteOutcome};
pub use retrieval::{Budget, Provenance, Recall, RetrievalResult};
pub use types::*;
