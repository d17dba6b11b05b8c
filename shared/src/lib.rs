//! Shared types for the CDC integration harness
//!
//! Contains the service identifiers, configuration enums, error type and
//! logging bootstrap used by every crate in the workspace.

pub mod types;
pub mod errors;
pub mod logging;

pub use types::*;
pub use errors::*;
