//! Shared error type and context-trait macro used across the workspace.

pub mod error;

pub use error::{CorvidError, Error, FromMessage, Result};
