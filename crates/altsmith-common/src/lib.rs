//! Altsmith-Common: Shared types, IDs, and utilities.
//!
//! This crate provides common functionality used across altsmith:
//!
//! - **Typed IDs**: Type-safe wrappers for clients, runs, and media assets
//! - **Core Types**: Enums for run scopes, trigger sources, job states, and
//!   failure kinds
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use altsmith_common::{ClientId, RunId, TriggerSource, Error, Result};
//!
//! // Create typed IDs
//! let run_id = RunId::new();
//! let client_id = ClientId::parse("acme-blog").unwrap();
//!
//! // Use common error types
//! fn example() -> Result<()> {
//!     Err(Error::not_found("client"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
