//! # arbiter-contracts
//!
//! Shared types, schemas, and contracts for the arbiter governance kernel.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate — only data definitions, the `Invoke` capability, and error
//! types.

pub mod decision;
pub mod error;
pub mod execution;
pub mod instruction;
pub mod state;
pub mod trace;
