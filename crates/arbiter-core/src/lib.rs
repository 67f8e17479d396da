//! # arbiter-core
//!
//! The execution harness and governed step-loop router for the arbiter
//! kernel.
//!
//! This crate provides:
//! - The trust-boundary traits (`SchemaValidator`, `StructuredOutputProvider`,
//!   `CheckpointStore`, `TraceSink`)
//! - The `Harness` that wraps every instruction invocation in the
//!   sanitizing-firewall pipeline
//! - The `GraphBuilder`/`GovernedGraph`/`Router` trio that drives the step
//!   loop with an arbiter decision between every transition
//! - The `EnsembleInstruction` adapter for parallel fan-out inside one node
//! - An in-memory `CheckpointStore` reference implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbiter_core::{GraphBuilder, Harness, Router};
//!
//! let mut builder = GraphBuilder::new();
//! builder.add_instruction(generate)?;
//! builder.add_instruction(verify)?;
//! builder.add_edge("generate", "verify")?;
//! builder.set_entry("generate")?;
//! let graph = Arc::new(builder.compile(&policy_config)?);
//!
//! let router = Router::new(graph, harness, recorder);
//! let report = router.run(initial_data);
//! ```

pub mod ensemble;
pub mod harness;
pub mod persistence;
pub mod router;
pub mod traits;

pub use ensemble::{EnsembleInstruction, MergeStrategy};
pub use harness::Harness;
pub use persistence::MemoryCheckpointStore;
pub use router::{GovernedGraph, GraphBuilder, Router};
