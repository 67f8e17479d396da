//! # arbiter-firewall
//!
//! The sanitizing firewall: JSON Schema validation and retry-based
//! structured-output enforcement for the arbiter kernel.
//!
//! ## Overview
//!
//! [`SchemaFirewall`] is the kernel's `SchemaValidator` — the harness runs
//! every declared ingress and egress schema through it. [`RetryEnforcer`]
//! is the reference `StructuredOutputProvider`: Cognitive and Memory
//! bindings are invoked through it so their untrusted output is forced into
//! the declared shape, with prior validation errors fed back to bias each
//! retry.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arbiter_core::Harness;
//! use arbiter_firewall::{RetryEnforcer, SchemaFirewall};
//!
//! let validator = Arc::new(SchemaFirewall::new());
//! let enforcer = Arc::new(RetryEnforcer::new(validator.clone()));
//! let harness = Harness::new(validator, enforcer, recorder);
//! ```

pub mod enforce;
pub mod validator;

pub use enforce::RetryEnforcer;
pub use validator::SchemaFirewall;
